//! Append-only session log - one timestamped line per `Log` event

use super::{EventBus, EventKind, RecorderEvent};
use anyhow::Result;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const LOG_FILE_NAME: &str = "sessions.log";

/// Writes `Log` events to `<dir>/sessions.log`.
#[derive(Debug, Clone)]
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(LOG_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render a `Log` event as a log line; other events produce nothing.
    pub fn format_line(event: &RecorderEvent) -> Option<String> {
        match &event.kind {
            EventKind::Log { url, level, text } => Some(format!(
                "{} [{}] [{}] {}",
                event.timestamp.to_rfc3339(),
                level,
                url.as_deref().unwrap_or("-"),
                text.replace('\n', " ")
            )),
            _ => None,
        }
    }

    /// Append the event if it is a `Log` event. Returns whether a line was written.
    pub fn append(&self, event: &RecorderEvent) -> Result<bool> {
        let Some(line) = Self::format_line(event) else {
            return Ok(false);
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.lock_exclusive()?;
        let mut file = file;
        let written = writeln!(file, "{}", line);
        file.unlock()?;
        written?;
        Ok(true)
    }

    /// Follow the bus and append until it closes.
    pub fn spawn(self, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            debug!(path = %self.path.display(), "session log started");
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if !matches!(event.kind, EventKind::Log { .. }) {
                            continue;
                        }
                        // File locking and writes block; keep them off the runtime threads.
                        let log = self.clone();
                        match tokio::task::spawn_blocking(move || log.append(&event)).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => {
                                warn!(path = %self.path.display(), "failed to write session log: {}", e);
                            }
                            Err(e) => warn!("session log writer task failed: {}", e),
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("session log fell behind, {} events skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
