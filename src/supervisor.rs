//! Supervisor - the registry of recording sessions, keyed by URL

use crate::backend::Credentials;
use crate::config::RecorderConfig;
use crate::error::{RecorderError, Result};
use crate::event::{EventBus, RecorderEvent, SessionLog};
use crate::session::{RecordingSession, SessionContext, SessionHandle, SessionSnapshot, SessionState};
use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Starts, stops and lists recording sessions.
///
/// Only the control surface touches the registry; session tasks work on
/// their own `SessionHandle`. Cloning shares the registry.
#[derive(Clone)]
pub struct Supervisor {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
    ctx: SessionContext,
}

impl Supervisor {
    pub fn new(config: &RecorderConfig) -> Self {
        let bus = EventBus::new(config.event_capacity);
        Self::with_bus(config, bus)
    }

    pub fn with_bus(config: &RecorderConfig, bus: EventBus) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ctx: SessionContext::new(config, bus),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.ctx.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.ctx.bus.subscribe()
    }

    /// Mirror `Log` events into `<dir>/sessions.log`.
    pub fn attach_session_log(&self, dir: &Path) -> JoinHandle<()> {
        SessionLog::new(dir).spawn(&self.ctx.bus)
    }

    /// Register a session for `url` and start driving it in the background.
    ///
    /// Must be called from within a Tokio runtime. Fails if `url` already
    /// has a session that is not `Stopped` or `Failed`; a terminal one is
    /// replaced.
    pub fn start(
        &self,
        url: &str,
        output_dir: impl Into<PathBuf>,
        credentials: Option<Credentials>,
    ) -> Result<SessionHandle> {
        let url = url.trim();
        if url.is_empty() {
            return Err(RecorderError::Config("stream URL must not be empty".to_string()));
        }

        let handle = {
            let mut sessions = self.write();
            if let Some(existing) = sessions.get(url) {
                if !existing.state().is_terminal() {
                    return Err(RecorderError::AlreadySession { url: url.to_string() });
                }
            }
            let handle = SessionHandle::new(url, output_dir, credentials);
            sessions.insert(url.to_string(), handle.clone());
            handle
        };

        info!(url = url, "starting recording session");
        let session = RecordingSession::new(handle.clone(), self.ctx.clone());
        let watchdog = handle.clone();
        let bus = self.ctx.bus.clone();
        tokio::spawn(async move {
            if AssertUnwindSafe(session.run()).catch_unwind().await.is_err() {
                error!(url = %watchdog.url(), "session task panicked");
                watchdog.abandon("session task panicked", &bus);
            }
        });

        Ok(handle)
    }

    /// Stop the session for `url` and wait until it is terminal.
    ///
    /// Calling it again, or on an already finished session, just returns the
    /// terminal state.
    pub async fn stop(&self, url: &str) -> Result<SessionState> {
        let handle = self
            .handle(url)
            .ok_or_else(|| RecorderError::NotFound { url: url.to_string() })?;
        if !handle.is_stop_requested() && !handle.state().is_terminal() {
            info!(url = url, "stopping recording session");
        }
        handle.request_stop();
        Ok(handle.wait_terminal().await)
    }

    pub fn handle(&self, url: &str) -> Option<SessionHandle> {
        self.read().get(url.trim()).cloned()
    }

    pub fn get(&self, url: &str) -> Option<SessionSnapshot> {
        self.handle(url).map(|h| h.snapshot())
    }

    /// Snapshot of every registered session, oldest first.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let handles: Vec<SessionHandle> = self.read().values().cloned().collect();
        let mut snapshots: Vec<SessionSnapshot> = handles.iter().map(|h| h.snapshot()).collect();
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.url.cmp(&b.url)));
        snapshots
    }

    /// Number of sessions that are not yet terminal
    pub fn active_count(&self) -> usize {
        self.read().values().filter(|h| !h.state().is_terminal()).count()
    }

    /// Stop every session concurrently and wait for all of them.
    pub async fn shutdown_all(&self) -> Vec<(String, SessionState)> {
        let handles: Vec<SessionHandle> = self.read().values().cloned().collect();
        if handles.iter().any(|h| !h.state().is_terminal()) {
            info!("stopping {} recording session(s)", handles.len());
        }
        for handle in &handles {
            handle.request_stop();
        }
        join_all(handles.iter().map(|h| async move {
            (h.url().to_string(), h.wait_terminal().await)
        }))
        .await
    }

    /// Drop terminal sessions from the registry. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, h| !h.state().is_terminal());
        before - sessions.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionHandle>> {
        match self.sessions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionHandle>> {
        match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
