//! Recording session - the per-URL lifecycle
//!
//! `Idle → ResolvingMetadata → Starting → Recording → Stopping → Stopped`,
//! with `Failed` reachable before recording starts. One task drives the
//! session; while recording it owns two helpers, the output reader and the
//! growth watcher, and joins both before reaching a terminal state.

use crate::backend::{BackendCommand, Credentials};
use crate::config::{BackendConfig, RecorderConfig};
use crate::error::RecorderError;
use crate::event::{EventBus, EventKind};
use crate::infra::process::{ExitPath, ProcessMonitor};
use crate::metadata::{derive_filename, Metadata, MetadataResolver};
use crate::watcher::{file_size, FileGrowthWatcher, Liveness};
use chrono::{DateTime, Local, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound for draining backend output after the process is gone.
/// Grandchildren of the backend may keep the pipe open.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    ResolvingMetadata,
    Starting,
    Recording,
    Stopping,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }

    /// Edges of the lifecycle graph
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, ResolvingMetadata)
                | (ResolvingMetadata, Starting)
                | (ResolvingMetadata, Failed)
                | (Starting, Recording)
                | (Starting, Failed)
                | (Recording, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::ResolvingMetadata => write!(f, "resolving metadata"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Recording => write!(f, "recording"),
            SessionState::Stopping => write!(f, "stopping"),
            SessionState::Stopped => write!(f, "stopped"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time copy of a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub url: String,
    pub state: SessionState,
    pub output_dir: PathBuf,
    pub output_path: Option<PathBuf>,
    pub last_size: u64,
    pub stall_count: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Default)]
struct SessionData {
    output_path: Option<PathBuf>,
    metadata: Option<Metadata>,
    pid: Option<u32>,
    last_size: u64,
    stall_count: u32,
    failure: Option<String>,
}

#[derive(Debug)]
struct SessionShared {
    url: String,
    output_dir: PathBuf,
    credentials: Option<Credentials>,
    started_at: DateTime<Utc>,
    state: watch::Sender<SessionState>,
    data: Mutex<SessionData>,
    cancel: CancellationToken,
}

/// Cheap, cloneable view of one session: observe it or ask it to stop.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn new(url: impl Into<String>, output_dir: impl Into<PathBuf>, credentials: Option<Credentials>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            shared: Arc::new(SessionShared {
                url: url.into(),
                output_dir: output_dir.into(),
                credentials,
                started_at: Utc::now(),
                state,
                data: Mutex::new(SessionData::default()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn output_path(&self) -> Option<PathBuf> {
        self.data().output_path.clone()
    }

    /// Follow state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Ask the session to stop. Safe to call any number of times.
    pub fn request_stop(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Resolve once the session is `Stopped` or `Failed`.
    pub async fn wait_terminal(&self) -> SessionState {
        let mut rx = self.shared.state.subscribe();
        let state = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            // the sender lives in `shared`, which we hold
            Err(_) => self.state(),
        };
        state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let data = self.data();
        SessionSnapshot {
            url: self.shared.url.clone(),
            state: self.state(),
            output_dir: self.shared.output_dir.clone(),
            output_path: data.output_path.clone(),
            last_size: data.last_size,
            stall_count: data.stall_count,
            started_at: self.shared.started_at,
            pid: data.pid,
            author: data.metadata.as_ref().and_then(|m| m.author.clone()),
            title: data.metadata.as_ref().and_then(|m| m.title.clone()),
            failure: data.failure.clone(),
        }
    }

    fn data(&self) -> MutexGuard<'_, SessionData> {
        match self.shared.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Move along the lifecycle graph; invalid edges are refused.
    ///
    /// The status event is published before state watchers are woken, so
    /// anyone who sees the new state has already been sent its event.
    fn transition(&self, next: SessionState, bus: &EventBus) -> bool {
        let mut from = self.state();
        let changed = self.shared.state.send_if_modified(|state| {
            from = *state;
            if state.can_transition_to(next) {
                *state = next;
                bus.status(&self.shared.url, next.to_string());
                true
            } else {
                false
            }
        });
        if changed {
            debug!(url = %self.shared.url, "session {} -> {}", from, next);
        } else {
            warn!(url = %self.shared.url, "refused session transition {} -> {}", from, next);
        }
        changed
    }

    /// Mark a session whose driver died unexpectedly.
    pub(crate) fn abandon(&self, reason: &str, bus: &EventBus) {
        self.request_stop();
        self.data().failure = Some(reason.to_string());
        self.shared.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            bus.error(&self.shared.url, reason);
            *state = SessionState::Failed;
            bus.status(&self.shared.url, SessionState::Failed.to_string());
            true
        });
    }

    /// The output path is fixed exactly once.
    fn set_output_path(&self, path: PathBuf) -> bool {
        let mut data = self.data();
        if data.output_path.is_some() {
            return false;
        }
        data.output_path = Some(path);
        true
    }

    fn record_sample(&self, size: Option<u64>, stall_count: u32) {
        let mut data = self.data();
        if let Some(size) = size {
            data.last_size = size;
        }
        data.stall_count = stall_count;
    }
}

/// Everything a session needs besides its own identity
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub backend: BackendConfig,
    pub resolver: MetadataResolver,
    pub monitor: ProcessMonitor,
    pub watcher: FileGrowthWatcher,
    pub bus: EventBus,
}

impl SessionContext {
    pub fn new(config: &RecorderConfig, bus: EventBus) -> Self {
        Self {
            backend: config.backend.clone(),
            resolver: MetadataResolver::new(config.backend.clone()),
            monitor: ProcessMonitor::new(config.grace_period()),
            watcher: FileGrowthWatcher::new(config.poll_interval(), config.stale_threshold),
            bus,
        }
    }
}

/// Drives one session from `Idle` to a terminal state.
pub struct RecordingSession {
    handle: SessionHandle,
    ctx: SessionContext,
}

impl RecordingSession {
    pub fn new(handle: SessionHandle, ctx: SessionContext) -> Self {
        Self { handle, ctx }
    }

    /// Run the whole lifecycle and return the terminal state.
    pub async fn run(self) -> SessionState {
        let url = self.handle.url().to_string();
        let bus = self.ctx.bus.clone();
        let cancel = self.handle.shared.cancel.clone();

        self.handle.transition(SessionState::ResolvingMetadata, &bus);

        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.ctx.resolver.resolve(&url, self.handle.shared.credentials.as_ref()) => Some(result),
        };
        let metadata = match resolved {
            None => return self.fail("stopped before recording started"),
            Some(Err(e)) => return self.fail(&e.to_string()),
            Some(Ok(metadata)) => metadata,
        };

        bus.publish(EventKind::MetadataReceived {
            url: url.clone(),
            metadata: metadata.clone(),
        });
        let filename = derive_filename(&metadata, Local::now().naive_local());
        let output_path = self.handle.shared.output_dir.join(&filename);
        self.handle.data().metadata = Some(metadata);
        if !self.handle.set_output_path(output_path.clone()) {
            return self.fail("output path was already assigned");
        }
        self.handle.transition(SessionState::Starting, &bus);

        if let Err(e) = tokio::fs::create_dir_all(&self.handle.shared.output_dir).await {
            return self.fail(&RecorderError::Io(e).to_string());
        }
        if cancel.is_cancelled() {
            return self.fail("stopped before recording started");
        }

        let credentials = self.handle.shared.credentials.as_ref();
        let command = BackendCommand::record(&self.ctx.backend, &url, credentials, &output_path);
        debug!(url = %url, "recording command: {}", command.display_redacted(credentials));

        let mut process = match self.ctx.monitor.spawn(&url, &command, &output_path) {
            Ok(process) => process,
            Err(e) => return self.fail(&e.to_string()),
        };
        self.handle.data().pid = Some(process.pid);

        let (stdout, stderr) = process.take_output().unwrap_or((None, None));
        let mut reader = tokio::spawn(ProcessMonitor::read_output(url.clone(), stdout, stderr, bus.clone()));
        let watch_cancel = cancel.child_token();
        let watcher = self.spawn_watcher(output_path.clone(), watch_cancel.clone());

        self.handle.transition(SessionState::Recording, &bus);
        bus.info(&url, format!("recording to {}", output_path.display()));

        let exited = self.ctx.monitor.wait_for_exit(&url, &mut process, &cancel, &bus).await;
        self.handle.transition(SessionState::Stopping, &bus);
        let (exit_path, status) = match exited {
            Some(exited) => exited,
            None => (ExitPath::StopRequested, self.ctx.monitor.terminate(&mut process).await),
        };
        match (exit_path, &status) {
            (ExitPath::Completed, Ok(s)) => bus.info(&url, format!("backend finished ({})", s)),
            (ExitPath::StopRequested, Ok(s)) => bus.info(&url, format!("backend stopped on request ({})", s)),
            (_, Err(e)) => bus.error(&url, format!("lost track of backend process: {}", e)),
        };

        watch_cancel.cancel();
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut reader).await.is_err() {
            warn!(url = %url, "backend output still open after exit, abandoning reader");
            reader.abort();
        }
        if let Err(e) = watcher.await {
            warn!(url = %url, "growth watcher ended abnormally: {}", e);
        }

        self.final_size_check(&output_path).await;
        self.handle.data().pid = None;
        self.handle.transition(SessionState::Stopped, &bus);
        SessionState::Stopped
    }

    fn spawn_watcher(&self, path: PathBuf, cancel: CancellationToken) -> JoinHandle<()> {
        let handle = self.handle.clone();
        let bus = self.ctx.bus.clone();
        let watcher = self.ctx.watcher.clone();

        tokio::spawn(async move {
            let url = handle.url().to_string();
            let mut reports = Box::pin(watcher.watch(path.clone(), cancel));

            while let Some(report) = reports.next().await {
                handle.record_sample(report.size, report.stall_count);
                match report.signal {
                    Some(Liveness::SizeChanged { bytes }) => {
                        bus.publish(EventKind::SizeChanged { url: url.clone(), bytes });
                    }
                    Some(Liveness::FileNotCreated) => {
                        bus.warn(&url, format!("{}, waiting for the backend", RecorderError::FileNotCreated(path.clone())));
                    }
                    Some(Liveness::Stalled { polls }) => {
                        bus.warn(&url, format!("stream stalled: {}", RecorderError::Stall { polls }));
                    }
                    Some(Liveness::FileDeleted) => {
                        bus.warn(&url, RecorderError::FileDeleted(path.clone()).to_string());
                    }
                    None => {}
                }
            }
        })
    }

    async fn final_size_check(&self, path: &Path) {
        let url = self.handle.url();
        match file_size(path).await {
            Ok(Some(size)) if size > 0 => {
                let stall_count = self.handle.data().stall_count;
                self.handle.record_sample(Some(size), stall_count);
                self.ctx.bus.info(url, format!("final size: {} bytes ({})", size, path.display()));
            }
            Ok(Some(_)) => {
                self.ctx.bus.warn(url, format!("recording is empty: {}", path.display()));
            }
            Ok(None) => {
                self.ctx.bus.warn(url, format!("recording produced no output file: {}", path.display()));
            }
            Err(e) => {
                self.ctx.bus.warn(url, format!("cannot read final size of {}: {}", path.display(), e));
            }
        }
    }

    fn fail(&self, reason: &str) -> SessionState {
        let url = self.handle.url();
        info!(url = url, "session failed: {}", reason);
        self.handle.data().failure = Some(reason.to_string());
        self.ctx.bus.error(url, reason);
        self.handle.transition(SessionState::Failed, &self.ctx.bus);
        SessionState::Failed
    }
}
