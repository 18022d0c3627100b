//! Stream Recorder Monitor - supervise live-stream recording processes
//!
//! One session per stream URL: resolve metadata, spawn the backend, watch
//! its output and the growth of the file it writes, and report everything
//! on an event bus.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod infra;
pub mod metadata;
pub mod session;
pub mod supervisor;
pub mod watcher;

pub use backend::{BackendCommand, Credentials};
pub use config::{BackendConfig, RecorderConfig};
pub use error::{RecorderError, Result};
pub use event::{EventBus, EventKind, LogLevel, RecorderEvent, SessionLog};
pub use infra::{classify_line, ExitPath, LineClass, ProcessHandle, ProcessMonitor};
pub use metadata::{derive_filename, sanitize_component, Metadata, MetadataResolver};
pub use session::{RecordingSession, SessionContext, SessionHandle, SessionSnapshot, SessionState};
pub use supervisor::Supervisor;
pub use watcher::{FileGrowthWatcher, GrowthReport, GrowthTracker, Liveness};
