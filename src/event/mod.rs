//! Event bus - delivers session events to any number of observers

mod session_log;

pub use session_log::SessionLog;

use crate::metadata::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Severity of a `Log` event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// What happened
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    StatusChanged {
        url: String,
        text: String,
    },
    ProgressChanged {
        url: String,
        percent: u32,
    },
    SizeChanged {
        url: String,
        bytes: u64,
    },
    Log {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        level: LogLevel,
        text: String,
    },
    MetadataReceived {
        url: String,
        metadata: Metadata,
    },
}

impl EventKind {
    /// The session this event belongs to, if any
    pub fn url(&self) -> Option<&str> {
        match self {
            EventKind::StatusChanged { url, .. }
            | EventKind::ProgressChanged { url, .. }
            | EventKind::SizeChanged { url, .. }
            | EventKind::MetadataReceived { url, .. } => Some(url),
            EventKind::Log { url, .. } => url.as_deref(),
        }
    }
}

/// An immutable event record.
///
/// `seq` is a logical timestamp: it increases strictly in publish order
/// across the whole bus, so subscribers see events in `seq` order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecorderEvent {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Cloneable handle to the shared broadcast channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<RecorderEvent>,
    next_seq: Arc<Mutex<u64>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            next_seq: Arc::new(Mutex::new(0)),
        }
    }

    /// Register a new observer. It receives every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Stamp and deliver an event. Having no observers is not an error.
    pub fn publish(&self, kind: EventKind) -> RecorderEvent {
        // Sequence assignment and send happen under one lock so that
        // delivery order always matches `seq` order.
        let mut next_seq = match self.next_seq.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *next_seq += 1;
        let event = RecorderEvent {
            seq: *next_seq,
            timestamp: Utc::now(),
            kind,
        };
        let _ = self.sender.send(event.clone());
        event
    }

    pub fn status(&self, url: &str, text: impl Into<String>) -> RecorderEvent {
        self.publish(EventKind::StatusChanged {
            url: url.to_string(),
            text: text.into(),
        })
    }

    /// Publish a `Log` event and mirror it to tracing.
    pub fn log(&self, url: Option<&str>, level: LogLevel, text: impl Into<String>) -> RecorderEvent {
        let text = text.into();
        let target = url.unwrap_or("-");
        match level {
            LogLevel::Info => info!(url = target, "{}", text),
            LogLevel::Warn => warn!(url = target, "{}", text),
            LogLevel::Error => error!(url = target, "{}", text),
        }
        self.publish(EventKind::Log {
            url: url.map(str::to_string),
            level,
            text,
        })
    }

    pub fn info(&self, url: &str, text: impl Into<String>) -> RecorderEvent {
        self.log(Some(url), LogLevel::Info, text)
    }

    pub fn warn(&self, url: &str, text: impl Into<String>) -> RecorderEvent {
        self.log(Some(url), LogLevel::Warn, text)
    }

    pub fn error(&self, url: &str, text: impl Into<String>) -> RecorderEvent {
        self.log(Some(url), LogLevel::Error, text)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
