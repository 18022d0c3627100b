//! Error taxonomy for the recording supervisor

use std::path::PathBuf;

/// Errors surfaced by the supervisor and its sessions.
///
/// Control-surface misuse (`AlreadySession`, `NotFound`) is returned
/// synchronously. Everything else ends a single session and is reported on
/// the event bus; none of these bring the supervisor down.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("a recording session is already active for {url}")]
    AlreadySession { url: String },

    #[error("no recording session registered for {url}")]
    NotFound { url: String },

    #[error("could not parse backend metadata: {0}")]
    MetadataParse(String),

    #[error("backend metadata query failed: {0}")]
    MetadataBackend(String),

    #[error("failed to start backend `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    #[error("output file was not created yet: {}", .0.display())]
    FileNotCreated(PathBuf),

    #[error("output file was deleted during recording: {}", .0.display())]
    FileDeleted(PathBuf),

    #[error("output file has not grown for {polls} polls")]
    Stall { polls: u32 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_errors_name_the_url() {
        let err = RecorderError::AlreadySession { url: "https://live/a".to_string() };
        assert!(err.to_string().contains("https://live/a"));

        let err = RecorderError::NotFound { url: "https://live/b".to_string() };
        assert!(err.to_string().contains("https://live/b"));
    }

    #[test]
    fn test_watch_errors_describe_the_file() {
        let err = RecorderError::FileDeleted(PathBuf::from("/tmp/x.ts"));
        assert_eq!(err.to_string(), "output file was deleted during recording: /tmp/x.ts");
        assert_eq!(RecorderError::Stall { polls: 5 }.to_string(), "output file has not grown for 5 polls");
    }
}
