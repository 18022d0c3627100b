//! Backend output classification
//!
//! Pure functions: one line of backend output in, typed signals out.

use regex::Regex;
use std::sync::LazyLock;

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)%").expect("percent pattern is valid"));

pub const ERROR_PREFIX: &str = "Error: ";

/// What a single output line means for the session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineClass {
    /// Status text to publish, already prefixed for errors
    pub status: Option<String>,
    /// Progress percentage, when the line reports one
    pub progress: Option<u32>,
}

impl LineClass {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.progress.is_none()
    }
}

/// Classify one line of backend output.
///
/// `error` (any case) wins over `stream`. A `progress` line may additionally
/// carry a percentage; when none can be extracted the line yields no progress.
pub fn classify_line(line: &str) -> LineClass {
    let line = line.trim_end();
    let status = if line.to_lowercase().contains("error") {
        Some(format!("{}{}", ERROR_PREFIX, line))
    } else if line.contains("stream") {
        Some(line.to_string())
    } else {
        None
    };

    let progress = if line.contains("progress") {
        extract_percent(line)
    } else {
        None
    };

    LineClass { status, progress }
}

/// First integer immediately followed by `%`.
pub fn extract_percent(line: &str) -> Option<u32> {
    PERCENT
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
