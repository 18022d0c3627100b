//! Output formatting for CLI commands

use crate::event::{EventKind, RecorderEvent};
use crate::session::SessionSnapshot;
use chrono::Local;
use serde::Serialize;

/// Format output as pretty JSON
pub fn format_output<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

/// One event per line: JSON when `json`, otherwise human readable
pub fn format_event(event: &RecorderEvent, json: bool) -> String {
    if json {
        return serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    }

    let time = event.timestamp.with_timezone(&Local).format("%H:%M:%S");
    match &event.kind {
        EventKind::StatusChanged { url, text } => format!("[{}] {} | {}", time, url, text),
        EventKind::ProgressChanged { url, percent } => format!("[{}] {} | progress {}%", time, url, percent),
        EventKind::SizeChanged { url, bytes } => format!("[{}] {} | {}", time, url, human_bytes(*bytes)),
        EventKind::Log { url, level, text } => {
            format!("[{}] {} | {}: {}", time, url.as_deref().unwrap_or("-"), level, text)
        }
        EventKind::MetadataReceived { url, metadata } => format!(
            "[{}] {} | {} - {}",
            time,
            url,
            metadata.author.as_deref().unwrap_or("unknown"),
            metadata.title.as_deref().unwrap_or("untitled")
        ),
    }
}

/// Session table row
pub fn format_snapshot(s: &SessionSnapshot) -> String {
    let path = s
        .output_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!("{} | {} | {} | {}", s.url, s.state, human_bytes(s.last_size), path);
    if let Some(reason) = &s.failure {
        line.push_str(&format!(" | {}", reason));
    }
    line
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
