//! Metadata resolution - ask the backend who is streaming what, and name the file

use crate::backend::{BackendCommand, Credentials};
use crate::config::BackendConfig;
use crate::error::{RecorderError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Characters that are not allowed in file names on common filesystems
const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const UNKNOWN_AUTHOR: &str = "unknown";
const UNTITLED: &str = "untitled";
const FILE_EXTENSION: &str = "ts";

/// Stream metadata as reported by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    pub author: Option<String>,
    pub title: Option<String>,
    /// Full backend response
    pub raw: Value,
}

impl Metadata {
    /// Parse the backend's JSON reply.
    ///
    /// Author and title are read from a nested `metadata` object when there
    /// is one, otherwise from the top level.
    pub fn from_json(body: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(body.trim())
            .map_err(|e| RecorderError::MetadataParse(e.to_string()))?;
        let obj = raw
            .as_object()
            .ok_or_else(|| RecorderError::MetadataParse("expected a JSON object".to_string()))?;

        if let Some(message) = obj.get("error").and_then(Value::as_str) {
            return Err(RecorderError::MetadataBackend(message.to_string()));
        }

        let source = obj.get("metadata").and_then(Value::as_object).unwrap_or(obj);
        let field = |name: &str| {
            source
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            author: field("author"),
            title: field("title"),
            raw: raw.clone(),
        })
    }
}

/// Replace every reserved character with `_`.
pub fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| if RESERVED_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// `[author] YYYY-MM-DD HH:MM title.ts`
pub fn derive_filename(metadata: &Metadata, now: NaiveDateTime) -> String {
    let author = sanitize_component(metadata.author.as_deref().unwrap_or(UNKNOWN_AUTHOR));
    let title = sanitize_component(metadata.title.as_deref().unwrap_or(UNTITLED));
    format!(
        "[{}] {} {}.{}",
        author,
        now.format("%Y-%m-%d %H:%M"),
        title,
        FILE_EXTENSION
    )
}

/// Runs the backend in metadata mode.
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    backend: BackendConfig,
}

impl MetadataResolver {
    pub fn new(backend: BackendConfig) -> Self {
        Self { backend }
    }

    pub async fn resolve(&self, url: &str, credentials: Option<&Credentials>) -> Result<Metadata> {
        let cmd = BackendCommand::metadata(&self.backend, url, credentials);
        debug!(url = url, "querying metadata: {}", cmd.display_redacted(credentials));

        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RecorderError::MetadataBackend(format!("failed to run `{}`: {}", cmd.program, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            // streamlink-style backends put the reason in a JSON `error` field
            if let Err(err @ RecorderError::MetadataBackend(_)) = Metadata::from_json(&stdout) {
                return Err(err);
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
            return Err(RecorderError::MetadataBackend(format!(
                "exited with {}: {}",
                output.status, detail
            )));
        }

        Metadata::from_json(&stdout)
    }
}
