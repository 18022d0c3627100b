//! Configuration - backend command line and monitoring thresholds
//!
//! Loaded from `~/.config/stream-recorder-monitor/config.json` when present,
//! otherwise defaults. `SRM_BACKEND` and `SRM_LOG_DIR` override the file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR_NAME: &str = "stream-recorder-monitor";
const CONFIG_FILE_NAME: &str = "config.json";

/// How to invoke the external recording backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Executable name or path
    pub program: String,
    /// Arguments placed before everything else in both modes
    pub extra_args: Vec<String>,
    /// Quality selector passed in recording mode
    pub quality: String,
    /// Flag that switches the backend into metadata mode
    pub json_flag: String,
    /// Flag that precedes the output file path in recording mode
    pub output_flag: String,
    pub username_flag: String,
    pub password_flag: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: "streamlink".to_string(),
            extra_args: Vec::new(),
            quality: "best".to_string(),
            json_flag: "--json".to_string(),
            output_flag: "--output".to_string(),
            username_flag: "--username".to_string(),
            password_flag: "--password".to_string(),
        }
    }
}

impl BackendConfig {
    /// Resolve the backend executable on PATH.
    pub fn locate(&self) -> Option<PathBuf> {
        which::which(&self.program).ok()
    }

    /// Whether the backend executable can be found.
    pub fn is_installed(&self) -> bool {
        self.locate().is_some()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecorderConfig {
    pub backend: BackendConfig,
    /// Interval between output-file size samples (milliseconds)
    pub poll_interval_ms: u64,
    /// Consecutive unchanged samples before a stall is reported
    pub stale_threshold: u32,
    /// Wait after SIGTERM before killing the backend (milliseconds)
    pub grace_period_ms: u64,
    /// Per-subscriber event buffer
    pub event_capacity: usize,
    /// Where the append-only session log lives; `None` disables it
    pub log_dir: Option<PathBuf>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            poll_interval_ms: 1000,
            stale_threshold: 5,
            grace_period_ms: 5000,
            event_capacity: 1024,
            log_dir: Self::config_dir().map(|d| d.join("logs")),
        }
    }
}

impl RecorderConfig {
    /// `~/.config/stream-recorder-monitor`
    pub fn config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".config").join(CONFIG_DIR_NAME))
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Load from the default location, apply env overrides and validate.
    pub fn auto_load() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(program) = std::env::var("SRM_BACKEND") {
            if !program.trim().is_empty() {
                self.backend.program = program;
            }
        }
        if let Ok(dir) = std::env::var("SRM_LOG_DIR") {
            self.log_dir = if dir.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(dir))
            };
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        if self.stale_threshold == 0 {
            bail!("stale_threshold must be greater than zero");
        }
        if self.event_capacity == 0 {
            bail!("event_capacity must be greater than zero");
        }
        if self.backend.program.trim().is_empty() {
            bail!("backend.program must not be empty");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}
