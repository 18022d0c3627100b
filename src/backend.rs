//! Backend command lines for metadata queries and recordings

use crate::config::BackendConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Login for streams that need one.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A fully resolved program + argument list.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl BackendCommand {
    /// `PROGRAM [extra] [credentials] --json URL`
    pub fn metadata(config: &BackendConfig, url: &str, credentials: Option<&Credentials>) -> Self {
        let mut args = Self::prefix(config, credentials);
        args.push(config.json_flag.clone());
        args.push(url.to_string());
        Self {
            program: config.program.clone(),
            args,
        }
    }

    /// `PROGRAM [extra] [credentials] URL QUALITY --output PATH`
    pub fn record(
        config: &BackendConfig,
        url: &str,
        credentials: Option<&Credentials>,
        output: &Path,
    ) -> Self {
        let mut args = Self::prefix(config, credentials);
        args.push(url.to_string());
        args.push(config.quality.clone());
        args.push(config.output_flag.clone());
        args.push(output.to_string_lossy().into_owned());
        Self {
            program: config.program.clone(),
            args,
        }
    }

    fn prefix(config: &BackendConfig, credentials: Option<&Credentials>) -> Vec<String> {
        let mut args = config.extra_args.clone();
        if let Some(creds) = credentials {
            args.push(config.username_flag.clone());
            args.push(creds.username.clone());
            args.push(config.password_flag.clone());
            args.push(creds.password.clone());
        }
        args
    }

    /// Command line for logs, with the password masked.
    pub fn display_redacted(&self, credentials: Option<&Credentials>) -> String {
        let mut parts = vec![self.program.clone()];
        for arg in &self.args {
            match credentials {
                Some(c) if !c.password.is_empty() && arg == &c.password => parts.push("***".to_string()),
                _ => parts.push(arg.clone()),
            }
        }
        parts.join(" ")
    }
}
