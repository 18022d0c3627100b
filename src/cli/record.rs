//! Record command - supervise one recording per URL until done or interrupted

use crate::backend::Credentials;
use crate::config::RecorderConfig;
use crate::session::SessionState;
use crate::supervisor::Supervisor;
use anyhow::{anyhow, bail, Result};
use clap::Args;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{info, warn};

const LOG_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Record command arguments
#[derive(Args)]
pub struct RecordArgs {
    /// Stream URLs, one session each
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Output directory (default: current directory)
    #[arg(long, short)]
    pub output_dir: Option<String>,

    /// Login name passed to the backend
    #[arg(long, short)]
    pub username: Option<String>,

    /// Password; prompted for when a username is given without one
    #[arg(long, requires = "username")]
    pub password: Option<String>,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

pub async fn handle_record(args: RecordArgs, config: &RecorderConfig) -> Result<()> {
    let output_dir = match args.output_dir.as_deref() {
        Some(dir) => super::expand_home(dir),
        None => std::env::current_dir()?,
    };

    let credentials = match (args.username, args.password) {
        (Some(username), Some(password)) => Some(Credentials::new(username, password)),
        (Some(username), None) => {
            let password = dialoguer::Password::new()
                .with_prompt(format!("Password for {}", username))
                .interact()
                .map_err(|e| anyhow!("failed to read password: {}", e))?;
            Some(Credentials::new(username, password))
        }
        _ => None,
    };

    if !config.backend.is_installed() {
        warn!("backend `{}` not found on PATH, sessions will fail to start", config.backend.program);
    }

    let supervisor = Supervisor::new(config);
    let log_task = config.log_dir.as_deref().map(|dir| supervisor.attach_session_log(dir));
    let mut events = supervisor.subscribe();

    for url in &args.urls {
        if let Err(e) = supervisor.start(url, output_dir.clone(), credentials.clone()) {
            warn!(url = %url, "not started: {}", e);
        }
    }
    info!("recording into {}, press Ctrl+C to stop", output_dir.display());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while supervisor.active_count() > 0 {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", super::format_event(&event, args.json)),
                Err(RecvError::Lagged(skipped)) => warn!("{} events dropped", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let results = supervisor.shutdown_all().await;
    loop {
        match events.try_recv() {
            Ok(event) => println!("{}", super::format_event(&event, args.json)),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    if !args.json {
        println!();
        for snapshot in supervisor.list() {
            println!("{}", super::format_snapshot(&snapshot));
        }
    }

    // the log task ends once every bus sender is gone
    drop(supervisor);
    if let Some(task) = log_task {
        if tokio::time::timeout(LOG_FLUSH_TIMEOUT, task).await.is_err() {
            warn!("session log did not flush in time");
        }
    }

    let failed = results.iter().filter(|(_, s)| *s == SessionState::Failed).count();
    if failed > 0 {
        bail!("{} of {} session(s) failed", failed, results.len());
    }
    Ok(())
}
