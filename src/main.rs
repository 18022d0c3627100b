//! Stream Recorder Monitor CLI
//!
//! Records live streams through an external backend and reports their health.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stream_recorder_monitor::{
    cli::{self, ProbeArgs, RecordArgs},
    RecorderConfig,
};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "srm")]
#[command(about = "Stream Recorder Monitor - supervise live-stream recordings")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/stream-recorder-monitor/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one or more streams until they end or Ctrl+C
    Record(RecordArgs),
    /// Show stream metadata and the file name a recording would get
    Probe(ProbeArgs),
    /// Print the effective configuration
    Config {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<RecorderConfig> {
    match path {
        Some(path) => {
            let config = RecorderConfig::load_from(&path)?;
            config.validate()?;
            Ok(config)
        }
        None => RecorderConfig::auto_load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=debug srm record <url>
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stream_recorder_monitor=info,srm=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let args = Cli::parse();
    let config = load_config(args.config)?;

    match args.command {
        Commands::Record(record) => cli::handle_record(record, &config).await?,
        Commands::Probe(probe) => cli::handle_probe(probe, &config).await?,
        Commands::Config { json } => {
            if json {
                println!("{}", cli::format_output(&config));
            } else {
                println!("Backend:         {}", config.backend.program);
                match config.backend.locate() {
                    Some(path) => println!("  found at       {}", path.display()),
                    None => println!("  not found on PATH"),
                }
                println!("Quality:         {}", config.backend.quality);
                println!("Poll interval:   {} ms", config.poll_interval_ms);
                println!("Stall threshold: {} polls", config.stale_threshold);
                println!("Grace period:    {} ms", config.grace_period_ms);
                match &config.log_dir {
                    Some(dir) => println!("Session log:     {}", dir.display()),
                    None => println!("Session log:     disabled"),
                }
            }
        }
    }

    Ok(())
}
