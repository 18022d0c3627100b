//! Probe command - resolve metadata without recording

use crate::config::RecorderConfig;
use crate::metadata::{derive_filename, Metadata, MetadataResolver};
use anyhow::{anyhow, Result};
use chrono::Local;
use clap::Args;
use serde::Serialize;

/// Probe command arguments
#[derive(Args)]
pub struct ProbeArgs {
    /// Stream URL
    pub url: String,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct ProbeOutput {
    pub url: String,
    pub filename: String,
    pub metadata: Metadata,
}

pub async fn handle_probe(args: ProbeArgs, config: &RecorderConfig) -> Result<()> {
    if !config.backend.is_installed() {
        return Err(anyhow!(
            "backend `{}` not found on PATH (set SRM_BACKEND or backend.program)",
            config.backend.program
        ));
    }

    let resolver = MetadataResolver::new(config.backend.clone());
    let metadata = resolver.resolve(&args.url, None).await?;
    let output = ProbeOutput {
        filename: derive_filename(&metadata, Local::now().naive_local()),
        url: args.url,
        metadata,
    };

    if args.json {
        println!("{}", super::format_output(&output));
    } else {
        println!("Author:   {}", output.metadata.author.as_deref().unwrap_or("unknown"));
        println!("Title:    {}", output.metadata.title.as_deref().unwrap_or("untitled"));
        println!("Filename: {}", output.filename);
    }
    Ok(())
}
