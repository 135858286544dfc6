//! parley: batch conversation runs against Open Chat Studio experiments.
//!
//! Reads input rows as JSON Lines, drives each conversation through the
//! engine and writes one output row per exchange.

mod cli;
mod commands;
mod export;
mod io;

use anyhow::{Context, Result};
use clap::Parser;
use parley_core::service::ChatService;

use parley_settings::{load_settings, load_settings_from_path};
use parley_telemetry::{init_telemetry, LogFormat, TelemetryConfig};

use crate::cli::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        module_levels: Vec::new(),
        format: if cli.log_json {
            LogFormat::Json
        } else {
            LogFormat::Text
        },
    })
    .context("failed to initialize logging")?;

    let mut settings = match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings: {}", path.display()))?,
        None => load_settings().context("failed to load settings")?,
    };
    cli.command.apply_to(&mut settings);

    let mode = cli.command.mode();
    let client = commands::connect(&settings)?;
    tracing::info!(mode, service = client.name(), "starting");

    let outcome = commands::dispatch(cli.command, settings, client.clone()).await;
    tracing::info!(mode, retries = client.total_retries(), ok = outcome.is_ok(), "finished");
    outcome
}
