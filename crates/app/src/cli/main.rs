//! dutkit CLI

mod commands;

use anyhow::{Context as _, Result};
use clap::Parser;
use commands::{Commands, Context};
use dutkit_core::domain::config::ConfigManager;
use dutkit_core::domain::poll::CancelToken;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dutkit")]
#[command(about = "Audio, system and network helpers for ChromeOS devices under test", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ~/.config/dutkit/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use an in-memory audio server seeded with a laptop node set
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let manager = match cli.config {
        Some(path) => ConfigManager::for_file(path),
        None => ConfigManager::new(ConfigManager::default_config_dir()?),
    };
    let config = manager.load().await;
    tracing::debug!(path = %manager.config_path().display(), "Configuration ready");

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling pending waits");
            on_signal.cancel();
        }
    });

    let ctx = Context {
        config,
        simulate: cli.simulate,
        cancel,
    };
    let command = cli.command;
    tokio::task::spawn_blocking(move || commands::run(command, &ctx))
        .await
        .context("command task panicked")?
}
