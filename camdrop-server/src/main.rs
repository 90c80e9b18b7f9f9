//! # Camdrop Server
//!
//! Watches an FTP upload tree where each first-level folder belongs to one
//! security camera, and feeds finished, valid, previously unseen images into
//! a bounded Redis queue for the detection workers.
//!
//! ## Architecture
//!
//! - `notify` watcher with per-path debounce
//! - Stability probe and full image decode before admission
//! - Redis for the queue, dead-letter queue, dedupe markers, and camera records

use std::path::PathBuf;

use anyhow::Context;
use camdrop_core::sanitize::redact_url;
use camdrop_server::infra::config::{ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use camdrop_server::infra::startup;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "camdrop-server")]
#[command(about = "Ingest FTP camera uploads into the detection queue")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    args: ConfigArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ConfigArgs {
    /// Path to the TOML configuration file
    #[arg(long, global = true, env = "CAMDROP_CONFIG")]
    config: Option<PathBuf>,

    /// Path to a .env file to load before reading the environment
    #[arg(long, global = true, env = "CAMDROP_ENV_FILE")]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch the upload root and admit uploads (default)
    Run,
    /// Print the effective configuration as TOML and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let ConfigLoad { mut config, warnings } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.args.config.clone(),
        env_file: cli.args.env_file.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    if let Some(Command::CheckConfig) = cli.command {
        for warning in &warnings {
            eprintln!("warning: {warning}");
        }
        config.redis_url = redact_url(&config.redis_url);
        let rendered =
            toml::to_string_pretty(&config).context("failed to render configuration")?;
        println!("{rendered}");
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,camdrop=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in &warnings {
        warn!("{warning}");
    }

    let service = startup::start(&config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    service.shutdown().await;
    Ok(())
}
