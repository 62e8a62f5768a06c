//! Sentinel Daemon - self-healing host monitor
//!
//! Watches services, memory and DNS, diagnoses anomalies and applies
//! whitelisted fixes.

use anyhow::Result;
use clap::Parser;
use sentinel_common::SentinelConfig;
use sentineld::Daemon;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sentineld")]
#[command(about = "Self-healing host monitor", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: /etc/sentinel/config.toml if present)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Log intended commands instead of executing them
    #[arg(long)]
    dry_run: bool,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("Sentinel Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = SentinelConfig::load(cli.config.as_deref())?;
    if cli.dry_run {
        config.auto_fix = false;
    }

    let mut daemon = Daemon::from_config(config)?;

    if cli.once {
        let report = daemon.run_once().await;
        info!(
            "Single tick done: {} services checked, {} remediation(s)",
            report.services_checked,
            report.remediations.len()
        );
        return Ok(());
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };
    daemon.run(shutdown).await?;

    info!("Shutting down gracefully");
    Ok(())
}
