//! arenad — the arena daemon.
//!
//! Single binary that assembles the orchestrator:
//! - Host registry (from `arena.toml`)
//! - Instance ledger (redb)
//! - Orchestration engine (one Docker client per host)
//! - Reaper
//! - REST API
//!
//! # Usage
//!
//! ```text
//! arenad --config /etc/arena/arena.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use arena_core::{ArenaConfig, HostRegistry};
use arena_engine::Engine;
use arena_ledger::Ledger;
use arena_reaper::{Reaper, ReaperSettings};

#[derive(Parser)]
#[command(name = "arenad", about = "Arena instance orchestrator daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "arena.toml")]
    config: PathBuf,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info,arena=debug")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    info!(config = ?cli.config, "arena daemon starting");
    let config = ArenaConfig::from_file(&cli.config)?;

    // ── Initialize subsystems ──────────────────────────────────

    let registry = HostRegistry::new(config.hosts.clone())?;
    info!(hosts = registry.list().len(), "host registry loaded");

    let ledger = Ledger::open(&config.db_path)?;
    info!(path = ?config.db_path, "ledger opened");

    // Leftover Starting/Stopping records from a previous run are picked up
    // by the reaper's first cycle.
    let engine = Arc::new(Engine::with_docker(registry, ledger));

    let reaper_handle =
        Reaper::new(engine.clone(), ReaperSettings::from(&config.reaper)).spawn();

    // ── Start API server ───────────────────────────────────────

    let router = arena_api::build_router(engine);
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!(addr = %config.listen, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    reaper_handle.shutdown();
    info!("arena daemon stopped");
    Ok(())
}
