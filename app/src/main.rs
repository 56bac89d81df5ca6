//! panel-agent entrypoint.
//!
//! Boot order matters: configuration first (logging level may come from
//! it), then logging, then registration and initial sync. Boot failures
//! exit non-zero; after the loops are running the agent only terminates
//! on SIGINT/SIGTERM.

mod bootstrap;
mod cli;
mod logging;

use anyhow::Context;
use clap::Parser;
use pa_config::AgentConfig;
use tracing::info;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("panel-agent: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: cli::Args) -> anyhow::Result<()> {
    let cfg = AgentConfig::load(args.config.as_deref()).context("load configuration")?;
    logging::init(&cfg.log).context("initialize logging")?;

    info!(version = env!("CARGO_PKG_VERSION"), "panel agent starting");

    let agent = bootstrap::start(cfg).await?;

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    agent.shutdown().await;
    info!("panel agent stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "install SIGTERM handler failed");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
