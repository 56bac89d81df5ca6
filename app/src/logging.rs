//! Tracing setup driven by the agent's log configuration.

use anyhow::Context;
use pa_config::LogConfig;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. The configured level acts as the
/// default filter and accepts full `RUST_LOG`-style directives; an
/// optional file sink replaces stderr.
pub fn init(cfg: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&cfg.level)
        .with_context(|| format!("invalid log level {:?}", cfg.level))?;

    match &cfg.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
