use clap::Parser;
use std::path::PathBuf;

/// Node agent for the proxy-service control plane.
#[derive(Parser, Debug)]
#[command(name = "panel-agent", version)]
pub struct Args {
    /// Path to the agent configuration file. Without it the agent
    /// searches /etc/panel-agent and the working directory, then falls
    /// back to environment variables.
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,
}
