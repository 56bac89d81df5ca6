//! Dependency construction, registration and engine start.

use anyhow::Context;
use pa_config::AgentConfig;
use pa_core::{capabilities, ConfigGenerator, Supervisor, XrayApiClient};
use pa_engine::{Engine, Intervals};
use pa_panel::PanelClient;
use pa_types::RegisterRequest;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// A running agent: the engine plus its loop handles.
pub struct Agent {
    engine: Arc<Engine>,
    tasks: Vec<JoinHandle<()>>,
}

/// Wire the components, register with the Panel, run the initial sync
/// and spawn the reconciliation loops. Every failure here is fatal.
pub async fn start(cfg: AgentConfig) -> anyhow::Result<Agent> {
    let panel = Arc::new(
        PanelClient::new(
            &cfg.panel.url,
            &cfg.panel.api_prefix,
            &cfg.panel.token,
            cfg.http.timeout,
            cfg.http.retry_count,
        )
        .context("build panel client")?,
    );
    let rpc = XrayApiClient::new(cfg.xray.api_address.clone());
    let supervisor = Supervisor::new(
        &cfg.xray.binary_path,
        &cfg.xray.config_path,
        &cfg.xray.asset_path,
    );
    let generator = ConfigGenerator::new(&cfg.xray.config_path);

    let capabilities = capabilities::detect(&cfg.xray.binary_path).await;
    let request = RegisterRequest {
        hostname: pa_platform::hostname(),
        os: pa_platform::os_name().into(),
        arch: pa_platform::arch().into(),
        public_ip: pa_platform::public_ipv4(),
        xray_version: supervisor.version().await,
        capabilities: Some(capabilities),
    };
    let response = panel.register(&request).await.context("register with panel")?;
    info!(
        node_id = %response.node_id,
        node_name = %response.node_name,
        core_version = %request.xray_version,
        "registered with panel"
    );

    let intervals = Intervals::negotiate(&cfg.interval, &response);
    let engine = Engine::new(panel, rpc, supervisor, generator, intervals);
    engine.boot_sync().await.context("initial sync")?;

    let tasks = engine.spawn_loops();
    info!("panel agent started");
    Ok(Agent { engine, tasks })
}

impl Agent {
    /// Orderly stop: loops first, then a final counter flush, then the
    /// supervised core.
    pub async fn shutdown(self) {
        self.engine.shutdown(self.tasks).await;
    }
}
