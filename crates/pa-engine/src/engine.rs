//! Engine wiring and the five reconciliation loops.

use crate::diff::{diff_memberships, diff_rate_limits, MembershipDiff, RateLimitDiff};
use crate::state::SharedState;
use parking_lot::Mutex;
use pa_config::IntervalConfig;
use pa_core::{ConfigGenerator, CoreError, StatsAggregator, Supervisor, TrafficSnapshot, XrayApiClient};
use pa_panel::{PanelClient, PanelError};
use pa_types::{RegisterResponse, StatusReport, TrafficReport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Failures that abort the boot sequence; the process exits non-zero.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error(transparent)]
    Panel(#[from] PanelError),
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Negotiated loop cadences: local defaults overridden by any non-zero
/// interval the Panel returned at register time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub config_poll: Duration,
    pub user_poll: Duration,
    pub traffic_report: Duration,
    pub status_report: Duration,
    pub alive_poll: Duration,
}

impl Intervals {
    pub fn negotiate(defaults: &IntervalConfig, resp: &RegisterResponse) -> Self {
        fn pick(local: Duration, remote_secs: u64) -> Duration {
            if remote_secs > 0 {
                Duration::from_secs(remote_secs)
            } else {
                local
            }
        }
        Self {
            config_poll: pick(defaults.config_poll, resp.config_poll_interval),
            user_poll: pick(defaults.user_poll, resp.user_poll_interval),
            traffic_report: pick(defaults.traffic_report, resp.traffic_report_interval),
            status_report: pick(defaults.status_report, resp.status_report_interval),
            alive_poll: pick(defaults.alive_poll, resp.alive_poll_interval),
        }
    }
}

/// The reconciliation engine. Owns the shared agent state and drives
/// the periodic loops from boot to shutdown.
pub struct Engine {
    panel: Arc<PanelClient>,
    rpc: XrayApiClient,
    supervisor: Supervisor,
    generator: ConfigGenerator,
    state: SharedState,
    aggregator: Mutex<StatsAggregator>,
    intervals: Intervals,
    started_at: Instant,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        panel: Arc<PanelClient>,
        rpc: XrayApiClient,
        supervisor: Supervisor,
        generator: ConfigGenerator,
        intervals: Intervals,
    ) -> Arc<Self> {
        Arc::new(Self {
            panel,
            rpc,
            supervisor,
            generator,
            state: SharedState::new(),
            aggregator: Mutex::new(StatsAggregator::new()),
            intervals,
            started_at: Instant::now(),
            cancel: CancellationToken::new(),
        })
    }

    /// Initial sync: pull config and users, materialize the core
    /// configuration, start the core, and report egress addresses.
    /// Any failure here is fatal for the process.
    pub async fn boot_sync(&self) -> Result<(), BootError> {
        if let Some(config) = self.panel.get_config().await? {
            info!(version = %config.version, "config synced from panel");
            self.state.set_node_config(config);
        }
        if let Some(list) = self.panel.get_users().await? {
            info!(
                users = list.users.len(),
                rate_limits = list.rate_limits.len(),
                "users synced from panel"
            );
            self.state.swap_users(list.users, list.rate_limits);
        }

        if let Some(node) = self.state.node_config() {
            self.generator.materialize(&node, &self.state.users())?;
        }
        self.supervisor.start().await?;

        let ips = pa_platform::egress_ips();
        if !ips.is_empty() {
            match self.panel.report_egress_ips(&ips).await {
                Ok(()) => info!(count = ips.len(), "reported egress ips"),
                Err(e) => error!(error = %e, "failed to report egress ips"),
            }
        }
        Ok(())
    }

    /// Spawn the five loops. Ticks within one loop are serialized; the
    /// handles are joined again at shutdown.
    pub fn spawn_loops(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(self).config_loop()),
            tokio::spawn(Arc::clone(self).user_loop()),
            tokio::spawn(Arc::clone(self).traffic_loop()),
            tokio::spawn(Arc::clone(self).status_loop()),
            tokio::spawn(Arc::clone(self).alive_loop()),
        ]
    }

    /// Orderly shutdown: cancel the loops, join them, flush pending
    /// counters, then stop the core.
    pub async fn shutdown(&self, tasks: Vec<JoinHandle<()>>) {
        info!("stopping reconciliation loops");
        self.cancel.cancel();
        for task in tasks {
            let _ = task.await;
        }
        self.flush_traffic("final flush").await;
        if let Err(e) = self.supervisor.stop().await {
            error!(error = %e, "failed to stop core during shutdown");
        }
    }

    // ---- config loop -------------------------------------------------

    async fn config_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.intervals.config_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // boot already synced
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => self.config_tick().await,
            }
        }
    }

    /// Topology changes cannot be hot-applied, so a changed config
    /// regenerates the on-disk document and restarts the core. Pending
    /// counters are flushed first: the new core process starts from
    /// zero and anything unflushed would be lost.
    async fn config_tick(&self) {
        let config = match self.panel.get_config().await {
            Ok(Some(config)) => config,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "failed to sync config");
                return;
            }
        };

        info!(version = %config.version, "config synced from panel");
        self.state.set_node_config(config);

        let Some(node) = self.state.node_config() else {
            return;
        };
        if let Err(e) = self.generator.materialize(&node, &self.state.users()) {
            error!(error = %e, "failed to generate core config");
            return;
        }

        self.flush_traffic("flush before restart").await;

        if let Err(e) = self.supervisor.restart().await {
            error!(error = %e, "failed to restart core");
        }
    }

    // ---- user loop ---------------------------------------------------

    async fn user_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.intervals.user_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => self.user_tick().await,
            }
        }
    }

    /// Prefer hot reconciliation over the management RPC; fall back to
    /// a full regenerate-and-restart only when the RPC is unreachable.
    async fn user_tick(&self) {
        let list = match self.panel.get_users().await {
            Ok(Some(list)) => list,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "failed to sync users");
                return;
            }
        };

        info!(
            users = list.users.len(),
            rate_limits = list.rate_limits.len(),
            "users synced from panel"
        );
        let (old_users, old_limits) = self.state.swap_users(list.users, list.rate_limits);
        let new_users = self.state.users();

        let membership = diff_memberships(&old_users, &new_users);
        if let Err(e) = self.apply_membership(&membership).await {
            warn!(error = %e, "hot user sync failed, falling back to restart");
            let Some(node) = self.state.node_config() else {
                return;
            };
            if let Err(e) = self.generator.materialize(&node, &new_users) {
                error!(error = %e, "failed to generate core config");
                return;
            }
            self.flush_traffic("flush before restart").await;
            if let Err(e) = self.supervisor.restart().await {
                error!(error = %e, "failed to restart core");
            }
            return;
        }

        let limits = diff_rate_limits(&old_limits, &self.state.rate_limits());
        self.apply_rate_limits(&limits).await;
    }

    /// Apply a membership plan. Individual failures are logged and do
    /// not abort siblings; the plan as a whole fails only when every
    /// attempted call died on connect, which means the management RPC
    /// is down and only a restart can converge.
    async fn apply_membership(&self, diff: &MembershipDiff) -> Result<(), CoreError> {
        let attempted = diff.removed.len() + diff.added.len();
        if attempted == 0 {
            return Ok(());
        }

        let mut failed = 0usize;
        let mut last_connect: Option<CoreError> = None;

        for (tag, email) in &diff.removed {
            match self.rpc.remove_user(tag, email).await {
                Ok(()) => {}
                Err(e @ CoreError::Connect { .. }) => {
                    failed += 1;
                    last_connect = Some(e);
                }
                Err(e) => {
                    failed += 1;
                    debug!(email, inbound = %tag, error = %e, "failed to remove user");
                }
            }
        }

        for (tag, user) in &diff.added {
            match self.rpc.add_user(tag, user).await {
                Ok(()) => {}
                Err(e @ CoreError::Connect { .. }) => {
                    failed += 1;
                    last_connect = Some(e);
                }
                Err(e) => {
                    failed += 1;
                    warn!(email = %user.email, inbound = %tag, error = %e, "failed to add user");
                }
            }
        }

        match last_connect {
            Some(err) if failed == attempted => Err(err),
            _ => Ok(()),
        }
    }

    async fn apply_rate_limits(&self, diff: &RateLimitDiff) {
        for email in &diff.removed {
            if let Err(e) = self.rpc.remove_user_rate_limit(email).await {
                debug!(email, error = %e, "failed to remove rate limit");
            }
        }
        for limit in &diff.set {
            if let Err(e) = self
                .rpc
                .set_user_rate_limit(
                    &limit.email,
                    limit.upload_bytes_per_sec,
                    limit.download_bytes_per_sec,
                )
                .await
            {
                warn!(email = %limit.email, error = %e, "failed to set rate limit");
            }
        }
        if !diff.is_empty() {
            debug!(set = diff.set.len(), removed = diff.removed.len(), "rate limits synced");
        }
    }

    // ---- traffic loop ------------------------------------------------

    async fn traffic_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.intervals.traffic_report);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => self.flush_traffic("traffic reported").await,
            }
        }
    }

    /// One counter poll with reset, reported upstream when non-empty.
    /// Every poll resets so bytes are counted exactly once on the core
    /// side; a failed upstream report after a successful reset loses
    /// that window, which is the accepted trade-off.
    async fn flush_traffic(&self, label: &'static str) {
        let raw = match self.rpc.query_stats("", true).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "failed to collect traffic from core");
                return;
            }
        };
        let snapshot = self.aggregator.lock().ingest(&raw);
        let reports = traffic_reports(&snapshot);
        if reports.is_empty() {
            return;
        }
        match self.panel.report_traffic(&reports).await {
            Ok(()) => debug!(count = reports.len(), "{label}"),
            Err(e) => error!(error = %e, "failed to report traffic"),
        }
    }

    // ---- status loop -------------------------------------------------

    async fn status_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.intervals.status_report);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => self.status_tick().await,
            }
        }
    }

    async fn status_tick(&self) {
        let mut online = 0u32;
        for email in self.state.user_emails() {
            match self.rpc.get_user_online_count(&email).await {
                Ok(n) if n > 0 => online += 1,
                Ok(_) => {}
                Err(e) => debug!(email, error = %e, "online count query failed"),
            }
        }

        let status = StatusReport {
            cpu_usage: pa_platform::cpu_usage(),
            memory_usage: pa_platform::memory_usage(),
            disk_usage: pa_platform::disk_usage(),
            uptime: self.started_at.elapsed().as_secs() as i64,
            online_users: online,
            xray_version: Some(self.supervisor.version().await),
        };
        if let Err(e) = self.panel.report_status(&status).await {
            error!(error = %e, "failed to report status");
        }
    }

    // ---- alive loop --------------------------------------------------

    async fn alive_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.intervals.alive_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => self.alive_tick().await,
            }
        }
    }

    /// Report online sessions and enforce the Panel's kick verdicts by
    /// removing each named user from every inbound of the current
    /// configuration.
    async fn alive_tick(&self) {
        let emails = self.state.user_emails();
        let alive = match self.rpc.get_online_users(&emails).await {
            Ok(alive) => alive,
            Err(e) => {
                debug!(error = %e, "failed to collect online users");
                return;
            }
        };

        let resp = match self.panel.report_alive(&alive).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(error = %e, "failed to report alive users");
                return;
            }
        };

        if resp.kick_users.is_empty() {
            return;
        }
        info!(users = ?resp.kick_users, "kicking users over device limit");
        let inbound_tags = self.state.inbound_tags();
        for email in &resp.kick_users {
            if let Err(e) = self.rpc.kick_user(email, &inbound_tags).await {
                warn!(email, error = %e, "failed to kick user");
            }
        }
    }
}

/// Upstream wire shape for one snapshot: the per-user byte counts.
fn traffic_reports(snapshot: &TrafficSnapshot) -> Vec<TrafficReport> {
    snapshot
        .users
        .iter()
        .map(|u| TrafficReport {
            email: u.email.clone(),
            upload: u.upload,
            download: u.download,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pa_core::UserTraffic;

    #[test]
    fn zero_register_intervals_keep_defaults() {
        let defaults = IntervalConfig::default();
        let resp = RegisterResponse::default();
        let intervals = Intervals::negotiate(&defaults, &resp);
        assert_eq!(intervals.config_poll, Duration::from_secs(30));
        assert_eq!(intervals.traffic_report, Duration::from_secs(10));
        assert_eq!(intervals.alive_poll, Duration::from_secs(60));
    }

    #[test]
    fn nonzero_register_intervals_override() {
        let defaults = IntervalConfig::default();
        let resp = RegisterResponse {
            config_poll_interval: 120,
            traffic_report_interval: 5,
            ..Default::default()
        };
        let intervals = Intervals::negotiate(&defaults, &resp);
        assert_eq!(intervals.config_poll, Duration::from_secs(120));
        assert_eq!(intervals.traffic_report, Duration::from_secs(5));
        // Untouched cadences keep their defaults.
        assert_eq!(intervals.user_poll, Duration::from_secs(30));
    }

    #[test]
    fn traffic_reports_carry_byte_counts() {
        let snapshot = TrafficSnapshot {
            users: vec![UserTraffic {
                email: "a@x".into(),
                upload: 1000,
                download: 0,
                upload_rate: 100,
                download_rate: 0,
            }],
            ..Default::default()
        };
        let reports = traffic_reports(&snapshot);
        assert_eq!(
            reports,
            vec![TrafficReport {
                email: "a@x".into(),
                upload: 1000,
                download: 0
            }]
        );
    }
}
