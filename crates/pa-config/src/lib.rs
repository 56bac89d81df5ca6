//! Agent configuration.
//!
//! Layered the same way across deployments: built-in defaults, then an
//! optional YAML file, then environment variables. The file is searched
//! in `/etc/panel-agent` and the working directory when no explicit path
//! is given; a missing file is not an error so container deployments can
//! run on env vars alone.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub panel: PanelConfig,
    pub xray: XrayConfig,
    pub interval: IntervalConfig,
    pub http: HttpConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub url: String,
    pub token: String,
    pub api_prefix: String,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3001".into(),
            token: String::new(),
            api_prefix: "/api".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XrayConfig {
    pub binary_path: PathBuf,
    pub config_path: PathBuf,
    pub asset_path: PathBuf,
    pub api_address: String,
}

impl Default for XrayConfig {
    fn default() -> Self {
        Self {
            binary_path: "/usr/local/bin/xray".into(),
            config_path: "/etc/xray/config.json".into(),
            asset_path: "/usr/local/share/xray".into(),
            api_address: "127.0.0.1:10085".into(),
        }
    }
}

/// Loop cadences. The Panel may override any of these at register time;
/// a zero interval in the register response keeps the local value.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    #[serde(with = "humantime_serde")]
    pub config_poll: Duration,
    #[serde(with = "humantime_serde")]
    pub user_poll: Duration,
    #[serde(with = "humantime_serde")]
    pub traffic_report: Duration,
    #[serde(with = "humantime_serde")]
    pub status_report: Duration,
    #[serde(with = "humantime_serde")]
    pub alive_poll: Duration,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            config_poll: Duration::from_secs(30),
            user_poll: Duration::from_secs(30),
            traffic_report: Duration::from_secs(10),
            status_report: Duration::from_secs(10),
            alive_poll: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub retry_count: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_count: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration: defaults, then the YAML file (explicit path or
    /// searched), then environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match Self::locate(explicit) {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?
            }
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(p) = explicit {
            return Some(p.to_path_buf());
        }
        for dir in ["/etc/panel-agent", "."] {
            for name in ["config.yaml", "config.yml"] {
                let candidate = Path::new(dir).join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Apply `PANEL_AGENT_*` variables (dots become underscores) plus the
    /// legacy unprefixed names kept for existing deployments.
    fn apply_env(&mut self) {
        override_string(&mut self.panel.url, &["PANEL_AGENT_PANEL_URL", "PANEL_URL"]);
        override_string(&mut self.panel.token, &["PANEL_AGENT_PANEL_TOKEN", "NODE_TOKEN"]);
        override_string(&mut self.panel.api_prefix, &["PANEL_AGENT_PANEL_API_PREFIX"]);

        override_path(&mut self.xray.binary_path, &["PANEL_AGENT_XRAY_BINARY_PATH", "XRAY_BINARY_PATH"]);
        override_path(&mut self.xray.config_path, &["PANEL_AGENT_XRAY_CONFIG_PATH", "XRAY_CONFIG_PATH"]);
        override_path(&mut self.xray.asset_path, &["PANEL_AGENT_XRAY_ASSET_PATH", "XRAY_ASSET_PATH"]);
        override_string(&mut self.xray.api_address, &["PANEL_AGENT_XRAY_API_ADDRESS", "XRAY_API_ADDRESS"]);

        override_duration(&mut self.interval.config_poll, &["PANEL_AGENT_INTERVAL_CONFIG_POLL"]);
        override_duration(&mut self.interval.user_poll, &["PANEL_AGENT_INTERVAL_USER_POLL"]);
        override_duration(&mut self.interval.traffic_report, &["PANEL_AGENT_INTERVAL_TRAFFIC_REPORT"]);
        override_duration(&mut self.interval.status_report, &["PANEL_AGENT_INTERVAL_STATUS_REPORT"]);
        override_duration(&mut self.interval.alive_poll, &["PANEL_AGENT_INTERVAL_ALIVE_POLL"]);

        override_duration(&mut self.http.timeout, &["PANEL_AGENT_HTTP_TIMEOUT"]);
        if let Some(v) = first_env(&["PANEL_AGENT_HTTP_RETRY_COUNT"]) {
            match v.parse() {
                Ok(n) => self.http.retry_count = n,
                Err(_) => tracing::warn!(value = %v, "ignoring unparseable retry count from env"),
            }
        }

        override_string(&mut self.log.level, &["PANEL_AGENT_LOG_LEVEL", "LOG_LEVEL"]);
        if let Some(v) = first_env(&["PANEL_AGENT_LOG_FILE"]) {
            self.log.file = Some(PathBuf::from(v));
        }
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names.iter().find_map(|n| env::var(n).ok()).filter(|v| !v.is_empty())
}

fn override_string(slot: &mut String, names: &[&str]) {
    if let Some(v) = first_env(names) {
        *slot = v;
    }
}

fn override_path(slot: &mut PathBuf, names: &[&str]) {
    if let Some(v) = first_env(names) {
        *slot = PathBuf::from(v);
    }
}

fn override_duration(slot: &mut Duration, names: &[&str]) {
    if let Some(v) = first_env(names) {
        match humantime::parse_duration(&v) {
            Ok(d) => *slot = d,
            Err(_) => tracing::warn!(value = %v, "ignoring unparseable duration from env"),
        }
    }
}
