//! Node registration exchange.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub public_ip: String,
    pub xray_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

/// What the supervised core can do, detected at boot and advertised to
/// the Panel so it only schedules supported inbound kinds here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub core_type: String,
    pub version: String,
    pub protocols: Protocols,
    pub transports: Vec<String>,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Protocols {
    pub inbound: Vec<String>,
    pub outbound: Vec<String>,
}

/// Register response. Interval fields are seconds; zero means keep the
/// locally configured default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub config_poll_interval: u64,
    #[serde(default)]
    pub user_poll_interval: u64,
    #[serde(default)]
    pub traffic_report_interval: u64,
    #[serde(default)]
    pub status_report_interval: u64,
    #[serde(default)]
    pub alive_poll_interval: u64,
}
