//! Telemetry shapes pushed upstream to the Panel.

use serde::{Deserialize, Serialize};

/// Per-user traffic accrued since the previous (counter-resetting) poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficReport {
    pub email: String,
    pub upload: i64,
    pub download: i64,
}

/// Node health snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub uptime: i64,
    pub online_users: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xray_version: Option<String>,
}

/// One online session entry for device-limit enforcement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliveUser {
    pub email: String,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// Panel's answer to an alive report: which users to disconnect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliveResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub kick_users: Vec<String>,
}

/// One egress address of the node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressIp {
    pub ip: String,
    /// Address family, 4 or 6.
    pub version: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asn: Option<String>,
    pub is_active: bool,
}
