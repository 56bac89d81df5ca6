//! Declarative node configuration as issued by the Panel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Desired node state pulled from the Panel.
///
/// `dns` and `policy` are opaque blobs passed through into the core
/// configuration untouched. The entity tag is carried here so a cached
/// copy knows which server revision it reflects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub inbounds: Vec<Inbound>,
    #[serde(default)]
    pub outbounds: Vec<Outbound>,
    #[serde(default)]
    pub routing: Option<Routing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Value>,
}

impl NodeConfig {
    /// Tags of all declared inbounds, in declaration order.
    pub fn inbound_tags(&self) -> Vec<String> {
        self.inbounds.iter().map(|i| i.tag.clone()).collect()
    }
}

/// A single core ingress endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbound {
    pub tag: String,
    pub protocol: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub listen: String,
    #[serde(default)]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sniffing: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocate: Option<Value>,
}

/// A single core egress endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outbound {
    pub tag: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_through: Option<String>,
    #[serde(default)]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux: Option<Value>,
}

/// Core routing block. Rules stay opaque; the materializer only inspects
/// them far enough to drop entries without a target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Routing {
    #[serde(default)]
    pub domain_strategy: String,
    #[serde(default)]
    pub rules: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balancers: Option<Vec<Value>>,
}
