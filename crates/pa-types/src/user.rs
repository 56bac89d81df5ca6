//! User records and the implicit credential-to-protocol mapping.

use crate::ContractError;
use serde::{Deserialize, Serialize};

/// The Panel's user list response, with its entity tag and the rate-limit
/// set that rides along.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserList {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub rate_limits: Vec<RateLimit>,
}

/// One user as the Panel declares it. Email is the unique identifier
/// within a node; the credential tuple decides the protocol (see
/// [`User::protocol`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub alter_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub inbound_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_tag: Option<String>,
    #[serde(default)]
    pub total_bytes: i64,
    #[serde(default)]
    pub used_bytes: i64,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default)]
    pub upload_limit: i64,
    #[serde(default)]
    pub download_limit: i64,
    #[serde(default)]
    pub device_limit: u32,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// Protocols a user credential tuple can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserProtocol {
    Vless,
    Vmess,
    Trojan,
    Shadowsocks,
}

impl User {
    /// Derive the protocol from the credential tuple.
    ///
    /// UUID plus flow means vless, UUID alone vmess, password plus cipher
    /// method shadowsocks, password alone trojan. A record with neither
    /// credential is a contract violation and is skipped by callers.
    pub fn protocol(&self) -> Result<UserProtocol, ContractError> {
        if self.uuid.as_deref().is_some_and(|u| !u.is_empty()) {
            if self.flow.as_deref().is_some_and(|f| !f.is_empty()) {
                return Ok(UserProtocol::Vless);
            }
            return Ok(UserProtocol::Vmess);
        }
        if self.password.as_deref().is_some_and(|p| !p.is_empty()) {
            if self.method.as_deref().is_some_and(|m| !m.is_empty()) {
                return Ok(UserProtocol::Shadowsocks);
            }
            return Ok(UserProtocol::Trojan);
        }
        Err(ContractError::MissingCredentials(self.email.clone()))
    }

    /// Whether this user is declared a member of `tag`.
    pub fn is_member_of(&self, tag: &str) -> bool {
        self.inbound_tags.iter().any(|t| t == tag)
    }
}

/// Per-user upload/download caps in bytes per second. Zero is unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub email: String,
    #[serde(default)]
    pub upload_bytes_per_sec: i64,
    #[serde(default)]
    pub download_bytes_per_sec: i64,
}
