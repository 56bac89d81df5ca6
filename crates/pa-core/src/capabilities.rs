//! Boot-time detection of what the supervised core supports.
//!
//! The Panel uses this to avoid scheduling inbound kinds the node
//! cannot serve. Protocol and transport sets are fixed per core family;
//! features are gated on the parsed version.

use pa_types::{Capabilities, Protocols};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tokio::process::Command;

const CORE_TYPE: &str = "xray";

/// Detect the core's capabilities, falling back to version `unknown`
/// when the binary cannot be executed.
pub async fn detect(binary: &Path) -> Capabilities {
    let version = match Command::new(binary).arg("version").output().await {
        Ok(out) if out.status.success() => {
            parse_version(&String::from_utf8_lossy(&out.stdout)).unwrap_or_else(|| "unknown".into())
        }
        _ => "unknown".into(),
    };

    Capabilities {
        core_type: CORE_TYPE.into(),
        features: features_for(&version),
        version,
        protocols: protocols(),
        transports: transports(),
    }
}

/// Extract `X.Y.Z` from output like `Xray 1.8.4 (Xray, Penetrates Everything.)`.
pub fn parse_version(output: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"Xray\s+(\d+\.\d+\.\d+)").expect("static pattern"));
    re.captures(output).map(|c| c[1].to_string())
}

fn protocols() -> Protocols {
    Protocols {
        inbound: vec![
            "vless".into(),
            "vmess".into(),
            "trojan".into(),
            "shadowsocks".into(),
            "socks".into(),
            "http".into(),
            "dokodemo-door".into(),
        ],
        outbound: vec![
            "freedom".into(),
            "blackhole".into(),
            "dns".into(),
            "vless".into(),
            "vmess".into(),
            "trojan".into(),
            "shadowsocks".into(),
            "socks".into(),
            "http".into(),
            "wireguard".into(),
            "loopback".into(),
        ],
    }
}

fn transports() -> Vec<String> {
    ["tcp", "ws", "grpc", "h2", "quic", "kcp", "httpupgrade"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn features_for(version: &str) -> Vec<String> {
    let mut features: Vec<String> = ["sniffing", "fallback", "mux", "stats"]
        .into_iter()
        .map(String::from)
        .collect();
    if at_least(version, (1, 4, 0)) {
        features.push("xtls-vision".into());
    }
    if at_least(version, (1, 8, 0)) {
        features.push("reality".into());
    }
    if at_least(version, (1, 8, 3)) {
        features.push("fragment".into());
    }
    features
}

fn at_least(version: &str, min: (u32, u32, u32)) -> bool {
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let have = (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    );
    have >= min
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parses_from_banner() {
        let banner = "Xray 1.8.4 (Xray, Penetrates Everything.) Custom (go1.21.0 linux/amd64)";
        assert_eq!(parse_version(banner).unwrap(), "1.8.4");
        assert!(parse_version("sing-box version 1.9.0").is_none());
    }

    #[test]
    fn features_gate_on_version() {
        let old = features_for("1.3.1");
        assert!(!old.contains(&"xtls-vision".to_string()));
        assert!(!old.contains(&"reality".to_string()));

        let mid = features_for("1.7.5");
        assert!(mid.contains(&"xtls-vision".to_string()));
        assert!(!mid.contains(&"reality".to_string()));

        let new = features_for("1.8.3");
        assert!(new.contains(&"reality".to_string()));
        assert!(new.contains(&"fragment".to_string()));

        // Unknown versions get only the baseline features.
        assert_eq!(features_for("unknown").len(), 4);
    }

    #[test]
    fn version_comparison() {
        assert!(at_least("1.8.4", (1, 8, 3)));
        assert!(at_least("2.0.0", (1, 8, 3)));
        assert!(!at_least("1.8.2", (1, 8, 3)));
        assert!(!at_least("unknown", (0, 0, 1)));
    }
}
