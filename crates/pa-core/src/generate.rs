//! Materializes the declarative Panel state into the core's on-disk
//! configuration.
//!
//! The output document has a fixed top-level shape (log, api, stats,
//! policy, dns, inbounds, outbounds, routing) and a handful of
//! deterministic transformations whose ordering is load-bearing: the
//! api inbound sits at index 0, the `direct` outbound is the core's
//! default route and must come first, the synthesized `api` blackhole
//! second, and user-declared outbounds follow deduplicated by tag.

use crate::CoreError;
use pa_types::{Inbound, NodeConfig, Outbound, Routing, User};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const API_INBOUND_TAG: &str = "api-inbound";
pub const API_OUTBOUND_TAG: &str = "api";
pub const DIRECT_OUTBOUND_TAG: &str = "direct";
const API_LISTEN: &str = "127.0.0.1";
const API_PORT: u16 = 10085;

/// Full core configuration document.
#[derive(Debug, Serialize)]
pub struct CoreConfig {
    pub log: CoreLog,
    pub api: CoreApi,
    pub stats: Map<String, Value>,
    pub policy: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<Value>,
    pub inbounds: Vec<Value>,
    pub outbounds: Vec<Outbound>,
    pub routing: Routing,
}

#[derive(Debug, Serialize)]
pub struct CoreLog {
    pub loglevel: String,
}

#[derive(Debug, Serialize)]
pub struct CoreApi {
    pub tag: String,
    pub services: Vec<String>,
}

/// Generates and writes the core configuration file.
#[derive(Debug, Clone)]
pub struct ConfigGenerator {
    config_path: PathBuf,
}

impl ConfigGenerator {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply the materialization transforms; pure with respect to disk.
    pub fn generate(&self, node: &NodeConfig, users: &[User]) -> CoreConfig {
        let policy = node.policy.clone().unwrap_or_else(default_policy);
        let inbounds = build_inbounds(&node.inbounds, users);
        let routing = build_routing(node.routing.clone());
        let outbounds = build_outbounds(&node.outbounds);

        CoreConfig {
            log: CoreLog {
                loglevel: "warning".into(),
            },
            api: CoreApi {
                tag: API_OUTBOUND_TAG.into(),
                services: vec!["HandlerService".into(), "StatsService".into()],
            },
            stats: Map::new(),
            policy,
            dns: node.dns.clone(),
            inbounds,
            outbounds,
            routing,
        }
    }

    /// Serialize and replace the file on disk (0644). The write goes to
    /// a temp file in the target directory first and is renamed into
    /// place, so the core never sees a half-written document.
    pub fn write(&self, config: &CoreConfig) -> Result<(), CoreError> {
        let data = serde_json::to_vec_pretty(config)?;
        let dir = self
            .config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let write = || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            use std::io::Write;
            tmp.write_all(&data)?;
            let file = tmp.persist(&self.config_path).map_err(|e| e.error)?;
            drop(file);
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&self.config_path, std::fs::Permissions::from_mode(0o644))?;
            }
            Ok(())
        };
        write().map_err(|source| CoreError::Write {
            path: self.config_path.clone(),
            source,
        })?;
        debug!(path = %self.config_path.display(), bytes = data.len(), "core config written");
        Ok(())
    }

    /// Generate and write in one step.
    pub fn materialize(&self, node: &NodeConfig, users: &[User]) -> Result<(), CoreError> {
        self.write(&self.generate(node, users))
    }
}

/// Per-level user counters plus system-wide inbound/outbound counters.
/// Without this block the stats service would have nothing to report.
fn default_policy() -> Value {
    json!({
        "levels": {
            "0": {
                "statsUserUplink": true,
                "statsUserDownlink": true,
                "statsUserOnline": true
            }
        },
        "system": {
            "statsInboundUplink": true,
            "statsInboundDownlink": true,
            "statsOutboundUplink": true,
            "statsOutboundDownlink": true
        }
    })
}

fn build_inbounds(inbounds: &[Inbound], users: &[User]) -> Vec<Value> {
    let mut result = Vec::with_capacity(inbounds.len() + 1);
    result.push(json!({
        "tag": API_INBOUND_TAG,
        "listen": API_LISTEN,
        "port": API_PORT,
        "protocol": "dokodemo-door",
        "settings": { "address": API_LISTEN }
    }));

    for inbound in inbounds {
        let members: Vec<&User> = users.iter().filter(|u| u.is_member_of(&inbound.tag)).collect();
        let mut settings = clone_settings(inbound.settings.as_ref());

        if inbound.protocol == "socks" {
            settings.insert("accounts".into(), Value::Array(build_socks_accounts(&members)));
            // Socks authenticates through accounts; a stray clients key
            // would be rejected by the core.
            settings.remove("clients");
        } else {
            settings.insert(
                "clients".into(),
                Value::Array(build_clients(&inbound.protocol, &members)),
            );
        }

        let mut entry = Map::new();
        entry.insert("tag".into(), json!(inbound.tag));
        entry.insert("protocol".into(), json!(inbound.protocol));
        entry.insert("port".into(), json!(inbound.port));
        entry.insert("listen".into(), json!(inbound.listen));
        entry.insert("settings".into(), Value::Object(settings));
        if let Some(v) = &inbound.stream_settings {
            entry.insert("streamSettings".into(), v.clone());
        }
        if let Some(v) = &inbound.sniffing {
            entry.insert("sniffing".into(), v.clone());
        }
        if let Some(v) = &inbound.allocate {
            entry.insert("allocate".into(), v.clone());
        }
        result.push(Value::Object(entry));
    }

    result
}

/// Deep copy of the opaque settings blob, so the injection never
/// aliases the stored NodeConfig.
fn clone_settings(settings: Option<&Value>) -> Map<String, Value> {
    match settings {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

fn build_socks_accounts(users: &[&User]) -> Vec<Value> {
    users
        .iter()
        .map(|u| {
            json!({
                "user": u.email,
                "pass": u.password.clone().unwrap_or_default(),
            })
        })
        .collect()
}

fn build_clients(protocol: &str, users: &[&User]) -> Vec<Value> {
    let mut clients = Vec::with_capacity(users.len());
    for user in users {
        if user.protocol().is_err() {
            warn!(email = %user.email, "skipping user without credentials");
            continue;
        }
        let mut client = Map::new();
        client.insert("email".into(), json!(user.email));
        client.insert("level".into(), json!(user.level));
        match protocol {
            "vless" => {
                client.insert("id".into(), json!(user.uuid.clone().unwrap_or_default()));
                if let Some(flow) = user.flow.as_deref().filter(|f| !f.is_empty()) {
                    client.insert("flow".into(), json!(flow));
                }
            }
            "vmess" => {
                client.insert("id".into(), json!(user.uuid.clone().unwrap_or_default()));
                client.insert("alterId".into(), json!(user.alter_id));
                if let Some(sec) = user.security.as_deref().filter(|s| !s.is_empty()) {
                    client.insert("security".into(), json!(sec));
                }
            }
            "trojan" => {
                client.insert("password".into(), json!(user.password.clone().unwrap_or_default()));
            }
            "shadowsocks" => {
                client.insert("password".into(), json!(user.password.clone().unwrap_or_default()));
                if let Some(method) = user.method.as_deref().filter(|m| !m.is_empty()) {
                    client.insert("method".into(), json!(method));
                }
            }
            _ => {}
        }
        clients.push(Value::Object(client));
    }
    clients
}

fn build_routing(routing: Option<Routing>) -> Routing {
    let mut routing = routing.unwrap_or(Routing {
        domain_strategy: "AsIs".into(),
        rules: Vec::new(),
        balancers: None,
    });

    let api_rule = json!({
        "type": "field",
        "inboundTag": [API_INBOUND_TAG],
        "outboundTag": API_OUTBOUND_TAG
    });

    // Keep only rules that can actually route somewhere.
    let mut rules = Vec::with_capacity(routing.rules.len() + 1);
    rules.push(api_rule);
    for rule in routing.rules.drain(..) {
        let valid = rule
            .as_object()
            .is_some_and(|m| m.contains_key("outboundTag") || m.contains_key("balancerTag"));
        if valid {
            rules.push(rule);
        } else {
            debug!("dropping routing rule without outboundTag or balancerTag");
        }
    }
    routing.rules = rules;
    routing
}

fn build_outbounds(outbounds: &[Outbound]) -> Vec<Outbound> {
    let mut result = Vec::with_capacity(outbounds.len() + 2);

    // The first outbound is the core's default route.
    let direct = outbounds
        .iter()
        .find(|o| o.tag == DIRECT_OUTBOUND_TAG)
        .cloned()
        .unwrap_or_else(|| Outbound {
            tag: DIRECT_OUTBOUND_TAG.into(),
            protocol: "freedom".into(),
            settings: Some(json!({})),
            ..Default::default()
        });
    result.push(direct);

    result.push(Outbound {
        tag: API_OUTBOUND_TAG.into(),
        protocol: "blackhole".into(),
        settings: Some(json!({})),
        ..Default::default()
    });

    let mut seen: Vec<&str> = vec![DIRECT_OUTBOUND_TAG, API_OUTBOUND_TAG];
    for outbound in outbounds {
        if seen.contains(&outbound.tag.as_str()) {
            continue;
        }
        seen.push(&outbound.tag);
        result.push(outbound.clone());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vless_user(email: &str, tags: &[&str]) -> User {
        User {
            email: email.into(),
            uuid: Some("3b4e2f1a-0c6d-4c58-9d2e-7f8a9b0c1d2e".into()),
            inbound_tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    fn node_with_inbound(protocol: &str, tag: &str) -> NodeConfig {
        NodeConfig {
            version: "v1".into(),
            inbounds: vec![Inbound {
                tag: tag.into(),
                protocol: protocol.into(),
                port: 443,
                listen: "0.0.0.0".into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn generator() -> ConfigGenerator {
        ConfigGenerator::new("/tmp/unused.json")
    }

    #[test]
    fn cold_boot_shape() {
        let node = node_with_inbound("vless", "in0");
        let users = vec![vless_user("a@x", &["in0"])];
        let config = generator().generate(&node, &users);

        // Outbounds: direct first (synthesized freedom), api second.
        assert_eq!(config.outbounds[0].tag, "direct");
        assert_eq!(config.outbounds[0].protocol, "freedom");
        assert_eq!(config.outbounds[1].tag, "api");
        assert_eq!(config.outbounds[1].protocol, "blackhole");

        // Inbounds: api-inbound first, then in0 with the injected client.
        assert_eq!(config.inbounds[0]["tag"], "api-inbound");
        assert_eq!(config.inbounds[1]["tag"], "in0");
        let clients = config.inbounds[1]["settings"]["clients"].as_array().unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0]["email"], "a@x");
        assert_eq!(clients[0]["level"], 0);
        assert_eq!(clients[0]["id"], "3b4e2f1a-0c6d-4c58-9d2e-7f8a9b0c1d2e");

        // Routing: the api rule comes first.
        assert_eq!(config.routing.rules[0]["inboundTag"][0], "api-inbound");
        assert_eq!(config.routing.rules[0]["outboundTag"], "api");
        assert_eq!(config.routing.domain_strategy, "AsIs");

        // The synthesized policy enables per-user counters.
        assert_eq!(config.policy["levels"]["0"]["statsUserUplink"], true);
    }

    #[test]
    fn socks_inbound_uses_accounts() {
        let mut node = node_with_inbound("socks", "s0");
        // A stray clients key in the declared settings must be stripped.
        node.inbounds[0].settings = Some(json!({"auth": "password", "clients": []}));
        let users = vec![User {
            email: "u1".into(),
            password: Some("p".into()),
            inbound_tags: vec!["s0".into()],
            ..Default::default()
        }];
        let config = generator().generate(&node, &users);

        let settings = config.inbounds[1]["settings"].as_object().unwrap();
        assert!(settings.get("clients").is_none());
        assert_eq!(settings["auth"], "password");
        let accounts = settings["accounts"].as_array().unwrap();
        assert_eq!(accounts[0]["user"], "u1");
        assert_eq!(accounts[0]["pass"], "p");
    }

    #[test]
    fn outbound_ordering_and_dedup() {
        let mut node = node_with_inbound("vless", "in0");
        node.outbounds = vec![
            Outbound {
                tag: "proxy".into(),
                protocol: "vmess".into(),
                ..Default::default()
            },
            Outbound {
                tag: "direct".into(),
                protocol: "freedom".into(),
                settings: Some(json!({"domainStrategy": "UseIP"})),
                ..Default::default()
            },
            Outbound {
                tag: "proxy".into(),
                protocol: "trojan".into(),
                ..Default::default()
            },
        ];
        let config = generator().generate(&node, &[]);

        let tags: Vec<&str> = config.outbounds.iter().map(|o| o.tag.as_str()).collect();
        assert_eq!(tags, vec!["direct", "api", "proxy"]);
        // The declared direct survives with its settings.
        assert_eq!(config.outbounds[0].settings.as_ref().unwrap()["domainStrategy"], "UseIP");
        // First occurrence wins for the duplicated tag.
        assert_eq!(config.outbounds[2].protocol, "vmess");
    }

    #[test]
    fn targetless_routing_rules_are_dropped() {
        let mut node = node_with_inbound("vless", "in0");
        node.routing = Some(Routing {
            domain_strategy: "IPIfNonMatch".into(),
            rules: vec![
                json!({"type": "field", "domain": ["example.com"], "outboundTag": "proxy"}),
                json!({"type": "field", "domain": ["no-target.example"]}),
                json!({"type": "field", "network": "udp", "balancerTag": "b0"}),
            ],
            balancers: None,
        });
        let config = generator().generate(&node, &[]);

        assert_eq!(config.routing.domain_strategy, "IPIfNonMatch");
        assert_eq!(config.routing.rules.len(), 3); // api rule + two valid
        assert_eq!(config.routing.rules[1]["outboundTag"], "proxy");
        assert_eq!(config.routing.rules[2]["balancerTag"], "b0");
    }

    #[test]
    fn empty_user_list_yields_empty_clients() {
        let node = node_with_inbound("trojan", "t0");
        let config = generator().generate(&node, &[]);
        let clients = config.inbounds[1]["settings"]["clients"].as_array().unwrap();
        assert!(clients.is_empty());
    }

    #[test]
    fn credentialless_users_are_skipped() {
        let node = node_with_inbound("vless", "in0");
        let users = vec![
            User {
                email: "broken@x".into(),
                inbound_tags: vec!["in0".into()],
                ..Default::default()
            },
            vless_user("ok@x", &["in0"]),
        ];
        let config = generator().generate(&node, &users);
        let clients = config.inbounds[1]["settings"]["clients"].as_array().unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0]["email"], "ok@x");
    }

    #[test]
    fn declared_policy_passes_through() {
        let mut node = node_with_inbound("vless", "in0");
        node.policy = Some(json!({"levels": {"0": {"handshake": 8}}}));
        let config = generator().generate(&node, &[]);
        assert_eq!(config.policy["levels"]["0"]["handshake"], 8);
        assert!(config.policy["system"].is_null());
    }

    #[test]
    fn membership_is_per_tag() {
        let mut node = node_with_inbound("vless", "in0");
        node.inbounds.push(Inbound {
            tag: "in1".into(),
            protocol: "vless".into(),
            port: 8443,
            listen: "0.0.0.0".into(),
            ..Default::default()
        });
        let users = vec![vless_user("a@x", &["in1"])];
        let config = generator().generate(&node, &users);

        assert!(config.inbounds[1]["settings"]["clients"].as_array().unwrap().is_empty());
        assert_eq!(config.inbounds[2]["settings"]["clients"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn round_trip_preserves_declared_topology() {
        let mut node = node_with_inbound("vless", "in0");
        node.outbounds = vec![Outbound {
            tag: "upstream".into(),
            protocol: "vmess".into(),
            ..Default::default()
        }];
        node.routing = Some(Routing {
            domain_strategy: "AsIs".into(),
            rules: vec![json!({"type": "field", "domain": ["a.example"], "outboundTag": "upstream"})],
            balancers: None,
        });
        let config = generator().generate(&node, &[]);
        let raw = serde_json::to_value(&config).unwrap();

        // Strip the synthesized pieces and compare against the input.
        let inbound_tags: Vec<&str> = raw["inbounds"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["tag"].as_str().unwrap())
            .filter(|t| *t != API_INBOUND_TAG)
            .collect();
        assert_eq!(inbound_tags, vec!["in0"]);

        let outbound_tags: Vec<&str> = raw["outbounds"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["tag"].as_str().unwrap())
            .filter(|t| *t != API_OUTBOUND_TAG && *t != DIRECT_OUTBOUND_TAG)
            .collect();
        assert_eq!(outbound_tags, vec!["upstream"]);

        let rules: Vec<&Value> = raw["routing"]["rules"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|r| r["outboundTag"] != API_OUTBOUND_TAG)
            .collect();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0]["outboundTag"], "upstream");
    }

    #[test]
    fn write_replaces_file_with_0644() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let generator = ConfigGenerator::new(&path);
        let node = node_with_inbound("vless", "in0");

        generator.materialize(&node, &[]).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);

        let parsed: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed["inbounds"][0]["tag"], "api-inbound");
        assert_eq!(parsed["api"]["services"][0], "HandlerService");

        // A second materialization replaces the document.
        let mut node2 = node;
        node2.inbounds[0].tag = "renamed".into();
        generator.materialize(&node2, &[]).unwrap();
        let parsed: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed["inbounds"][1]["tag"], "renamed");
    }
}
