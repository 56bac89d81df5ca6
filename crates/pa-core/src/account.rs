//! Credential-tuple to protocol-account encoding for hot user mutations.
//!
//! The Panel does not tag users with a protocol; the mapping is implied
//! by which credentials a record carries (see [`pa_types::User::protocol`]).
//! This module turns a user record into the typed account payload the
//! core's HandlerService expects.

use crate::proto::xray::common::protocol;
use crate::proto::xray::common::serial::TypedMessage;
use crate::proto::xray::proxy::{shadowsocks, trojan, vless, vmess};
use crate::CoreError;
use pa_types::{User, UserProtocol};
use prost::Message;

/// Wrap a protobuf message with its fully qualified xray type name.
pub(crate) fn typed<M: Message>(type_name: &str, msg: &M) -> TypedMessage {
    TypedMessage {
        r#type: type_name.to_string(),
        value: msg.encode_to_vec(),
    }
}

/// Build the `protocol.User` payload for an AddUser operation.
///
/// Fails on a contract violation (no credentials) or an unparseable
/// UUID; both are per-user errors that must not affect siblings.
pub fn build_protocol_user(user: &User) -> Result<protocol::User, CoreError> {
    let account = match user.protocol()? {
        UserProtocol::Vless => {
            let id = checked_uuid(user)?;
            typed(
                "xray.proxy.vless.Account",
                &vless::Account {
                    id,
                    flow: user.flow.clone().unwrap_or_default(),
                    encryption: String::new(),
                },
            )
        }
        UserProtocol::Vmess => {
            let id = checked_uuid(user)?;
            typed(
                "xray.proxy.vmess.Account",
                &vmess::Account {
                    id,
                    alter_id: user.alter_id,
                },
            )
        }
        UserProtocol::Trojan => typed(
            "xray.proxy.trojan.Account",
            &trojan::Account {
                password: user.password.clone().unwrap_or_default(),
            },
        ),
        UserProtocol::Shadowsocks => typed(
            "xray.proxy.shadowsocks.Account",
            &shadowsocks::Account {
                password: user.password.clone().unwrap_or_default(),
                cipher_type: cipher_type(user.method.as_deref()) as i32,
            },
        ),
    };

    Ok(protocol::User {
        level: user.level,
        email: user.email.clone(),
        account: Some(account),
    })
}

fn checked_uuid(user: &User) -> Result<String, CoreError> {
    let raw = user.uuid.as_deref().unwrap_or_default();
    let parsed = uuid::Uuid::parse_str(raw).map_err(|source| CoreError::InvalidUuid {
        email: user.email.clone(),
        source,
    })?;
    Ok(parsed.to_string())
}

/// Map a cipher method name onto the core's enum. Unknown names fall
/// back to AES-256-GCM, the core's own default.
fn cipher_type(method: Option<&str>) -> shadowsocks::CipherType {
    match method {
        Some("aes-128-gcm") => shadowsocks::CipherType::Aes128Gcm,
        Some("chacha20-poly1305") | Some("chacha20-ietf-poly1305") => {
            shadowsocks::CipherType::Chacha20Poly1305
        }
        Some("xchacha20-poly1305") => shadowsocks::CipherType::Xchacha20Poly1305,
        Some("none") => shadowsocks::CipherType::None,
        _ => shadowsocks::CipherType::Aes256Gcm,
    }
}
