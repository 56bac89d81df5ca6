//! Wire model for the Panel agent API.
//!
//! Everything the agent exchanges with the Panel (declarative node
//! configuration, user lists, telemetry reports) and the credential
//! mapping used when talking to the proxy core. Field names follow the
//! Panel's JSON contract, so every struct here is serde-derived with
//! camelCase renames where the wire differs from Rust convention.

mod node;
mod register;
mod report;
mod user;

pub use node::{Inbound, NodeConfig, Outbound, Routing};
pub use register::{Capabilities, Protocols, RegisterRequest, RegisterResponse};
pub use report::{AliveResponse, AliveUser, EgressIp, StatusReport, TrafficReport};
pub use user::{RateLimit, User, UserList, UserProtocol};

use thiserror::Error;

/// Contract violations in Panel-issued data.
///
/// These are terminal for the offending record only; the caller skips it
/// with a warning and continues with its siblings.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("user {0} carries neither uuid nor password")]
    MissingCredentials(String),
}
