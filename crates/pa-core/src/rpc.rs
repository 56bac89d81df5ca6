//! Typed client for the core's management RPC.
//!
//! Each call opens a short-lived loopback channel with a bounded
//! timeout and returns the per-call error to the caller; retry policy
//! lives in the reconciliation engine, not here.

use crate::account::{build_protocol_user, typed};
use crate::proto::xray::app::proxyman::command::handler_service_client::HandlerServiceClient;
use crate::proto::xray::app::proxyman::command::{
    AddUserOperation, AlterInboundRequest, RemoveUserOperation, RemoveUserRateLimitRequest,
    SetUserRateLimitRequest,
};
use crate::proto::xray::app::stats::command::stats_service_client::StatsServiceClient;
use crate::proto::xray::app::stats::command::QueryStatsRequest;
use crate::CoreError;
use pa_types::{AliveUser, User};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the core's HandlerService and StatsService.
#[derive(Debug, Clone)]
pub struct XrayApiClient {
    addr: String,
    timeout: Duration,
}

/// One raw counter tuple as returned by the stats service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStat {
    pub name: String,
    pub value: i64,
}

impl XrayApiClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    async fn channel(&self) -> Result<Channel, CoreError> {
        let endpoint = Endpoint::from_shared(format!("http://{}", self.addr))
            .map_err(|source| CoreError::Connect {
                addr: self.addr.clone(),
                source,
            })?
            .connect_timeout(self.timeout)
            .timeout(self.timeout);
        endpoint.connect().await.map_err(|source| CoreError::Connect {
            addr: self.addr.clone(),
            source,
        })
    }

    /// Query counter tuples matching `pattern`. With `reset` the core
    /// zeroes each returned counter atomically, so every periodic
    /// traffic poll must pass `reset = true` or bytes get double counted.
    pub async fn query_stats(&self, pattern: &str, reset: bool) -> Result<Vec<RawStat>, CoreError> {
        let mut client = StatsServiceClient::new(self.channel().await?);
        let resp = client
            .query_stats(QueryStatsRequest {
                pattern: pattern.to_string(),
                reset,
            })
            .await
            .map_err(|source| CoreError::Rpc {
                call: "QueryStats",
                source,
            })?;
        Ok(resp
            .into_inner()
            .stat
            .into_iter()
            .map(|s| RawStat {
                name: s.name,
                value: s.value,
            })
            .collect())
    }

    /// Add a user to an inbound without restarting the core.
    pub async fn add_user(&self, inbound_tag: &str, user: &User) -> Result<(), CoreError> {
        let proto_user = build_protocol_user(user)?;
        let mut client = HandlerServiceClient::new(self.channel().await?);
        client
            .alter_inbound(AlterInboundRequest {
                tag: inbound_tag.to_string(),
                operation: Some(typed(
                    "xray.app.proxyman.command.AddUserOperation",
                    &AddUserOperation {
                        user: Some(proto_user),
                    },
                )),
            })
            .await
            .map_err(|source| CoreError::Rpc {
                call: "AlterInbound/AddUser",
                source,
            })?;
        debug!(email = %user.email, inbound = inbound_tag, "user added to inbound");
        Ok(())
    }

    /// Remove a user from an inbound. Removing a non-member is success.
    pub async fn remove_user(&self, inbound_tag: &str, email: &str) -> Result<(), CoreError> {
        let mut client = HandlerServiceClient::new(self.channel().await?);
        let result = client
            .alter_inbound(AlterInboundRequest {
                tag: inbound_tag.to_string(),
                operation: Some(typed(
                    "xray.app.proxyman.command.RemoveUserOperation",
                    &RemoveUserOperation {
                        email: email.to_string(),
                    },
                )),
            })
            .await;
        match result {
            Ok(_) => {
                debug!(email, inbound = inbound_tag, "user removed from inbound");
                Ok(())
            }
            // The core answers NotFound for a non-member; that is the
            // desired end state.
            Err(status) if status.code() == tonic::Code::NotFound => Ok(()),
            Err(source) => Err(CoreError::Rpc {
                call: "AlterInbound/RemoveUser",
                source,
            }),
        }
    }

    /// Disconnect a user everywhere: remove from every listed inbound
    /// over a single connection, continuing past per-tag failures.
    pub async fn kick_user(&self, email: &str, inbound_tags: &[String]) -> Result<(), CoreError> {
        let mut client = HandlerServiceClient::new(self.channel().await?);
        for tag in inbound_tags {
            let result = client
                .alter_inbound(AlterInboundRequest {
                    tag: tag.clone(),
                    operation: Some(typed(
                        "xray.app.proxyman.command.RemoveUserOperation",
                        &RemoveUserOperation {
                            email: email.to_string(),
                        },
                    )),
                })
                .await;
            if let Err(status) = result {
                if status.code() != tonic::Code::NotFound {
                    debug!(email, inbound = %tag, error = %status, "kick skipped inbound");
                }
            }
        }
        Ok(())
    }

    pub async fn set_user_rate_limit(
        &self,
        email: &str,
        uplink_bytes_per_sec: i64,
        downlink_bytes_per_sec: i64,
    ) -> Result<(), CoreError> {
        let mut client = HandlerServiceClient::new(self.channel().await?);
        client
            .set_user_rate_limit(SetUserRateLimitRequest {
                email: email.to_string(),
                uplink: uplink_bytes_per_sec,
                downlink: downlink_bytes_per_sec,
            })
            .await
            .map_err(|source| CoreError::Rpc {
                call: "SetUserRateLimit",
                source,
            })?;
        debug!(
            email,
            uplink = uplink_bytes_per_sec,
            downlink = downlink_bytes_per_sec,
            "user rate limit set"
        );
        Ok(())
    }

    pub async fn remove_user_rate_limit(&self, email: &str) -> Result<(), CoreError> {
        let mut client = HandlerServiceClient::new(self.channel().await?);
        client
            .remove_user_rate_limit(RemoveUserRateLimitRequest {
                email: email.to_string(),
            })
            .await
            .map_err(|source| CoreError::Rpc {
                call: "RemoveUserRateLimit",
                source,
            })?;
        debug!(email, "user rate limit removed");
        Ok(())
    }

    /// Online session gauge for one user (never negative).
    pub async fn get_user_online_count(&self, email: &str) -> Result<i64, CoreError> {
        let pattern = format!("user>>>{email}>>>online");
        let stats = self.query_stats(&pattern, false).await?;
        Ok(stats
            .iter()
            .find(|s| s.name.contains("online"))
            .map(|s| s.value.max(0))
            .unwrap_or(0))
    }

    /// Per-user online IP entries for the alive report.
    ///
    /// The supervised core build exposes no online-IP-list RPC, so this
    /// yields an empty set; the Panel drives kicks from its own
    /// connection-log accounting instead.
    pub async fn get_online_users(&self, emails: &[String]) -> Result<Vec<AliveUser>, CoreError> {
        if !emails.is_empty() {
            debug!(
                users = emails.len(),
                "core build lacks an online-IP list; reporting no per-user sessions"
            );
        }
        Ok(Vec::new())
    }
}
