//! HTTP client for the Panel agent API.
//!
//! JSON over HTTP with a node-auth header on every request. The two GET
//! resources (config, users) are polled conditionally: the entity tag of
//! the last successful fetch is echoed as `If-None-Match`, and a 304
//! answer is surfaced as "unchanged" without parsing a payload. Transport
//! errors and 5xx responses are retried with a linear backoff (attempt
//! *i* waits *i* seconds); 4xx responses are terminal. All reporter
//! endpoints tolerate at-least-once delivery on the server side.

use parking_lot::Mutex;
use pa_types::{
    AliveResponse, AliveUser, EgressIp, NodeConfig, RegisterRequest, RegisterResponse,
    StatusReport, TrafficReport, UserList,
};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("panel request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("panel returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("decode panel response: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("encode request body: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("panel request failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<PanelError>,
    },
}

impl PanelError {
    fn retryable(&self) -> bool {
        match self {
            PanelError::Transport(_) => true,
            PanelError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Default)]
struct EtagCache {
    config: Option<String>,
    users: Option<String>,
}

/// Client for the Panel's `/agent` endpoint family.
///
/// Cheap to share behind an `Arc`; the entity-tag cache is interior
/// state so conditional polling works from any task.
pub struct PanelClient {
    http: reqwest::Client,
    base: String,
    token: String,
    retry_count: u32,
    etags: Mutex<EtagCache>,
}

#[derive(Deserialize)]
struct ConfigEnvelope {
    config: NodeConfig,
    #[serde(default)]
    etag: String,
}

#[derive(Serialize)]
struct TrafficBody<'a> {
    traffics: &'a [TrafficReport],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AliveBody<'a> {
    alive_users: &'a [AliveUser],
}

#[derive(Serialize)]
struct EgressBody<'a> {
    ips: &'a [EgressIp],
}

impl PanelClient {
    /// Build a client from the panel section of the agent configuration.
    pub fn new(
        url: &str,
        api_prefix: &str,
        token: &str,
        timeout: Duration,
        retry_count: u32,
    ) -> Result<Self, PanelError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: format!("{}{}", url.trim_end_matches('/'), api_prefix),
            token: token.to_string(),
            retry_count,
            etags: Mutex::new(EtagCache::default()),
        })
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, PanelError> {
        let resp = self
            .send(Method::POST, "/agent/register", Some(serde_json::to_vec(req)?), None)
            .await?;
        let resp = ok_or_status(resp).await?;
        resp.json().await.map_err(PanelError::Decode)
    }

    /// Conditional fetch of the declarative node configuration.
    /// `Ok(None)` means the server copy matches the cached entity tag.
    pub async fn get_config(&self) -> Result<Option<NodeConfig>, PanelError> {
        let etag = self.etags.lock().config.clone();
        let resp = self
            .send(Method::GET, "/agent/config", None, etag.as_deref())
            .await?;
        if resp.status() == StatusCode::NOT_MODIFIED {
            return Ok(None);
        }
        let resp = ok_or_status(resp).await?;
        let envelope: ConfigEnvelope = resp.json().await.map_err(PanelError::Decode)?;
        let mut config = envelope.config;
        config.etag = envelope.etag.clone();
        self.etags.lock().config = Some(envelope.etag);
        Ok(Some(config))
    }

    /// Conditional fetch of the user list and rate limits.
    pub async fn get_users(&self) -> Result<Option<UserList>, PanelError> {
        let etag = self.etags.lock().users.clone();
        let resp = self
            .send(Method::GET, "/agent/users", None, etag.as_deref())
            .await?;
        if resp.status() == StatusCode::NOT_MODIFIED {
            return Ok(None);
        }
        let resp = ok_or_status(resp).await?;
        let list: UserList = resp.json().await.map_err(PanelError::Decode)?;
        self.etags.lock().users = Some(list.etag.clone());
        Ok(Some(list))
    }

    pub async fn report_traffic(&self, traffics: &[TrafficReport]) -> Result<(), PanelError> {
        let body = serde_json::to_vec(&TrafficBody { traffics })?;
        let resp = self.send(Method::POST, "/agent/traffic", Some(body), None).await?;
        ok_or_status(resp).await.map(drop)
    }

    pub async fn report_status(&self, status: &StatusReport) -> Result<(), PanelError> {
        let body = serde_json::to_vec(status)?;
        let resp = self.send(Method::POST, "/agent/status", Some(body), None).await?;
        ok_or_status(resp).await.map(drop)
    }

    pub async fn report_alive(&self, users: &[AliveUser]) -> Result<AliveResponse, PanelError> {
        let body = serde_json::to_vec(&AliveBody { alive_users: users })?;
        let resp = self.send(Method::POST, "/agent/alive", Some(body), None).await?;
        let resp = ok_or_status(resp).await?;
        resp.json().await.map_err(PanelError::Decode)
    }

    pub async fn report_egress_ips(&self, ips: &[EgressIp]) -> Result<(), PanelError> {
        let body = serde_json::to_vec(&EgressBody { ips })?;
        let resp = self.send(Method::POST, "/agent/egress-ips", Some(body), None).await?;
        ok_or_status(resp).await.map(drop)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        etag: Option<&str>,
    ) -> Result<reqwest::Response, PanelError> {
        let url = format!("{}{}", self.base, path);
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                debug!(attempt, path, "retrying panel request");
            }
            let mut req = self
                .http
                .request(method.clone(), &url)
                .header("Content-Type", "application/json")
                .header("X-Node-Token", &self.token);
            if let Some(tag) = etag {
                req = req.header("If-None-Match", tag);
            }
            if let Some(b) = &body {
                req = req.body(b.clone());
            }
            let err = match req.send().await {
                Ok(resp) if resp.status().is_server_error() => PanelError::Status {
                    status: resp.status().as_u16(),
                    body: resp.text().await.unwrap_or_default(),
                },
                Ok(resp) => return Ok(resp),
                Err(e) => PanelError::Transport(e),
            };
            debug_assert!(err.retryable());
            attempt += 1;
            if attempt >= self.retry_count {
                return Err(PanelError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
        }
    }
}

/// Treat anything other than 200/201 as a terminal protocol error.
async fn ok_or_status(resp: reqwest::Response) -> Result<reqwest::Response, PanelError> {
    let status = resp.status();
    if status == StatusCode::OK || status == StatusCode::CREATED {
        return Ok(resp);
    }
    Err(PanelError::Status {
        status: status.as_u16(),
        body: resp.text().await.unwrap_or_default(),
    })
}
