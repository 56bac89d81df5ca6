use std::path::PathBuf;
use thiserror::Error;

/// Errors from the core-facing components.
///
/// RPC errors carry the call name so a log line is enough to locate the
/// failing operation; the reconciliation loops decide whether to retry
/// on the next tick or fall back to a restart.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("connect core api at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("core rpc {call}: {source}")]
    Rpc {
        call: &'static str,
        #[source]
        source: tonic::Status,
    },
    #[error(transparent)]
    Contract(#[from] pa_types::ContractError),
    #[error("invalid uuid for {email}: {source}")]
    InvalidUuid {
        email: String,
        #[source]
        source: uuid::Error,
    },
    #[error("encode core config: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("write core config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("spawn core process {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
