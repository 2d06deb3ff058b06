// src/error.rs
use reqwest::StatusCode;
use thiserror::Error;

/// Failure talking to the subgraph or the RPC node. Always retryable: the
/// scheduler keeps the last good snapshot and tries again next interval.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("graphql errors: {}", .0.join("; "))]
    GraphQl(Vec<String>),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// A flow record with a missing or unusable field. Excluded from aggregation,
/// reported as a warning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("flow record {id}: missing or invalid {field}")]
pub struct MalformedRecordError {
    pub id: String,
    pub field: &'static str,
}

impl MalformedRecordError {
    pub fn new(id: impl Into<String>, field: &'static str) -> Self {
        Self { id: id.into(), field }
    }
}

/// Snapshot older than the cached one for the same token (out-of-order reply).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("snapshot for {token_id} observed at {observed_at} is older than cached {cached_at}")]
pub struct StaleSnapshotRejected {
    pub token_id: String,
    pub observed_at: i64,
    pub cached_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("unsupported decimals {0}")]
    Decimals(u32),

    #[error("value {0} does not fit a display decimal")]
    OutOfRange(u128),
}
