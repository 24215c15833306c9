//! Error types for the client crate.

use thiserror::Error;

/// Errors produced by chain, relay and node RPC clients.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The requested record does not exist on chain.
    ///
    /// Kept distinct from the other variants because callers treat a
    /// missing record (e.g. no rent contract) as data, not as an outage.
    #[error("record not found")]
    NotFound,

    /// The call did not complete within its deadline.
    #[error("request timed out")]
    Timeout,

    /// The underlying connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote end rejected or failed the call.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The response payload did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
