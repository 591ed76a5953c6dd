//! Error taxonomy for the dbdiag workspace.
//!
//! Variants map to the failure classes the dialogue manager has to tell
//! apart: transient upstream failures are retried with backoff, permanent
//! upstream failures trigger a single repair attempt then a fallback,
//! integrity violations surface immediately, and timeouts never advance
//! session state.

use thiserror::Error;

/// Workspace-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by dbdiag components.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed input data (import files, corrupt blobs).
    #[error("data error: {0}")]
    Data(String),

    /// Transient upstream failure (network, 5xx, rate limit). Retryable.
    #[error("upstream service error: {0}")]
    Upstream(String),

    /// Permanent upstream failure (refusal, schema-violating output).
    #[error("upstream service rejected request: {0}")]
    UpstreamPermanent(String),

    /// A call or turn exceeded its budget.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Storage-layer failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Knowledge-graph or session invariant violated.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Invalid request or state transition.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn upstream_permanent(msg: impl Into<String>) -> Self {
        Self::UpstreamPermanent(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Data(format!("JSON: {err}"))
    }
}
