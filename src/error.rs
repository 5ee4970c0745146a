use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the filter registry and its controller.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("filter with url {0} already exists")]
    DuplicateUrl(String),

    #[error("filter with url {0} not found")]
    NotFound(String),

    #[error("fetching {url} timed out after {timeout:?}")]
    FetchTimeout { url: String, timeout: Duration },

    #[error("fetching {url} failed: {reason}")]
    FetchTransport { url: String, reason: String },

    #[error("invalid filter url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("filter storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("filter controller is closed")]
    Closed,
}

pub type Result<T, E = FilterError> = std::result::Result<T, E>;
