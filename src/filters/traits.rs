use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out")]
    Timeout,
    #[error("{0}")]
    Transport(String),
}

/// The network side of the registry. Implementations must not retry.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Downloads `url`, giving up with [`FetchError::Timeout`] after `timeout`.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Bytes, FetchError>;
}
