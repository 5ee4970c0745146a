use super::traits::{FetchError, Fetcher};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// [`Fetcher`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_size: u64,
}

impl HttpFetcher {
    pub fn new(max_size: u64) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("filter-registry/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, max_size })
    }

    async fn download(&self, url: &str) -> Result<Bytes, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Transport(format!("server returned {}", status)));
        }

        let mut body = BytesMut::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Transport(e.to_string()))?;
            if (body.len() + chunk.len()) as u64 > self.max_size {
                return Err(FetchError::Transport(format!(
                    "content exceeds {} bytes",
                    self.max_size
                )));
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Downloaded {} bytes from {}", body.len(), url);
        Ok(body.freeze())
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Bytes, FetchError> {
        match tokio::time::timeout(timeout, self.download(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn serve(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    fn app() -> Router {
        Router::new()
            .route("/list.txt", get(|| async { "||a.org^\n# c\n" }))
            .route("/big.txt", get(|| async { "x".repeat(4096) }))
            .route(
                "/slow.txt",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let addr = serve(app()).await;
        let fetcher = HttpFetcher::new(1024).unwrap();
        let body = fetcher
            .fetch(&format!("http://{}/list.txt", addr), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(&body[..], b"||a.org^\n# c\n");
    }

    #[tokio::test]
    async fn test_non_success_status_is_transport_error() {
        let addr = serve(app()).await;
        let fetcher = HttpFetcher::new(1024).unwrap();
        let err = fetcher
            .fetch(&format!("http://{}/missing.txt", addr), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(ref msg) if msg.contains("404")));
    }

    #[tokio::test]
    async fn test_timeout() {
        let addr = serve(app()).await;
        let fetcher = HttpFetcher::new(1024).unwrap();
        let err = fetcher
            .fetch(&format!("http://{}/slow.txt", addr), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Timeout);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let addr = serve(app()).await;
        let fetcher = HttpFetcher::new(1024).unwrap();
        let err = fetcher
            .fetch(&format!("http://{}/big.txt", addr), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = HttpFetcher::new(1024).unwrap();
        let err = fetcher
            .fetch(&format!("http://{}/list.txt", addr), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }
}
