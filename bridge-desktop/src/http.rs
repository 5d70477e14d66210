//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{DownloadOptions, DownloadStream, HttpClient},
};
use futures_util::TryStreamExt;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Reqwest-based HTTP client implementation
///
/// Provides streaming downloads with:
/// - Connection pooling via reqwest
/// - TLS support by default
/// - Bodies exposed as `AsyncRead` so callers copy straight to disk
///
/// No retries happen here. A failed download is reported to the caller,
/// which decides whether the next sync pass tries again.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    ///
    /// Media files can be large, so there is no overall request timeout by
    /// default; only connecting is bounded.
    pub fn new() -> Result<Self> {
        let client = Self::builder()
            .build()
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Create a new HTTP client with an overall request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Self::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn builder() -> reqwest::ClientBuilder {
        Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("media-mirror/", env!("CARGO_PKG_VERSION")))
    }

    async fn open(&self, url: String, timeout: Option<Duration>) -> Result<DownloadStream> {
        debug!(url = %url, "Opening download stream");

        // The limit covers the response headers only; bodies of large media
        // may take far longer to stream
        let request = self.client.get(&url).send();
        let sent = match timeout {
            Some(limit) => tokio::time::timeout(limit, request).await.map_err(|_| {
                warn!(url = %url, ?limit, "Download request timed out");
                BridgeError::OperationFailed("Request timed out".to_string())
            })?,
            None => request.await,
        };

        let response = sent.map_err(|e| {
            warn!(url = %url, error = %e, "Download request failed");
            if e.is_timeout() {
                BridgeError::OperationFailed("Request timed out".to_string())
            } else if e.is_connect() {
                BridgeError::OperationFailed(format!("Connection failed: {}", e))
            } else {
                BridgeError::OperationFailed(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            warn!(url = %url, status = %response.status(), "Download rejected by server");
            return Err(BridgeError::OperationFailed(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let reader = tokio_util::io::StreamReader::new(stream);

        Ok(Box::new(reader))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn download_stream(&self, url: String) -> Result<DownloadStream> {
        self.open(url, None).await
    }

    async fn download_stream_with(
        &self,
        url: String,
        options: DownloadOptions,
    ) -> Result<DownloadStream> {
        self.open(url, options.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_client_creation() {
        assert!(ReqwestHttpClient::new().is_ok());
        assert!(ReqwestHttpClient::with_timeout(Duration::from_secs(5)).is_ok());
    }

    #[tokio::test]
    async fn test_download_stream_reads_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/tok1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"image-bytes".to_vec()))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new().unwrap();
        let mut stream = client
            .download_stream(format!("{}/files/tok1", server.uri()))
            .await
            .unwrap();

        let mut body = Vec::new();
        stream.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"image-bytes");
    }

    #[tokio::test]
    async fn test_download_stream_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new().unwrap();
        let result = client
            .download_stream(format!("{}/files/missing", server.uri()))
            .await;

        match result {
            Err(BridgeError::OperationFailed(msg)) => assert!(msg.contains("404")),
            _ => panic!("expected HTTP error"),
        }
    }

    #[tokio::test]
    async fn test_download_stream_with_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new().unwrap();
        let result = client
            .download_stream_with(
                format!("{}/files/slow", server.uri()),
                DownloadOptions::default().with_timeout(Duration::from_millis(50)),
            )
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_timeout_does_not_cut_off_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"slow reader".to_vec()))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new().unwrap();
        let mut stream = client
            .download_stream_with(
                format!("{}/files/video", server.uri()),
                DownloadOptions::default().with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap();

        // Consume the body well after the limit has passed
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut body = Vec::new();
        stream.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"slow reader");
    }
}
