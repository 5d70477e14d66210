//! HTTP Client Abstraction
//!
//! Streaming downloads of remote media. The engine never buffers a whole
//! file in memory; it copies the returned reader straight to disk.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Boxed byte stream returned by [`HttpClient::download_stream`].
pub type DownloadStream = Box<dyn tokio::io::AsyncRead + Send + Unpin>;

/// Options applied to a single download request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Upper bound for establishing the response (headers received).
    /// `None` leaves the client's own default in place.
    pub timeout: Option<Duration>,
}

impl DownloadOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Async HTTP client trait
///
/// Implementations must:
/// - Return an error for non-2xx responses instead of streaming the error body
/// - Surface mid-stream transport failures as `std::io::Error` from the reader
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::HttpClient;
/// use tokio::io::AsyncReadExt;
///
/// async fn fetch(client: &dyn HttpClient) -> Result<Vec<u8>> {
///     let mut stream = client.download_stream("https://cdn.example.com/a.jpg".into()).await?;
///     let mut buf = Vec::new();
///     stream.read_to_end(&mut buf).await?;
///     Ok(buf)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Download a resource as a stream of bytes
    async fn download_stream(&self, url: String) -> Result<DownloadStream>;

    /// Download a resource with per-request options
    async fn download_stream_with(
        &self,
        url: String,
        options: DownloadOptions,
    ) -> Result<DownloadStream> {
        // Implementations without per-request knobs fall back to the plain call
        let _ = options;
        self.download_stream(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use tokio::io::AsyncReadExt;

    mock! {
        Client {}

        #[async_trait]
        impl HttpClient for Client {
            async fn download_stream(&self, url: String) -> Result<DownloadStream>;
        }
    }

    #[test]
    fn test_download_options_builder() {
        let options = DownloadOptions::default().with_timeout(Duration::from_secs(5));
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
        assert_eq!(DownloadOptions::default().timeout, None);
    }

    #[tokio::test]
    async fn test_default_download_with_delegates() {
        let mut client = MockClient::new();
        client
            .expect_download_stream()
            .withf(|url| url == "https://cdn.example.com/a.jpg")
            .times(1)
            .returning(|_| Ok(Box::new(std::io::Cursor::new(b"abc".to_vec())) as DownloadStream));

        let mut stream = client
            .download_stream_with(
                "https://cdn.example.com/a.jpg".to_string(),
                DownloadOptions::default(),
            )
            .await
            .unwrap();

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"abc");
    }
}
