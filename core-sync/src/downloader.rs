//! # Downloader
//!
//! Streams a remote file to `<dest>.download` and renames it to `<dest>` only
//! after every byte was written and flushed. A failed download can leave the
//! temporary file behind; it is never mistaken for a blob because the store
//! ignores the suffix and the next attempt truncates it.

use crate::content_store::DOWNLOAD_SUFFIX;
use crate::{Result, SyncError};
use bridge_traits::http::{DownloadOptions, HttpClient};
use core_runtime::logging::redact_url;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

/// Streaming downloader over the host [`HttpClient`]
#[derive(Clone)]
pub struct Downloader {
    http_client: Arc<dyn HttpClient>,
    timeout: Option<Duration>,
}

impl Downloader {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            timeout: None,
        }
    }

    /// Bound the wait for each response to start
    ///
    /// Streaming the body is not limited, so large files are never cut off.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Temporary path used while `dest` is being written
    pub fn temp_path(dest: &Path) -> PathBuf {
        let mut name = dest.as_os_str().to_owned();
        name.push(DOWNLOAD_SUFFIX);
        PathBuf::from(name)
    }

    /// Download `url` into `dest`, returning the number of bytes written
    ///
    /// # Errors
    ///
    /// Any network or filesystem failure is reported as [`SyncError::Fetch`].
    /// `dest` is untouched unless the whole body arrived.
    #[instrument(skip(self, url), fields(url = %redact_url(url)))]
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let fetch_error = |message: String| SyncError::Fetch {
            url: redact_url(url),
            message,
        };

        let options = match self.timeout {
            Some(timeout) => DownloadOptions::default().with_timeout(timeout),
            None => DownloadOptions::default(),
        };

        let mut stream = self
            .http_client
            .download_stream_with(url.to_string(), options)
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let tmp = Self::temp_path(dest);
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| fetch_error(format!("cannot create {}: {}", tmp.display(), e)))?;

        let written = match tokio::io::copy(&mut stream, &mut file).await {
            Ok(written) => written,
            Err(e) => {
                warn!(tmp = %tmp.display(), error = %e, "Download interrupted");
                return Err(fetch_error(e.to_string()));
            }
        };

        file.flush()
            .await
            .map_err(|e| fetch_error(format!("cannot flush {}: {}", tmp.display(), e)))?;
        file.sync_all()
            .await
            .map_err(|e| fetch_error(format!("cannot sync {}: {}", tmp.display(), e)))?;
        drop(file);

        tokio::fs::rename(&tmp, dest)
            .await
            .map_err(|e| fetch_error(format!("cannot rename into {}: {}", dest.display(), e)))?;

        debug!(bytes = written, dest = %dest.display(), "Download complete");
        Ok(written)
    }
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("http_client", &"HttpClient { ... }")
            .field("timeout", &self.timeout)
            .finish()
    }
}
