//! # Content Store
//!
//! Token-addressed blob directory (`<folder>/data/<token>`).
//!
//! A blob present under its final name is always complete: fetchers write to
//! a temporary name and rename on success. Concurrent [`ContentStore::ensure`]
//! calls for the same token share one fetch through an in-flight map of
//! [`Shared`] futures, so each token is downloaded at most once at a time.

use crate::link_table::{LINK_TABLE_FILE, LINK_TABLE_TMP_FILE};
use crate::types::ContentToken;
use crate::{Result, SyncError};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Suffix of partially written blobs
pub const DOWNLOAD_SUFFIX: &str = ".download";

type FetchOutput = std::result::Result<(), Arc<SyncError>>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutput>>;

/// How [`ContentStore::ensure`] satisfied a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The blob was already on disk
    AlreadyPresent,
    /// This call ran the fetcher
    Fetched,
    /// Another caller's fetch for the same token was awaited
    Joined,
}

/// Token-addressed blob storage with fetch coalescing
#[derive(Clone)]
pub struct ContentStore {
    root: PathBuf,
    in_flight: Arc<Mutex<HashMap<ContentToken, SharedFetch>>>,
}

impl ContentStore {
    /// The directory is created on first fetch, not here
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final location of a blob
    pub fn path(&self, token: &ContentToken) -> PathBuf {
        self.root.join(token.as_str())
    }

    /// Whether the complete blob is on disk
    pub async fn has(&self, token: &ContentToken) -> bool {
        tokio::fs::try_exists(self.path(token))
            .await
            .unwrap_or(false)
    }

    /// Make sure the blob for `token` exists, running `fetcher` if needed
    ///
    /// `fetcher` receives the final blob path and must only create it once
    /// the content is complete. It is invoked at most once across concurrent
    /// callers for the same token; the others await its result.
    ///
    /// # Errors
    ///
    /// Every caller waiting on a failed fetch receives [`SyncError::Fetch`].
    /// The failed attempt is forgotten so a later call fetches again.
    pub async fn ensure<F, Fut>(&self, token: &ContentToken, fetcher: F) -> Result<EnsureOutcome>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (fetch, outcome) = {
            let mut in_flight = self.in_flight.lock().await;

            if let Some(existing) = in_flight.get(token) {
                (existing.clone(), EnsureOutcome::Joined)
            } else if self.has(token).await {
                return Ok(EnsureOutcome::AlreadyPresent);
            } else {
                let fetch = self.start_fetch(token, fetcher);
                in_flight.insert(token.clone(), fetch.clone());
                (fetch, EnsureOutcome::Fetched)
            }
        };

        debug!(token = %token, ?outcome, "Awaiting blob fetch");

        match fetch.await {
            Ok(()) => Ok(outcome),
            Err(err) => Err(shared_error(token, &err)),
        }
    }

    fn start_fetch<F, Fut>(&self, token: &ContentToken, fetcher: F) -> SharedFetch
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let root = self.root.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let token = token.clone();
        let work = fetcher(self.path(&token));

        async move {
            let result = match tokio::fs::create_dir_all(&root).await {
                Ok(()) => work.await,
                Err(e) => Err(SyncError::fs(&root, e)),
            };

            // Removed only after the blob is in place (or the fetch failed)
            in_flight.lock().await.remove(&token);

            result.map_err(Arc::new)
        }
        .boxed()
        .shared()
    }

    /// Number of fetches currently running
    #[cfg(test)]
    pub(crate) async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Tokens of every complete blob
    ///
    /// Temporary downloads and the link table are skipped. A missing
    /// directory is an empty store.
    pub async fn list_tokens(&self) -> Result<Vec<ContentToken>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SyncError::fs(&self.root, e)),
        };

        let mut tokens = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SyncError::fs(&self.root, e))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };

            if name.ends_with(DOWNLOAD_SUFFIX)
                || name == LINK_TABLE_FILE
                || name == LINK_TABLE_TMP_FILE
            {
                continue;
            }

            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }

            match ContentToken::new(name) {
                Ok(token) => tokens.push(token),
                Err(_) => warn!(name, "Skipping unexpected entry in content store"),
            }
        }

        tokens.sort();
        Ok(tokens)
    }

    /// Delete a blob; a missing blob is not an error
    pub async fn remove(&self, token: &ContentToken) -> Result<()> {
        let path = self.path(token);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(token = %token, "Removed blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::fs(path, e)),
        }
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("root", &self.root)
            .finish()
    }
}

fn shared_error(token: &ContentToken, err: &SyncError) -> SyncError {
    match err {
        SyncError::Fetch { url, message } => SyncError::Fetch {
            url: url.clone(),
            message: message.clone(),
        },
        other => SyncError::Fetch {
            url: token.to_string(),
            message: other.to_string(),
        },
    }
}
