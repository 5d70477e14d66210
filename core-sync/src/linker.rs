//! # Linker
//!
//! Materializes a named entry in the user folder from a content-store blob.
//!
//! Strategies are tried in order until one succeeds:
//!
//! 1. [`LinkStrategy::HardLink`] - no copy, same filesystem only
//! 2. [`LinkStrategy::Reflink`] - copy-on-write clone where supported
//! 3. [`LinkStrategy::ByteCopy`] - streamed copy of the blob
//!
//! Whatever sits at the link path is removed first, so linking the same pair
//! twice converges to the same state.

use crate::{Result, SyncError};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// One way of making `link_path` hold the bytes of `blob_path`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStrategy {
    HardLink,
    Reflink,
    ByteCopy,
}

impl LinkStrategy {
    /// Default fallback order
    pub const ALL: [LinkStrategy; 3] = [
        LinkStrategy::HardLink,
        LinkStrategy::Reflink,
        LinkStrategy::ByteCopy,
    ];

    async fn apply(self, link_path: &Path, blob_path: &Path) -> io::Result<()> {
        match self {
            LinkStrategy::HardLink => tokio::fs::hard_link(blob_path, link_path).await,
            LinkStrategy::Reflink => {
                let from = blob_path.to_path_buf();
                let to = link_path.to_path_buf();
                tokio::task::spawn_blocking(move || reflink_copy::reflink(&from, &to))
                    .await
                    .map_err(io::Error::other)?
            }
            LinkStrategy::ByteCopy => {
                let mut source = tokio::fs::File::open(blob_path).await?;
                let mut target = tokio::fs::File::create(link_path).await?;
                tokio::io::copy(&mut source, &mut target).await?;
                target.flush().await
            }
        }
    }
}

impl fmt::Display for LinkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkStrategy::HardLink => "hard link",
            LinkStrategy::Reflink => "reflink",
            LinkStrategy::ByteCopy => "byte copy",
        };
        f.write_str(name)
    }
}

/// Ordered list of [`LinkStrategy`] values
#[derive(Debug, Clone)]
pub struct Linker {
    strategies: Vec<LinkStrategy>,
}

impl Default for Linker {
    fn default() -> Self {
        Self {
            strategies: LinkStrategy::ALL.to_vec(),
        }
    }
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom order; an empty list always fails
    pub fn with_strategies(strategies: Vec<LinkStrategy>) -> Self {
        Self { strategies }
    }

    pub fn strategies(&self) -> &[LinkStrategy] {
        &self.strategies
    }

    /// Make `link_path` resolve to the bytes at `blob_path`
    ///
    /// Returns the strategy that succeeded.
    ///
    /// # Errors
    ///
    /// [`SyncError::Link`] listing each strategy's error when all of them fail.
    pub async fn link(&self, link_path: &Path, blob_path: &Path) -> Result<LinkStrategy> {
        remove_existing(link_path).await;

        let mut failures = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            match strategy.apply(link_path, blob_path).await {
                Ok(()) => {
                    debug!(
                        link = %link_path.display(),
                        strategy = %strategy,
                        "Linked file"
                    );
                    return Ok(*strategy);
                }
                Err(e) => {
                    debug!(strategy = %strategy, error = %e, "Link strategy failed");
                    failures.push(format!("{}: {}", strategy, e));
                    // A failed tier may leave a partial file behind
                    remove_existing(link_path).await;
                }
            }
        }

        Err(SyncError::Link {
            path: PathBuf::from(link_path),
            message: if failures.is_empty() {
                "no link strategy configured".to_string()
            } else {
                failures.join("; ")
            },
        })
    }
}

async fn remove_existing(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Could not remove existing entry"),
    }
}
