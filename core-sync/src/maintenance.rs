//! # Local Maintenance
//!
//! Filesystem housekeeping for a synced folder: creating the layout, finding
//! what is missing locally, and deleting what the remote no longer has.
//!
//! Deletion failures are logged and skipped; one stubborn file never aborts
//! a cleanup.

use crate::content_store::ContentStore;
use crate::link_table::LinkTable;
use crate::types::{normalize_name, ContentToken, FileRef, DATA_DIR_NAME};
use crate::{Result, SyncError};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// What a cleanup removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub blobs_removed: usize,
    pub links_removed: usize,
}

/// Create `base_dir/` and `base_dir/data/`
pub async fn ensure_layout(base_dir: &Path) -> Result<()> {
    let data_dir = base_dir.join(DATA_DIR_NAME);
    tokio::fs::create_dir_all(&data_dir)
        .await
        .map_err(|e| SyncError::fs(&data_dir, e))
}

/// Names of every entry in `base_dir` except the data directory
///
/// A missing folder has no entries.
pub async fn named_entries(base_dir: &Path) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(base_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SyncError::fs(base_dir, e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SyncError::fs(base_dir, e))?
    {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(path = %entry.path().display(), "Skipping non UTF-8 entry");
            continue;
        };
        if normalize_name(&name) != DATA_DIR_NAME {
            names.push(name);
        }
    }

    names.sort();
    Ok(names)
}

/// Remote files that have no blob or no named entry locally
///
/// Names are compared case-insensitively. With an empty content store every
/// file is missing.
pub async fn missing_files(base_dir: &Path, remote: &[FileRef]) -> Result<Vec<FileRef>> {
    let store = ContentStore::new(base_dir.join(DATA_DIR_NAME));
    let tokens: HashSet<ContentToken> = store.list_tokens().await?.into_iter().collect();
    if tokens.is_empty() {
        return Ok(remote.to_vec());
    }

    let names: HashSet<String> = named_entries(base_dir)
        .await?
        .iter()
        .map(|name| normalize_name(name))
        .collect();

    Ok(remote
        .iter()
        .filter(|file| !tokens.contains(&file.token) || !names.contains(file.name.normalized()))
        .cloned()
        .collect())
}

/// Delete blobs and named entries the remote no longer references
///
/// Names must match exactly: `a.jpg` is deleted when the remote now calls the
/// file `A.JPG`. The link table is updated to match. Individual failures are
/// logged.
#[instrument(skip(base_dir, remote), fields(base_dir = %base_dir.display(), remote = remote.len()))]
pub async fn delete_remote_absent(base_dir: &Path, remote: &[FileRef]) -> Result<CleanupReport> {
    let data_dir = base_dir.join(DATA_DIR_NAME);
    let store = ContentStore::new(&data_dir);
    let mut report = CleanupReport::default();

    let remote_tokens: HashSet<&ContentToken> = remote.iter().map(|file| &file.token).collect();
    for token in store.list_tokens().await? {
        if remote_tokens.contains(&token) {
            continue;
        }
        match store.remove(&token).await {
            Ok(()) => report.blobs_removed += 1,
            Err(e) => warn!(token = %token, error = %e, "Failed to delete blob"),
        }
    }

    let remote_names: HashSet<&str> = remote.iter().map(|file| file.name.as_str()).collect();
    let mut link_table = LinkTable::load(data_dir.join(crate::link_table::LINK_TABLE_FILE)).await?;
    let mut table_changed = false;

    for name in named_entries(base_dir).await? {
        if remote_names.contains(name.as_str()) {
            continue;
        }
        if remove_entry(&base_dir.join(&name)).await {
            report.links_removed += 1;
        }
        table_changed |= link_table.remove_exact(&name).is_some();
    }

    for stale in link_table.names() {
        if !remote_names.contains(stale.as_str()) {
            table_changed |= link_table.remove(&stale).is_some();
        }
    }

    if table_changed {
        link_table.persist().await?;
    }

    info!(
        blobs_removed = report.blobs_removed,
        links_removed = report.links_removed,
        "Removed files absent from remote"
    );
    Ok(report)
}

/// Delete named entries absent from `desired` and drop their link entries
///
/// `desired` holds display names compared exactly, so an entry that differs
/// only in case is stale. Returns how many entries were deleted. The caller
/// persists the link table.
pub async fn prune_stale_links(
    base_dir: &Path,
    desired: &HashSet<String>,
    link_table: &mut LinkTable,
) -> Result<usize> {
    let mut removed = 0;

    for name in named_entries(base_dir).await? {
        if desired.contains(&name) {
            continue;
        }
        if remove_entry(&base_dir.join(&name)).await {
            removed += 1;
        }
        link_table.remove_exact(&name);
    }

    // Entries whose file is already gone, or stored under another case
    for stale in link_table.names() {
        if !desired.contains(stale.as_str()) {
            link_table.remove(&stale);
        }
    }

    if removed > 0 {
        debug!(removed, base_dir = %base_dir.display(), "Pruned stale links");
    }
    Ok(removed)
}

/// Remove a whole folder, blobs included
pub async fn delete_folder(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            info!(path = %path.display(), "Deleted local folder");
            Ok(())
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to delete local folder");
            Err(SyncError::fs(PathBuf::from(path), e))
        }
    }
}

/// Delete a file or directory, logging failures
///
/// Returns whether something was removed; a missing path is not a failure.
pub(crate) async fn remove_entry(path: &Path) -> bool {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to delete entry");
            false
        }
    }
}
