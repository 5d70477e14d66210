//! # Link Table
//!
//! Persisted `name -> token` map of the links currently materialized in a
//! folder, stored as `data/link.json`:
//!
//! ```json
//! { "Cover.jpg": "tok_0a1b2c", "notes.pdf": "tok_99ff" }
//! ```
//!
//! The table is keyed by the normalized file name, so `Cover.jpg` and
//! `cover.jpg` share an entry. The most recent insert decides the display
//! name written back to disk.
//!
//! A missing or unreadable file yields an empty table. Entries pointing at
//! blobs that no longer exist are harmless: the next sync downloads the blob
//! again and rewrites the entry.

use crate::types::{ContentToken, FileName};
use crate::{Result, SyncError};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// File name of the persisted table inside the data directory
pub const LINK_TABLE_FILE: &str = "link.json";

/// Staging file used for atomic rewrites
pub const LINK_TABLE_TMP_FILE: &str = "link.json.tmp";

/// Link table shared by the workers of one sync
///
/// Hold the lock across the whole read-modify-persist sequence.
pub type SharedLinkTable = Arc<Mutex<LinkTable>>;

#[derive(Debug, Clone)]
pub struct LinkTable {
    path: PathBuf,
    entries: HashMap<String, (FileName, ContentToken)>,
}

impl LinkTable {
    /// Empty table that persists to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: HashMap::new(),
        }
    }

    /// Read the table at `path`
    ///
    /// # Errors
    ///
    /// Only I/O failures other than a missing file are returned. Malformed
    /// content is logged and discarded.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let mut table = Self::new(path);

        let raw = match tokio::fs::read(&table.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %table.path.display(), "No link table yet");
                return Ok(table);
            }
            Err(e) => return Err(SyncError::fs(&table.path, e)),
        };

        let stored: BTreeMap<String, String> = match serde_json::from_slice(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(
                    path = %table.path.display(),
                    error = %e,
                    "Link table is malformed, starting empty"
                );
                return Ok(table);
            }
        };

        for (name, token) in stored {
            match (FileName::new(name.clone()), ContentToken::new(token)) {
                (Ok(name), Ok(token)) => {
                    table.insert(name, token);
                }
                _ => warn!(name = %name, "Skipping invalid link table entry"),
            }
        }

        debug!(path = %table.path.display(), entries = table.len(), "Loaded link table");
        Ok(table)
    }

    /// Wrap in the shared handle used by sync workers
    pub fn into_shared(self) -> SharedLinkTable {
        Arc::new(Mutex::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &FileName) -> Option<&ContentToken> {
        self.entries.get(name.normalized()).map(|(_, token)| token)
    }

    /// Name as it was last linked, which may differ in case from `name`
    pub fn stored_name(&self, name: &FileName) -> Option<&FileName> {
        self.entries.get(name.normalized()).map(|(stored, _)| stored)
    }

    /// Insert or replace, returning the previous token
    pub fn insert(&mut self, name: FileName, token: ContentToken) -> Option<ContentToken> {
        self.entries
            .insert(name.normalized().to_string(), (name, token))
            .map(|(_, previous)| previous)
    }

    pub fn remove(&mut self, name: &FileName) -> Option<ContentToken> {
        self.entries
            .remove(name.normalized())
            .map(|(_, token)| token)
    }

    /// Remove the entry only if it was stored under exactly `name`
    ///
    /// `a.jpg` does not remove an entry linked as `A.JPG`.
    pub fn remove_exact(&mut self, name: &str) -> Option<ContentToken> {
        let key = crate::types::normalize_name(name);
        let same_case = self
            .entries
            .get(&key)
            .is_some_and(|(stored, _)| stored.as_str() == name);
        if !same_case {
            return None;
        }
        self.entries.remove(&key).map(|(_, token)| token)
    }

    /// Display names of every entry
    pub fn names(&self) -> Vec<FileName> {
        self.entries.values().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the whole file atomically
    ///
    /// The table is written to `link.json.tmp` next to the target and then
    /// renamed over it, so readers never observe a half-written table.
    pub async fn persist(&self) -> Result<()> {
        let stored: BTreeMap<&str, &str> = self
            .entries
            .values()
            .map(|(name, token)| (name.as_str(), token.as_str()))
            .collect();
        let json = serde_json::to_vec_pretty(&stored)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::fs(parent, e))?;
        }

        let tmp = self.path.with_file_name(LINK_TABLE_TMP_FILE);
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| SyncError::fs(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SyncError::fs(&self.path, e))?;

        Ok(())
    }
}
