//! # Folder Configurations
//!
//! A folder configuration ties one local directory to the remote catalog and
//! carries the summary of its last sync.
//!
//! ## Layout
//!
//! ```text
//! <folder_path>/
//! ├── Cover.jpg            named entries (links)
//! ├── notes.pdf
//! └── data/
//!     ├── link.json        name -> token table
//!     ├── tok_0a1b2c       blobs
//!     └── tok_99ff.download
//! ```

use crate::link_table::LINK_TABLE_FILE;
use crate::progress::SyncSummary;
use crate::types::DATA_DIR_NAME;
use crate::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::path::PathBuf;

/// A synced folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderConfig {
    pub id: String,
    pub label: String,
    pub folder_path: PathBuf,
    /// Overrides the global setting when set
    pub keep_old_files: Option<bool>,
    pub last_sync: Option<SyncSummary>,
}

impl FolderConfig {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        folder_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            folder_path: folder_path.into(),
            keep_old_files: None,
            last_sync: None,
        }
    }

    pub fn with_keep_old_files(mut self, keep: bool) -> Self {
        self.keep_old_files = Some(keep);
        self
    }

    /// `<folder>/data`
    pub fn data_dir(&self) -> PathBuf {
        self.folder_path.join(DATA_DIR_NAME)
    }

    /// Blobs live next to the link table
    pub fn content_dir(&self) -> PathBuf {
        self.data_dir()
    }

    pub fn link_table_path(&self) -> PathBuf {
        self.data_dir().join(LINK_TABLE_FILE)
    }

    /// Per-folder override, else the global default
    pub fn effective_keep_old_files(&self, global_default: bool) -> bool {
        self.keep_old_files.unwrap_or(global_default)
    }
}

// ============================================================================
// Repository Trait
// ============================================================================

/// Persistence of folder configurations
#[async_trait]
pub trait FolderConfigRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the id already exists or the database operation fails
    async fn insert(&self, config: &FolderConfig) -> Result<()>;

    /// # Errors
    ///
    /// Returns [`SyncError::ConfigNotFound`] if the configuration doesn't exist
    async fn update(&self, config: &FolderConfig) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<FolderConfig>>;

    /// All configurations ordered by label
    async fn list(&self) -> Result<Vec<FolderConfig>>;

    /// # Errors
    ///
    /// Returns [`SyncError::ConfigNotFound`] if the configuration doesn't exist
    async fn delete(&self, id: &str) -> Result<()>;

    /// Store the outcome of the last sync
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConfigNotFound`] if the configuration doesn't exist
    async fn save_last_sync(&self, id: &str, summary: &SyncSummary) -> Result<()>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteFolderConfigRepository {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct FolderConfigRow {
    id: String,
    label: String,
    folder_path: String,
    keep_old_files: Option<bool>,
    last_sync: Option<String>,
}

impl TryFrom<FolderConfigRow> for FolderConfig {
    type Error = SyncError;

    fn try_from(row: FolderConfigRow) -> Result<Self> {
        let last_sync = row
            .last_sync
            .as_deref()
            .map(serde_json::from_str::<SyncSummary>)
            .transpose()?;

        Ok(FolderConfig {
            id: row.id,
            label: row.label,
            folder_path: PathBuf::from(row.folder_path),
            keep_old_files: row.keep_old_files,
            last_sync,
        })
    }
}

fn encode_last_sync(summary: Option<&SyncSummary>) -> Result<Option<String>> {
    summary
        .map(serde_json::to_string)
        .transpose()
        .map_err(SyncError::from)
}

impl SqliteFolderConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `folder_configs` table if missing
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS folder_configs (
                id TEXT PRIMARY KEY NOT NULL,
                label TEXT NOT NULL,
                folder_path TEXT NOT NULL,
                keep_old_files INTEGER,
                last_sync TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl FolderConfigRepository for SqliteFolderConfigRepository {
    async fn insert(&self, config: &FolderConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO folder_configs (id, label, folder_path, keep_old_files, last_sync)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&config.id)
        .bind(&config.label)
        .bind(config.folder_path.to_string_lossy().into_owned())
        .bind(config.keep_old_files)
        .bind(encode_last_sync(config.last_sync.as_ref())?)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn update(&self, config: &FolderConfig) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE folder_configs SET
                label = ?,
                folder_path = ?,
                keep_old_files = ?,
                last_sync = ?
            WHERE id = ?
            "#,
        )
        .bind(&config.label)
        .bind(config.folder_path.to_string_lossy().into_owned())
        .bind(config.keep_old_files)
        .bind(encode_last_sync(config.last_sync.as_ref())?)
        .bind(&config.id)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::ConfigNotFound {
                config_id: config.id.clone(),
            });
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<FolderConfig>> {
        let row = sqlx::query_as::<_, FolderConfigRow>(
            r#"
            SELECT id, label, folder_path, keep_old_files, last_sync
            FROM folder_configs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.map(FolderConfig::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<FolderConfig>> {
        let rows = sqlx::query_as::<_, FolderConfigRow>(
            r#"
            SELECT id, label, folder_path, keep_old_files, last_sync
            FROM folder_configs
            ORDER BY label, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.into_iter().map(FolderConfig::try_from).collect()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM folder_configs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::ConfigNotFound {
                config_id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn save_last_sync(&self, id: &str, summary: &SyncSummary) -> Result<()> {
        let result = sqlx::query("UPDATE folder_configs SET last_sync = ? WHERE id = ?")
            .bind(serde_json::to_string(summary)?)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(SyncError::ConfigNotFound {
                config_id: id.to_string(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_repo() -> SqliteFolderConfigRepository {
        // One connection, otherwise every connection gets its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let repo = SqliteFolderConfigRepository::new(pool);
        repo.initialize().await.unwrap();
        repo
    }

    fn summary() -> SyncSummary {
        SyncSummary {
            total: 5,
            downloaded: 3,
            failed: 1,
            already_exists: 1,
            stopped: false,
            start_time: "2024-05-01 09:00:00".to_string(),
            end_time: "2024-05-01 09:02:10".to_string(),
        }
    }

    #[test]
    fn test_layout_helpers() {
        let config = FolderConfig::new("cfg-1", "Photos", "/srv/photos");
        assert_eq!(config.data_dir(), PathBuf::from("/srv/photos/data"));
        assert_eq!(config.content_dir(), config.data_dir());
        assert_eq!(
            config.link_table_path(),
            PathBuf::from("/srv/photos/data/link.json")
        );

        assert!(config.effective_keep_old_files(true));
        assert!(!config.with_keep_old_files(false).effective_keep_old_files(true));
    }

    #[tokio::test]
    async fn test_insert_and_find_by_id() {
        let repo = create_test_repo().await;
        let config = FolderConfig::new("cfg-1", "Photos", "/srv/photos").with_keep_old_files(true);

        repo.insert(&config).await.unwrap();

        let found = repo.find_by_id("cfg-1").await.unwrap().unwrap();
        assert_eq!(found, config);
        assert!(repo.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let repo = create_test_repo().await;
        let config = FolderConfig::new("cfg-1", "Photos", "/srv/photos");

        repo.insert(&config).await.unwrap();
        assert!(matches!(
            repo.insert(&config).await,
            Err(SyncError::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_list() {
        let repo = create_test_repo().await;
        repo.insert(&FolderConfig::new("cfg-2", "Videos", "/srv/videos"))
            .await
            .unwrap();
        let mut photos = FolderConfig::new("cfg-1", "Photos", "/srv/photos");
        repo.insert(&photos).await.unwrap();

        photos.label = "Album art".to_string();
        photos.last_sync = Some(summary());
        repo.update(&photos).await.unwrap();

        let labels: Vec<String> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.label)
            .collect();
        assert_eq!(labels, vec!["Album art", "Videos"]);

        let missing = FolderConfig::new("nope", "x", "/tmp/x");
        assert!(matches!(
            repo.update(&missing).await,
            Err(SyncError::ConfigNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_save_last_sync() {
        let repo = create_test_repo().await;
        repo.insert(&FolderConfig::new("cfg-1", "Photos", "/srv/photos"))
            .await
            .unwrap();

        repo.save_last_sync("cfg-1", &summary()).await.unwrap();

        let found = repo.find_by_id("cfg-1").await.unwrap().unwrap();
        assert_eq!(found.last_sync, Some(summary()));
        assert!(matches!(
            repo.save_last_sync("nope", &summary()).await,
            Err(SyncError::ConfigNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = create_test_repo().await;
        repo.insert(&FolderConfig::new("cfg-1", "Photos", "/srv/photos"))
            .await
            .unwrap();

        repo.delete("cfg-1").await.unwrap();
        assert!(repo.find_by_id("cfg-1").await.unwrap().is_none());
        assert!(matches!(
            repo.delete("cfg-1").await,
            Err(SyncError::ConfigNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_last_sync_is_an_error() {
        let repo = create_test_repo().await;
        sqlx::query(
            "INSERT INTO folder_configs (id, label, folder_path, last_sync) VALUES (?, ?, ?, ?)",
        )
        .bind("cfg-1")
        .bind("Photos")
        .bind("/srv/photos")
        .bind("{broken")
        .execute(&repo.pool)
        .await
        .unwrap();

        assert!(matches!(
            repo.find_by_id("cfg-1").await,
            Err(SyncError::Serialization(_))
        ));
    }
}
