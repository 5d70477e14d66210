//! # Core Configuration Module
//!
//! Provides configuration management for the sync engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all dependencies and settings the engine needs. It
//! enforces fail-fast validation so a missing bridge is reported when the host
//! wires the engine up, not halfway through a sync.
//!
//! ## Required Dependencies
//!
//! - `MediaCatalog` - The remote library listing
//! - `SettingsStore` - User preferences (`user_properties.*` keys)
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `HttpClient` - Streaming downloads (desktop default: reqwest)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/mirror.db")
//!     .catalog(Arc::new(MyCatalog::new(api_key)))
//!     .settings_store(Arc::new(settings))
//!     .download_timeout(std::time::Duration::from_secs(600))
//!     .build()?;
//!
//! let settings = SyncSettings::load(config.settings_store.as_ref()).await?;
//! ```

use crate::error::{Error, Result};
use crate::events::{EventBus, DEFAULT_EVENT_BUFFER_SIZE};
use bridge_traits::{HttpClient, MediaCatalog, SettingsStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Settings key for the number of concurrent downloads per sync
pub const SIMULTANEOUS_DOWNLOADS_KEY: &str = "user_properties.simultaneous_downloads";

/// Settings key for the global "keep files deleted remotely" preference
pub const KEEP_OLD_FILES_KEY: &str = "user_properties.keep_old_files";

/// Upper bound applied to the stored download count
pub const MAX_SIMULTANEOUS_DOWNLOADS: usize = 32;

/// Core configuration for the sync engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database holding folder configurations
    pub database_path: PathBuf,

    /// Remote catalog client (required)
    pub catalog: Arc<dyn MediaCatalog>,

    /// User preferences storage (required)
    pub settings_store: Arc<dyn SettingsStore>,

    /// HTTP client used for downloads
    pub http_client: Arc<dyn HttpClient>,

    /// Event bus shared with the host
    pub event_bus: EventBus,

    /// Upper bound for establishing each download, `None` for no limit
    pub download_timeout: Option<Duration>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("catalog", &"MediaCatalog { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field("http_client", &"HttpClient { ... }")
            .field("event_bus", &self.event_bus)
            .field("download_timeout", &self.download_timeout)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.download_timeout == Some(Duration::ZERO) {
            return Err(Error::Config(
                "Download timeout must be greater than zero. Omit it to disable the limit."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn catalog_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "MediaCatalog".to_string(),
        message: "MediaCatalog implementation is required to enumerate remote files. \
                  Inject the client for the remote library with .catalog()."
            .to_string(),
    }
}

fn settings_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "SettingsStore implementation is required for user preferences. \
                  Desktop: use bridge_desktop::SqliteSettingsStore. \
                  Other hosts: inject the host's own preferences store."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to create default HttpClient: {}", e)))?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required to download files. \
                  Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestHttpClient."
            .to_string(),
    })
}

/// Builder for [`CoreConfig`]
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    catalog: Option<Arc<dyn MediaCatalog>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    http_client: Option<Arc<dyn HttpClient>>,
    event_bus: Option<EventBus>,
    event_buffer_size: Option<usize>,
    download_timeout: Option<Duration>,
}

impl CoreConfigBuilder {
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn MediaCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Share an existing bus instead of creating one
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the database path is missing or a value is invalid
    /// - [`Error::CapabilityMissing`] when a required bridge was not injected
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let catalog = self.catalog.ok_or_else(catalog_missing_error)?;
        let settings_store = self.settings_store.ok_or_else(settings_store_missing_error)?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let event_bus = match (self.event_bus, self.event_buffer_size) {
            (Some(bus), _) => bus,
            (None, Some(0)) => {
                return Err(Error::Config(
                    "Event buffer size must be greater than 0".to_string(),
                ))
            }
            (None, size) => EventBus::new(size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE)),
        };

        let config = CoreConfig {
            database_path,
            catalog,
            settings_store,
            http_client,
            event_bus,
            download_timeout: self.download_timeout,
        };

        config.validate()?;

        Ok(config)
    }
}

// ============================================================================
// Sync Settings
// ============================================================================

/// User preferences that shape a sync, read fresh at the start of each one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Worker count for the download queue, between 1 and
    /// [`MAX_SIMULTANEOUS_DOWNLOADS`]
    pub simultaneous_downloads: usize,
    /// Keep local files whose remote counterpart disappeared
    pub keep_old_files: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            simultaneous_downloads: 1,
            keep_old_files: false,
        }
    }
}

impl SyncSettings {
    /// Reads the `user_properties.*` keys, falling back to defaults for
    /// missing values. Download counts are clamped to
    /// `1..=MAX_SIMULTANEOUS_DOWNLOADS`.
    pub async fn load(store: &dyn SettingsStore) -> Result<Self> {
        let defaults = Self::default();

        let simultaneous_downloads = store
            .get_i64(SIMULTANEOUS_DOWNLOADS_KEY)
            .await
            .map_err(|e| {
                Error::Internal(format!("Failed to read {}: {}", SIMULTANEOUS_DOWNLOADS_KEY, e))
            })?
            .map(|n| n.clamp(1, MAX_SIMULTANEOUS_DOWNLOADS as i64) as usize)
            .unwrap_or(defaults.simultaneous_downloads);

        let keep_old_files = store
            .get_bool(KEEP_OLD_FILES_KEY)
            .await
            .map_err(|e| Error::Internal(format!("Failed to read {}: {}", KEEP_OLD_FILES_KEY, e)))?
            .unwrap_or(defaults.keep_old_files);

        debug!(simultaneous_downloads, keep_old_files, "Loaded sync settings");

        Ok(Self {
            simultaneous_downloads,
            keep_old_files,
        })
    }
}
