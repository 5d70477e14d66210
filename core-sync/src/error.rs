use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Failed to link {}: {message}", path.display())]
    Link { path: PathBuf, message: String },

    #[error("Failed to enumerate remote files: {0}")]
    Enumeration(String),

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Sync already in progress for configuration {config_id}")]
    SyncInProgress { config_id: String },

    #[error("Folder configuration {config_id} not found")]
    ConfigNotFound { config_id: String },

    #[error("Duplicate file names must be confirmed before syncing configuration {config_id}")]
    DuplicatesPending { config_id: String },

    #[error("Remote files for configuration {config_id} have not been loaded")]
    RemoteNotLoaded { config_id: String },

    #[error("Invalid content token: {0:?}")]
    InvalidToken(String),

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),
}

impl SyncError {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
