//! # Sync Engine
//!
//! Mirrors a remote media catalog into a local folder.
//!
//! ## Overview
//!
//! Remote files are identified by an opaque content token. Each token is
//! downloaded once into a content-addressed store (`<folder>/data/<token>`)
//! and exposed under its human-readable name through a hard link, a
//! copy-on-write clone or a plain copy. A persisted link table records which
//! name points at which token so later syncs only touch what changed.
//!
//! ## Components
//!
//! - **Task Queue** (`task_queue`): bounded-concurrency job runner with graceful stop
//! - **Content Store** (`content_store`): token-addressed blobs with fetch coalescing
//! - **Downloader** (`downloader`): streaming download with atomic rename
//! - **Linker** (`linker`): hard link, reflink and byte-copy fallback chain
//! - **Link Table** (`link_table`): persisted `name -> token` map
//! - **Remote Index** (`remote_index`): enumeration results and duplicate names
//! - **Progress** (`progress`): live counters and the persisted summary
//! - **Folder Configurations** (`folder_config`): SQLite-backed folder settings
//! - **Maintenance** (`maintenance`): layout, missing files and cleanup
//! - **Sync Coordinator** (`coordinator`): the state machine tying it together

pub mod content_store;
pub mod coordinator;
pub mod downloader;
pub mod error;
pub mod folder_config;
pub mod link_table;
pub mod linker;
pub mod maintenance;
pub mod progress;
pub mod remote_index;
pub mod task_queue;
pub mod types;

pub use content_store::{ContentStore, EnsureOutcome};
pub use coordinator::{LoadReport, SyncCoordinator, SyncOutcome, SyncState};
pub use downloader::Downloader;
pub use error::{Result, SyncError};
pub use folder_config::{FolderConfig, FolderConfigRepository, SqliteFolderConfigRepository};
pub use link_table::{LinkTable, SharedLinkTable};
pub use linker::{LinkStrategy, Linker};
pub use maintenance::CleanupReport;
pub use progress::{SyncProgress, SyncSummary};
pub use remote_index::{DuplicateName, RemoteFileIndex};
pub use task_queue::{Job, JobError, QueueHandle, QueueReport, TaskQueue};
pub use types::{ContentToken, FileName, FileRef};
