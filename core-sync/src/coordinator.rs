//! # Sync Coordinator
//!
//! Drives a folder through enumeration, download and cleanup.
//!
//! ## Workflow
//!
//! ```text
//! Idle ─> Enumerating ─┬─> Queued ─> Downloading ─> Finalizing ─> Idle
//!                      │                  │
//!                      │                  └─> Stopping ─> Finalizing
//!                      └─> AwaitingConfirmation ─(confirm)─> Queued
//! ```
//!
//! 1. **Enumerating**: list every resource and file of the remote catalog
//!    into a [`RemoteFileIndex`]. Name collisions across tokens block the
//!    sync until the operator confirms them.
//! 2. **Queued**: deduplicate files by (name, token), snapshot which blobs
//!    are already present and, unless old files are kept, delete local names
//!    the remote no longer has.
//! 3. **Downloading**: a [`TaskQueue`] fetches missing blobs through the
//!    shared [`ContentStore`] and links every name to its blob, persisting
//!    the link table after each success.
//! 4. **Finalizing**: reconcile counters, store the summary on the folder
//!    configuration, emit [`SyncEvent::Finished`] and delete blobs and links
//!    absent from the remote.
//!
//! Only one sync runs per configuration. [`SyncCoordinator::stop_sync`]
//! drops the jobs that have not started; running jobs finish normally.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{FolderConfig, SyncCoordinator, SyncOutcome};
//! use std::sync::Arc;
//!
//! let coordinator = Arc::new(SyncCoordinator::from_config(&core_config).await?);
//! coordinator
//!     .register_config(FolderConfig::new("photos", "Photos", "/srv/photos"))
//!     .await?;
//!
//! match coordinator.start_sync("photos").await? {
//!     SyncOutcome::Finished(summary) => println!("{} downloaded", summary.downloaded),
//!     SyncOutcome::AwaitingConfirmation(duplicates) => {
//!         // show duplicates, then:
//!         coordinator.confirm_duplicates("photos").await?;
//!         coordinator.start_download("photos").await?;
//!     }
//! }
//! ```

use crate::content_store::ContentStore;
use crate::downloader::Downloader;
use crate::folder_config::{FolderConfig, FolderConfigRepository, SqliteFolderConfigRepository};
use crate::link_table::{LinkTable, SharedLinkTable};
use crate::linker::Linker;
use crate::maintenance::{self, CleanupReport};
use crate::progress::{SyncProgress, SyncSummary};
use crate::remote_index::{DuplicateName, RemoteFileIndex};
use crate::task_queue::{job, Job, JobError, QueueHandle, QueueReport, TaskQueue};
use crate::types::{ContentToken, FileName, FileRef};
use crate::{Result, SyncError};
use bridge_traits::catalog::MediaCatalog;
use bridge_traits::storage::SettingsStore;
use chrono::Local;
use core_runtime::config::{CoreConfig, SyncSettings};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Where a folder is in its sync lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Enumerating,
    AwaitingConfirmation,
    Queued,
    Downloading,
    Finalizing,
    Stopping,
}

/// Result of [`SyncCoordinator::start_sync`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The download phase ran to completion or was stopped
    Finished(SyncSummary),
    /// Name collisions must be confirmed before downloading
    AwaitingConfirmation(Vec<DuplicateName>),
}

/// Result of enumerating the remote catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// File values found, including repeats of the same token
    pub files: usize,
    /// Distinct content tokens
    pub tokens: usize,
    pub duplicates: Vec<DuplicateName>,
}

type SharedProgress = Arc<StdMutex<SyncProgress>>;

fn lock_progress(progress: &SharedProgress) -> MutexGuard<'_, SyncProgress> {
    progress.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry entry for a configuration with work in progress
struct ActiveSync {
    state: SyncState,
    queue: Option<QueueHandle>,
    progress: Option<SharedProgress>,
}

impl ActiveSync {
    fn new(state: SyncState) -> Self {
        Self {
            state,
            queue: None,
            progress: None,
        }
    }
}

/// How a single job satisfied its file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Downloaded,
    AlreadyExists,
}

pub struct SyncCoordinator {
    catalog: Arc<dyn MediaCatalog>,
    settings_store: Arc<dyn SettingsStore>,
    downloader: Downloader,
    linker: Linker,
    event_bus: EventBus,
    repository: Arc<dyn FolderConfigRepository>,

    /// Configurations currently enumerating, downloading or finalizing
    active_syncs: Arc<Mutex<HashMap<String, ActiveSync>>>,

    /// Enumeration results, kept until the download phase consumes them
    remote_indexes: Arc<Mutex<HashMap<String, RemoteFileIndex>>>,

    /// One store per configuration so fetch coalescing spans syncs
    content_stores: Arc<Mutex<HashMap<String, ContentStore>>>,
}

impl SyncCoordinator {
    /// Create a coordinator over an existing repository
    pub fn new(config: &CoreConfig, repository: Arc<dyn FolderConfigRepository>) -> Self {
        Self {
            catalog: Arc::clone(&config.catalog),
            settings_store: Arc::clone(&config.settings_store),
            downloader: Downloader::new(Arc::clone(&config.http_client))
                .with_timeout(config.download_timeout),
            linker: Linker::default(),
            event_bus: config.event_bus.clone(),
            repository,
            active_syncs: Arc::new(Mutex::new(HashMap::new())),
            remote_indexes: Arc::new(Mutex::new(HashMap::new())),
            content_stores: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open the SQLite database at `config.database_path` and create the
    /// folder configuration table if needed
    pub async fn from_config(config: &CoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        let repository = SqliteFolderConfigRepository::new(pool);
        repository.initialize().await?;

        Ok(Self::new(config, Arc::new(repository)))
    }

    /// Replace the link strategy order
    pub fn with_linker(mut self, linker: Linker) -> Self {
        self.linker = linker;
        self
    }

    // ========================================================================
    // Folder configurations
    // ========================================================================

    pub async fn register_config(&self, config: FolderConfig) -> Result<()> {
        self.repository.insert(&config).await?;
        info!(config_id = %config.id, folder = %config.folder_path.display(), "Registered folder");
        Ok(())
    }

    pub async fn update_config(&self, config: FolderConfig) -> Result<()> {
        self.repository.update(&config).await
    }

    /// # Errors
    ///
    /// Returns [`SyncError::ConfigNotFound`] for unknown ids
    pub async fn get_config(&self, config_id: &str) -> Result<FolderConfig> {
        self.repository
            .find_by_id(config_id)
            .await?
            .ok_or_else(|| SyncError::ConfigNotFound {
                config_id: config_id.to_string(),
            })
    }

    pub async fn list_configs(&self) -> Result<Vec<FolderConfig>> {
        self.repository.list().await
    }

    // ========================================================================
    // State queries
    // ========================================================================

    pub async fn sync_state(&self, config_id: &str) -> SyncState {
        if let Some(active) = self.active_syncs.lock().await.get(config_id) {
            return active.state;
        }

        let awaiting = self
            .remote_indexes
            .lock()
            .await
            .get(config_id)
            .is_some_and(RemoteFileIndex::has_duplicates);

        if awaiting {
            SyncState::AwaitingConfirmation
        } else {
            SyncState::Idle
        }
    }

    pub async fn is_sync_active(&self, config_id: &str) -> bool {
        self.active_syncs.lock().await.contains_key(config_id)
    }

    /// Snapshot of the running sync's counters
    pub async fn progress(&self, config_id: &str) -> Option<SyncProgress> {
        self.active_syncs
            .lock()
            .await
            .get(config_id)
            .and_then(|active| active.progress.as_ref())
            .map(|progress| lock_progress(progress).clone())
    }

    /// Name collisions of the last enumeration
    pub async fn duplicates(&self, config_id: &str) -> Vec<DuplicateName> {
        self.remote_indexes
            .lock()
            .await
            .get(config_id)
            .map(RemoteFileIndex::duplicates)
            .unwrap_or_default()
    }

    // ========================================================================
    // Sync lifecycle
    // ========================================================================

    /// Enumerate the remote catalog without downloading anything
    #[instrument(skip(self))]
    pub async fn load_remote_files(&self, config_id: &str) -> Result<LoadReport> {
        let config = self.get_config(config_id).await?;
        self.begin(config_id, SyncState::Enumerating).await?;

        let result = self.enumerate(&config).await;

        self.end(config_id).await;
        result
    }

    /// Enumerate, then download unless duplicates need confirmation
    #[instrument(skip(self))]
    pub async fn start_sync(&self, config_id: &str) -> Result<SyncOutcome> {
        let config = self.get_config(config_id).await?;
        self.begin(config_id, SyncState::Enumerating).await?;

        let result = match self.enumerate(&config).await {
            Ok(report) if !report.duplicates.is_empty() => {
                Ok(SyncOutcome::AwaitingConfirmation(report.duplicates))
            }
            Ok(_) => self.download_phase(&config).await.map(SyncOutcome::Finished),
            Err(e) => Err(e),
        };

        self.end(config_id).await;
        result
    }

    /// Run [`start_sync`](Self::start_sync) on a background task
    pub fn spawn_sync(self: &Arc<Self>, config_id: impl Into<String>) -> JoinHandle<Result<SyncOutcome>> {
        let coordinator = Arc::clone(self);
        let config_id = config_id.into();

        tokio::spawn(async move {
            let result = coordinator.start_sync(&config_id).await;
            if let Err(e) = &result {
                error!(config_id = %config_id, error = %e, "Sync task failed");
            }
            result
        })
    }

    /// Download phase over the already loaded remote files
    ///
    /// # Errors
    ///
    /// - [`SyncError::RemoteNotLoaded`] if nothing was enumerated
    /// - [`SyncError::DuplicatesPending`] if collisions were not confirmed
    #[instrument(skip(self))]
    pub async fn start_download(&self, config_id: &str) -> Result<SyncSummary> {
        let config = self.get_config(config_id).await?;
        self.begin(config_id, SyncState::Queued).await?;

        let result = self.download_phase(&config).await;

        self.end(config_id).await;
        result
    }

    /// Accept name collisions and recompute which files are missing
    ///
    /// Does not enumerate again.
    #[instrument(skip(self))]
    pub async fn confirm_duplicates(&self, config_id: &str) -> Result<Vec<FileRef>> {
        let config = self.get_config(config_id).await?;

        {
            let mut indexes = self.remote_indexes.lock().await;
            let index = indexes
                .get_mut(config_id)
                .ok_or_else(|| not_loaded(config_id))?;
            index.clear_duplicates();
        }

        info!(config_id, "Duplicate names confirmed");
        self.evaluate_missing(&config).await
    }

    /// Drop every job that has not started yet
    ///
    /// Returns the number of dropped jobs; 0 when no download is running.
    #[instrument(skip(self))]
    pub async fn stop_sync(&self, config_id: &str) -> usize {
        let mut active_syncs = self.active_syncs.lock().await;
        let Some(active) = active_syncs.get_mut(config_id) else {
            debug!("No active sync to stop");
            return 0;
        };
        let Some(queue) = &active.queue else {
            debug!(state = ?active.state, "Sync has no download queue yet");
            return 0;
        };

        let dropped = queue.stop();
        active.state = SyncState::Stopping;

        let event = active.progress.as_ref().map(|progress| {
            let mut progress = lock_progress(progress);
            progress.is_stopping = true;
            progress.to_event(config_id)
        });
        drop(active_syncs);

        if let Some(event) = event {
            self.emit(event);
        }

        info!(dropped, "Stop requested");
        dropped
    }

    // ========================================================================
    // Maintenance commands
    // ========================================================================

    /// Remote files with no local blob or name
    #[instrument(skip(self))]
    pub async fn check_missing_files(&self, config_id: &str) -> Result<Vec<FileRef>> {
        let config = self.get_config(config_id).await?;
        self.evaluate_missing(&config).await
    }

    /// Delete local blobs and names absent from the last enumeration
    #[instrument(skip(self))]
    pub async fn delete_remote_absent(&self, config_id: &str) -> Result<CleanupReport> {
        let config = self.get_config(config_id).await?;
        self.ensure_idle(config_id).await?;

        let remote = {
            let mut indexes = self.remote_indexes.lock().await;
            let index = indexes
                .get_mut(config_id)
                .ok_or_else(|| not_loaded(config_id))?;
            index.all_files().to_vec()
        };

        let report = maintenance::delete_remote_absent(&config.folder_path, &remote).await?;
        self.emit(SyncEvent::CleanupCompleted {
            config_id: config_id.to_string(),
            blobs_removed: report.blobs_removed,
            links_removed: report.links_removed,
        });
        Ok(report)
    }

    /// Remove the whole local folder, blobs included
    #[instrument(skip(self))]
    pub async fn delete_local_folder(&self, config_id: &str) -> Result<()> {
        let config = self.get_config(config_id).await?;
        self.ensure_idle(config_id).await?;

        self.content_stores.lock().await.remove(config_id);
        maintenance::delete_folder(&config.folder_path).await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn emit(&self, event: SyncEvent) {
        self.event_bus.emit(CoreEvent::Sync(event)).ok();
    }

    /// Claim the registry slot for `config_id`
    async fn begin(&self, config_id: &str, state: SyncState) -> Result<()> {
        let mut active_syncs = self.active_syncs.lock().await;
        if active_syncs.contains_key(config_id) {
            return Err(SyncError::SyncInProgress {
                config_id: config_id.to_string(),
            });
        }
        active_syncs.insert(config_id.to_string(), ActiveSync::new(state));
        Ok(())
    }

    async fn end(&self, config_id: &str) {
        self.active_syncs.lock().await.remove(config_id);
    }

    async fn set_state(&self, config_id: &str, state: SyncState) {
        if let Some(active) = self.active_syncs.lock().await.get_mut(config_id) {
            active.state = state;
        }
    }

    async fn ensure_idle(&self, config_id: &str) -> Result<()> {
        if self.is_sync_active(config_id).await {
            return Err(SyncError::SyncInProgress {
                config_id: config_id.to_string(),
            });
        }
        Ok(())
    }

    async fn content_store(&self, config: &FolderConfig) -> ContentStore {
        let root = config.content_dir();
        let mut stores = self.content_stores.lock().await;

        match stores.get(&config.id) {
            Some(store) if store.root() == root => store.clone(),
            _ => {
                let store = ContentStore::new(root);
                stores.insert(config.id.clone(), store.clone());
                store
            }
        }
    }

    async fn enumerate(&self, config: &FolderConfig) -> Result<LoadReport> {
        // A failed enumeration must not leave a previous or partial index behind
        self.remote_indexes.lock().await.remove(&config.id);

        let mut index = match self.collect_remote(&config.id).await {
            Ok(index) => index,
            Err(e) => {
                let message = e.to_string();
                error!(config_id = %config.id, error = %message, "Enumeration failed");
                self.emit(SyncEvent::EnumerationFailed {
                    config_id: config.id.clone(),
                    message: message.clone(),
                });
                return Err(SyncError::Enumeration(message));
            }
        };

        let report = LoadReport {
            files: index.all_files().len(),
            tokens: index.token_count(),
            duplicates: index.duplicates(),
        };
        self.remote_indexes
            .lock()
            .await
            .insert(config.id.clone(), index);

        info!(
            config_id = %config.id,
            files = report.files,
            tokens = report.tokens,
            duplicates = report.duplicates.len(),
            "Remote files loaded"
        );

        if report.duplicates.is_empty() {
            self.evaluate_missing(config).await?;
        } else {
            self.set_state(&config.id, SyncState::AwaitingConfirmation)
                .await;
            self.emit(SyncEvent::DuplicatesFound {
                config_id: config.id.clone(),
                names: report.duplicates.iter().map(|d| d.name.clone()).collect(),
            });
        }

        Ok(report)
    }

    async fn collect_remote(&self, config_id: &str) -> Result<RemoteFileIndex> {
        let resources = self.catalog.list_resources().await?;
        let count = resources.len();
        let mut index = RemoteFileIndex::new();

        for (position, resource) in resources.iter().enumerate() {
            self.emit(SyncEvent::ResourceLoading {
                config_id: config_id.to_string(),
                resource_id: resource.id.clone(),
                resource_name: resource.label.clone().unwrap_or_else(|| resource.name.clone()),
                index: position + 1,
                count,
            });

            let files = self.catalog.list_files(resource).await?;
            let mut added = 0;

            for file in files {
                let (token, name) = match (ContentToken::new(file.token), FileName::new(file.name)) {
                    (Ok(token), Ok(name)) => (token, name),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!(resource = %resource.id, error = %e, "Skipping remote file");
                        continue;
                    }
                };

                let url = self.catalog.file_url(token.as_str(), name.as_str());
                index.add(FileRef::new(url, token, name), file.occurrence);
                added += 1;
            }

            debug!(resource = %resource.id, files = added, "Resource enumerated");
            self.emit(SyncEvent::ResourceLoaded {
                config_id: config_id.to_string(),
                resource_id: resource.id.clone(),
                files: added,
            });
        }

        Ok(index)
    }

    async fn evaluate_missing(&self, config: &FolderConfig) -> Result<Vec<FileRef>> {
        let remote = {
            let mut indexes = self.remote_indexes.lock().await;
            let index = indexes
                .get_mut(&config.id)
                .ok_or_else(|| not_loaded(&config.id))?;
            index.unique_files().to_vec()
        };

        let missing = maintenance::missing_files(&config.folder_path, &remote).await?;
        self.emit(SyncEvent::MissingFiles {
            config_id: config.id.clone(),
            count: missing.len(),
        });
        Ok(missing)
    }

    async fn download_phase(&self, config: &FolderConfig) -> Result<SyncSummary> {
        let config_id = config.id.as_str();
        self.set_state(config_id, SyncState::Queued).await;

        let settings = SyncSettings::load(self.settings_store.as_ref()).await?;
        let keep_old_files = config.effective_keep_old_files(settings.keep_old_files);

        let (files, remote) = {
            let mut indexes = self.remote_indexes.lock().await;
            let index = indexes
                .get_mut(config_id)
                .ok_or_else(|| not_loaded(config_id))?;
            if index.has_duplicates() {
                return Err(SyncError::DuplicatesPending {
                    config_id: config_id.to_string(),
                });
            }
            (index.unique_files().to_vec(), index.all_files().to_vec())
        };

        maintenance::ensure_layout(&config.folder_path).await?;
        let store = self.content_store(config).await;
        let present: HashSet<ContentToken> = store.list_tokens().await?.into_iter().collect();

        let mut link_table = LinkTable::load(config.link_table_path()).await?;
        if !keep_old_files {
            let desired: HashSet<String> = files
                .iter()
                .map(|file| file.name.as_str().to_string())
                .collect();
            let pruned =
                maintenance::prune_stale_links(&config.folder_path, &desired, &mut link_table)
                    .await?;
            link_table.persist().await?;
            debug!(config_id, pruned, "Pruned names absent from remote");
        }

        let progress: SharedProgress = Arc::new(StdMutex::new(SyncProgress::new(files.len() as u64)));
        let context = Arc::new(DownloadContext {
            config_id: config_id.to_string(),
            base_dir: config.folder_path.clone(),
            store,
            downloader: self.downloader.clone(),
            linker: self.linker.clone(),
            link_table: link_table.into_shared(),
            present,
            progress: Arc::clone(&progress),
            queue: OnceLock::new(),
            event_bus: self.event_bus.clone(),
        });

        let jobs: Vec<Job> = files
            .into_iter()
            .map(|file| {
                let context = Arc::clone(&context);
                job(move || async move { context.run(file).await })
            })
            .collect();

        let queue = TaskQueue::new(jobs, settings.simultaneous_downloads);
        let handle = queue.handle();
        // Set before any worker exists
        let _ = context.queue.set(handle.clone());

        if let Some(active) = self.active_syncs.lock().await.get_mut(config_id) {
            active.state = SyncState::Downloading;
            active.queue = Some(handle);
            active.progress = Some(Arc::clone(&progress));
        }

        let total = lock_progress(&progress).total;
        info!(
            config_id,
            total,
            concurrency = queue.concurrency(),
            keep_old_files,
            strategies = ?self.linker.strategies(),
            "Download started"
        );
        self.emit(SyncEvent::Started {
            config_id: config_id.to_string(),
            total,
            concurrency: queue.concurrency(),
        });

        let on_error = Arc::clone(&context);
        let report = queue.run(move |err| on_error.job_failed(err)).await;

        self.finalize(config, &progress, report, keep_old_files, &remote)
            .await
    }

    async fn finalize(
        &self,
        config: &FolderConfig,
        progress: &SharedProgress,
        report: QueueReport,
        keep_old_files: bool,
        remote: &[FileRef],
    ) -> Result<SyncSummary> {
        let config_id = config.id.as_str();
        self.set_state(config_id, SyncState::Finalizing).await;

        let stopped = report.dropped > 0;
        let summary = {
            let mut progress = lock_progress(progress);
            progress.downloading = false;
            progress.is_stopping = true;
            progress.total = progress.total.saturating_sub(report.dropped as u64);

            if !progress.is_reconciled() {
                warn!(
                    config_id,
                    total = progress.total,
                    processed = progress.processed(),
                    "Sync counters do not add up"
                );
            }
            progress.finish(Local::now(), stopped)
        };

        if let Err(e) = self.repository.save_last_sync(config_id, &summary).await {
            warn!(config_id, error = %e, "Failed to store sync summary");
        }

        info!(
            config_id,
            total = summary.total,
            downloaded = summary.downloaded,
            failed = summary.failed,
            already_exists = summary.already_exists,
            stopped,
            "Sync finished"
        );
        self.emit(summary.to_event(config_id));

        self.remote_indexes.lock().await.remove(config_id);

        if !keep_old_files {
            match maintenance::delete_remote_absent(&config.folder_path, remote).await {
                Ok(cleanup) => self.emit(SyncEvent::CleanupCompleted {
                    config_id: config_id.to_string(),
                    blobs_removed: cleanup.blobs_removed,
                    links_removed: cleanup.links_removed,
                }),
                Err(e) => warn!(config_id, error = %e, "Cleanup after sync failed"),
            }
        }

        Ok(summary)
    }
}

fn not_loaded(config_id: &str) -> SyncError {
    SyncError::RemoteNotLoaded {
        config_id: config_id.to_string(),
    }
}

// ============================================================================
// Per-file job
// ============================================================================

/// State shared by every job of one download phase
struct DownloadContext {
    config_id: String,
    base_dir: PathBuf,
    store: ContentStore,
    downloader: Downloader,
    linker: Linker,
    link_table: SharedLinkTable,
    /// Blobs on disk when the sync started
    present: HashSet<ContentToken>,
    progress: SharedProgress,
    queue: OnceLock<QueueHandle>,
    event_bus: EventBus,
}

impl DownloadContext {
    async fn run(&self, file: FileRef) -> Result<()> {
        let result = self.sync_file(&file).await;

        let event = {
            let mut progress = lock_progress(&self.progress);
            match &result {
                Ok(FileOutcome::Downloaded) => progress.downloaded += 1,
                Ok(FileOutcome::AlreadyExists) => progress.already_exists += 1,
                Err(_) => progress.failed += 1,
            }
            progress.is_stopping = self.remaining() == 0;
            progress.to_event(&self.config_id)
        };
        self.event_bus.emit(CoreEvent::Sync(event)).ok();

        result.map(|_| ())
    }

    async fn sync_file(&self, file: &FileRef) -> Result<FileOutcome> {
        let blob_path = self.store.path(&file.token);

        let outcome = if self.present.contains(&file.token) {
            FileOutcome::AlreadyExists
        } else {
            let downloader = self.downloader.clone();
            let url = file.url.clone();
            let ensured = self
                .store
                .ensure(&file.token, move |dest| async move {
                    downloader.download(&url, &dest).await.map(|_| ())
                })
                .await?;
            debug!(token = %file.token, outcome = ?ensured, "Blob ready");
            FileOutcome::Downloaded
        };

        let link_path = self.base_dir.join(file.name.as_str());

        // Held while linking so two jobs for one name cannot interleave
        let mut table = self.link_table.lock().await;

        // The same name linked in another case is replaced, not kept alongside
        let recased = table
            .stored_name(&file.name)
            .filter(|stored| stored.as_str() != file.name.as_str())
            .cloned();
        if let Some(old) = &recased {
            maintenance::remove_entry(&self.base_dir.join(old.as_str())).await;
            debug!(old = %old, name = %file.name, "Replacing link stored under another case");
        }

        let stale = recased.is_some()
            || table.get(&file.name).is_some_and(|token| *token != file.token);
        if stale {
            table.remove(&file.name);
        }

        match self.linker.link(&link_path, &blob_path).await {
            Ok(strategy) => {
                table.insert(file.name.clone(), file.token.clone());
                table.persist().await?;
                debug!(name = %file.name, token = %file.token, %strategy, "Linked");
                Ok(outcome)
            }
            Err(e) => {
                if stale {
                    if let Err(persist_err) = table.persist().await {
                        warn!(error = %persist_err, "Failed to persist link table");
                    }
                }
                Err(e)
            }
        }
    }

    fn remaining(&self) -> usize {
        self.queue.get().map(QueueHandle::remaining).unwrap_or(0)
    }

    fn job_failed(&self, err: JobError) {
        match err {
            JobError::Failed(e) => {
                warn!(config_id = %self.config_id, error = %e, "File sync failed");
            }
            JobError::Panicked(message) => {
                error!(config_id = %self.config_id, %message, "File sync panicked");

                let event = {
                    let mut progress = lock_progress(&self.progress);
                    progress.failed += 1;
                    progress.is_stopping = self.remaining() == 0;
                    progress.to_event(&self.config_id)
                };
                self.event_bus.emit(CoreEvent::Sync(event)).ok();
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::catalog::{CatalogFile, CatalogResource, FileOccurrence};
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{DownloadStream, HttpClient};
    use bridge_traits::BridgeError;
    use mockall::mock;

    mock! {
        Catalog {}

        #[async_trait]
        impl MediaCatalog for Catalog {
            async fn list_resources(&self) -> BridgeResult<Vec<CatalogResource>>;
            async fn list_files(&self, resource: &CatalogResource) -> BridgeResult<Vec<CatalogFile>>;
            fn file_url(&self, token: &str, name: &str) -> String;
        }
    }

    mock! {
        Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn download_stream(&self, url: String) -> BridgeResult<DownloadStream>;
        }
    }

    mock! {
        Settings {}

        #[async_trait]
        impl SettingsStore for Settings {
            async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()>;
            async fn get_string(&self, key: &str) -> BridgeResult<Option<String>>;
            async fn set_bool(&self, key: &str, value: bool) -> BridgeResult<()>;
            async fn get_bool(&self, key: &str) -> BridgeResult<Option<bool>>;
            async fn set_i64(&self, key: &str, value: i64) -> BridgeResult<()>;
            async fn get_i64(&self, key: &str) -> BridgeResult<Option<i64>>;
            async fn delete(&self, key: &str) -> BridgeResult<()>;
            async fn has_key(&self, key: &str) -> BridgeResult<bool>;
            async fn list_keys(&self) -> BridgeResult<Vec<String>>;
        }
    }

    fn resource() -> CatalogResource {
        CatalogResource {
            id: "albums".to_string(),
            name: "album".to_string(),
            label: Some("Albums".to_string()),
        }
    }

    fn catalog_file(token: &str, name: &str, field: &str) -> CatalogFile {
        CatalogFile {
            token: token.to_string(),
            name: name.to_string(),
            occurrence: FileOccurrence {
                resource_id: "albums".to_string(),
                field_name: field.to_string(),
                thing_id: "1".to_string(),
                thing_label: None,
                lang: None,
            },
        }
    }

    fn catalog_with(files: Vec<CatalogFile>) -> MockCatalog {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_list_resources()
            .returning(|| Ok(vec![resource()]));
        catalog
            .expect_list_files()
            .returning(move |_| Ok(files.clone()));
        catalog
            .expect_file_url()
            .returning(|token, _| format!("https://cdn.example.com/{}", token));
        catalog
    }

    async fn coordinator(
        catalog: MockCatalog,
        dir: &std::path::Path,
    ) -> (SyncCoordinator, EventBus) {
        let mut settings = MockSettings::new();
        settings.expect_get_i64().returning(|_| Ok(None));
        settings.expect_get_bool().returning(|_| Ok(None));

        let event_bus = EventBus::new(256);
        let config = CoreConfig::builder()
            .database_path(dir.join("mirror.db"))
            .catalog(Arc::new(catalog))
            .settings_store(Arc::new(settings))
            .http_client(Arc::new(MockHttp::new()))
            .event_bus(event_bus.clone())
            .build()
            .unwrap();

        let coordinator = SyncCoordinator::from_config(&config).await.unwrap();
        coordinator
            .register_config(FolderConfig::new("cfg-1", "Photos", dir.join("photos")))
            .await
            .unwrap();
        (coordinator, event_bus)
    }

    fn drain(receiver: &mut tokio::sync::broadcast::Receiver<CoreEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(CoreEvent::Sync(event)) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_unknown_config() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _bus) = coordinator(catalog_with(Vec::new()), dir.path()).await;

        assert!(matches!(
            coordinator.start_sync("nope").await,
            Err(SyncError::ConfigNotFound { .. })
        ));
        assert_eq!(coordinator.stop_sync("nope").await, 0);
        assert_eq!(coordinator.sync_state("nope").await, SyncState::Idle);
    }

    #[tokio::test]
    async fn test_enumeration_failure_clears_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = MockCatalog::new();
        catalog
            .expect_list_resources()
            .returning(|| Ok(vec![resource()]));
        catalog
            .expect_list_files()
            .returning(|_| Err(BridgeError::Catalog("HTTP 503".to_string())));

        let (coordinator, bus) = coordinator(catalog, dir.path()).await;
        let mut events = bus.subscribe();

        let result = coordinator.load_remote_files("cfg-1").await;

        assert!(matches!(result, Err(SyncError::Enumeration(ref m)) if m.contains("503")));
        assert!(!coordinator.is_sync_active("cfg-1").await);
        assert!(matches!(
            coordinator.check_missing_files("cfg-1").await,
            Err(SyncError::RemoteNotLoaded { .. })
        ));

        let events = drain(&mut events);
        assert!(matches!(events[0], SyncEvent::ResourceLoading { index: 1, count: 1, .. }));
        assert!(events
            .iter()
            .any(|e| matches!(e, SyncEvent::EnumerationFailed { .. })));
    }

    #[tokio::test]
    async fn test_duplicates_block_download_until_confirmed() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_with(vec![
            catalog_file("T1", "a.jpg", "cover"),
            catalog_file("T2", "A.JPG", "gallery"),
        ]);
        let (coordinator, bus) = coordinator(catalog, dir.path()).await;
        let mut events = bus.subscribe();

        let outcome = coordinator.start_sync("cfg-1").await.unwrap();
        let SyncOutcome::AwaitingConfirmation(duplicates) = outcome else {
            panic!("expected duplicates, got {:?}", outcome);
        };
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].tokens.len(), 2);

        assert_eq!(
            coordinator.sync_state("cfg-1").await,
            SyncState::AwaitingConfirmation
        );
        assert!(matches!(
            coordinator.start_download("cfg-1").await,
            Err(SyncError::DuplicatesPending { .. })
        ));
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, SyncEvent::DuplicatesFound { names, .. } if names == &vec!["a.jpg".to_string()])));

        let missing = coordinator.confirm_duplicates("cfg-1").await.unwrap();
        assert_eq!(missing.len(), 2);
        assert_eq!(coordinator.sync_state("cfg-1").await, SyncState::Idle);
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, SyncEvent::MissingFiles { count: 2, .. })));
    }

    #[tokio::test]
    async fn test_invalid_remote_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_with(vec![
            catalog_file("T1", "a.jpg", "cover"),
            catalog_file("../T2", "b.jpg", "cover"),
            catalog_file("T3", "data", "cover"),
        ]);
        let (coordinator, _bus) = coordinator(catalog, dir.path()).await;

        let report = coordinator.load_remote_files("cfg-1").await.unwrap();
        assert_eq!(report.files, 1);
        assert_eq!(report.tokens, 1);
        assert!(report.duplicates.is_empty());
    }

    #[tokio::test]
    async fn test_start_download_requires_loaded_index() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _bus) = coordinator(catalog_with(Vec::new()), dir.path()).await;

        assert!(matches!(
            coordinator.start_download("cfg-1").await,
            Err(SyncError::RemoteNotLoaded { .. })
        ));
        assert!(matches!(
            coordinator.delete_remote_absent("cfg-1").await,
            Err(SyncError::RemoteNotLoaded { .. })
        ));
        assert!(!coordinator.is_sync_active("cfg-1").await);
    }

    #[tokio::test]
    async fn test_config_registry() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _bus) = coordinator(catalog_with(Vec::new()), dir.path()).await;

        let mut config = coordinator.get_config("cfg-1").await.unwrap();
        config.keep_old_files = Some(true);
        coordinator.update_config(config.clone()).await.unwrap();

        let configs = coordinator.list_configs().await.unwrap();
        assert_eq!(configs, vec![config]);
    }
}
