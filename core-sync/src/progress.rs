//! # Sync Progress
//!
//! Live counters of one sync and the summary persisted when it ends.

use chrono::{DateTime, Local};
use core_runtime::events::SyncEvent;
use serde::{Deserialize, Serialize};

/// Wall-clock format of persisted timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(time: &DateTime<Local>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Counters for the sync currently running on a folder
///
/// Every finished job increments exactly one of `downloaded`, `failed` or
/// `already_exists`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProgress {
    pub total: u64,
    pub downloaded: u64,
    pub failed: u64,
    pub already_exists: u64,
    pub downloading: bool,
    /// No job is left to start
    pub is_stopping: bool,
    pub start_time: DateTime<Local>,
}

impl SyncProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            downloaded: 0,
            failed: 0,
            already_exists: 0,
            downloading: true,
            is_stopping: total == 0,
            start_time: Local::now(),
        }
    }

    /// Jobs accounted for so far
    pub fn processed(&self) -> u64 {
        self.downloaded + self.failed + self.already_exists
    }

    pub fn is_reconciled(&self) -> bool {
        self.processed() == self.total
    }

    /// Build the persisted summary
    pub fn finish(&self, end_time: DateTime<Local>, stopped: bool) -> SyncSummary {
        SyncSummary {
            total: self.total,
            downloaded: self.downloaded,
            failed: self.failed,
            already_exists: self.already_exists,
            stopped,
            start_time: format_timestamp(&self.start_time),
            end_time: format_timestamp(&end_time),
        }
    }

    pub fn to_event(&self, config_id: &str) -> SyncEvent {
        SyncEvent::Progress {
            config_id: config_id.to_string(),
            total: self.total,
            downloaded: self.downloaded,
            failed: self.failed,
            already_exists: self.already_exists,
            downloading: self.downloading,
            is_stopping: self.is_stopping,
        }
    }
}

/// Outcome of the last sync of a folder, stored on its configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub total: u64,
    pub downloaded: u64,
    pub failed: u64,
    pub already_exists: u64,
    #[serde(default)]
    pub stopped: bool,
    pub start_time: String,
    pub end_time: String,
}

impl SyncSummary {
    pub fn to_event(&self, config_id: &str) -> SyncEvent {
        SyncEvent::Finished {
            config_id: config_id.to_string(),
            total: self.total,
            downloaded: self.downloaded,
            failed: self.failed,
            already_exists: self.already_exists,
            stopped: self.stopped,
            start_time: self.start_time.clone(),
            end_time: self.end_time.clone(),
        }
    }
}
