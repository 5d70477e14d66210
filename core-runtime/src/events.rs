//! # Event Bus System
//!
//! Provides an event-driven channel between the sync engine and the host UI
//! using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: [`CoreEvent`] wrapping the domain enum [`SyncEvent`]
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   emit    ┌───────────┐  subscribe   ┌────────────┐
//! │ SyncCoordinator ├──────────>│ EventBus  ├─────────────>│ Host UI    │
//! └─────────────────┘           │ (broadcast│              └────────────┘
//! ┌─────────────────┐   emit    │  channel) │  subscribe   ┌────────────┐
//! │ Download worker ├──────────>│           ├─────────────>│ Logger     │
//! └─────────────────┘           └───────────┘              └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = EventStream::new(event_bus.subscribe())
//!     .filter(|event| matches!(event, CoreEvent::Sync(SyncEvent::Progress { .. })));
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = stream.recv().await {
//!         println!("{}", event.description());
//!     }
//! });
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Progress events are snapshots, so a lagging UI only skips intermediate
//!   counter values.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Emitting with no subscribers returns an error; the engine ignores it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published and received through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Synchronization events
    Sync(SyncEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::EnumerationFailed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::DuplicatesFound { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Finished { failed, .. }) if *failed > 0 => {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::Finished { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Started { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Folder configuration the event belongs to.
    pub fn config_id(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.config_id(),
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events emitted while enumerating, downloading and cleaning up a folder.
///
/// Counter fields mirror the engine's progress record: `downloaded`,
/// `failed` and `already_exists` always sum to `total` once a sync
/// has finished.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A remote resource is about to be enumerated
    ResourceLoading {
        config_id: String,
        resource_id: String,
        resource_name: String,
        /// 1-based position of the resource
        index: usize,
        count: usize,
    },

    /// A remote resource finished enumerating
    ResourceLoaded {
        config_id: String,
        resource_id: String,
        files: usize,
    },

    /// Enumeration failed; the remote index was cleared
    EnumerationFailed { config_id: String, message: String },

    /// Some names map to more than one content token
    DuplicatesFound {
        config_id: String,
        names: Vec<String>,
    },

    /// Remote files with no local blob or no local link
    MissingFiles { config_id: String, count: usize },

    /// Download phase started
    Started {
        config_id: String,
        total: u64,
        concurrency: usize,
    },

    /// A download/link job finished
    Progress {
        config_id: String,
        total: u64,
        downloaded: u64,
        failed: u64,
        already_exists: u64,
        downloading: bool,
        is_stopping: bool,
    },

    /// Sync finished, possibly after a stop request
    Finished {
        config_id: String,
        total: u64,
        downloaded: u64,
        failed: u64,
        already_exists: u64,
        stopped: bool,
        start_time: String,
        end_time: String,
    },

    /// Local entries no longer present remotely were deleted
    CleanupCompleted {
        config_id: String,
        blobs_removed: usize,
        links_removed: usize,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::ResourceLoading { .. } => "Loading remote resource",
            SyncEvent::ResourceLoaded { .. } => "Remote resource loaded",
            SyncEvent::EnumerationFailed { .. } => "Failed to enumerate remote files",
            SyncEvent::DuplicatesFound { .. } => "Duplicate file names found",
            SyncEvent::MissingFiles { .. } => "Missing files computed",
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::Finished { .. } => "Sync finished",
            SyncEvent::CleanupCompleted { .. } => "Local cleanup completed",
        }
    }

    fn config_id(&self) -> &str {
        match self {
            SyncEvent::ResourceLoading { config_id, .. }
            | SyncEvent::ResourceLoaded { config_id, .. }
            | SyncEvent::EnumerationFailed { config_id, .. }
            | SyncEvent::DuplicatesFound { config_id, .. }
            | SyncEvent::MissingFiles { config_id, .. }
            | SyncEvent::Started { config_id, .. }
            | SyncEvent::Progress { config_id, .. }
            | SyncEvent::Finished { config_id, .. }
            | SyncEvent::CleanupCompleted { config_id, .. } => config_id,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all current subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscription to the event bus.
    ///
    /// The subscriber only receives events emitted after this call.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver wrapper that skips events rejected by a predicate.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only yield events for which `predicate` returns `true`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only yield events for one folder configuration.
    pub fn for_config(self, config_id: impl Into<String>) -> Self {
        let config_id = config_id.into();
        self.filter(move |event| event.config_id() == config_id)
    }

    /// Receives the next matching event.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive the next matching event without waiting.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(config_id: &str, downloaded: u64) -> CoreEvent {
        CoreEvent::Sync(SyncEvent::Progress {
            config_id: config_id.to_string(),
            total: 10,
            downloaded,
            failed: 0,
            already_exists: 0,
            downloading: true,
            is_stopping: false,
        })
    }

    fn finished(failed: u64) -> CoreEvent {
        CoreEvent::Sync(SyncEvent::Finished {
            config_id: "cfg-1".to_string(),
            total: 3,
            downloaded: 3 - failed,
            failed,
            already_exists: 0,
            stopped: false,
            start_time: "2024-01-01 10:00:00".to_string(),
            end_time: "2024-01-01 10:00:05".to_string(),
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);

        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(progress("cfg-1", 1)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Sync(SyncEvent::Started {
            config_id: "cfg-1".to_string(),
            total: 4,
            concurrency: 2,
        });

        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Sync(SyncEvent::Finished { .. })));

        bus.emit(progress("cfg-1", 1)).ok();
        bus.emit(finished(0)).ok();

        assert_eq!(stream.recv().await.unwrap(), finished(0));
    }

    #[tokio::test]
    async fn test_event_stream_for_config() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe()).for_config("cfg-2");

        bus.emit(progress("cfg-1", 1)).ok();
        bus.emit(progress("cfg-2", 7)).ok();

        assert_eq!(stream.recv().await.unwrap(), progress("cfg-2", 7));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(progress("cfg-1", i)).ok();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Sync(SyncEvent::EnumerationFailed {
            config_id: "cfg-1".to_string(),
            message: "catalog unreachable".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let duplicates = CoreEvent::Sync(SyncEvent::DuplicatesFound {
            config_id: "cfg-1".to_string(),
            names: vec!["cover.jpg".to_string()],
        });
        assert_eq!(duplicates.severity(), EventSeverity::Warning);

        assert_eq!(finished(0).severity(), EventSeverity::Info);
        assert_eq!(finished(1).severity(), EventSeverity::Warning);
        assert_eq!(progress("cfg-1", 1).severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_event_description_and_config_id() {
        let event = CoreEvent::Sync(SyncEvent::MissingFiles {
            config_id: "cfg-9".to_string(),
            count: 3,
        });
        assert_eq!(event.description(), "Missing files computed");
        assert_eq!(event.config_id(), "cfg-9");
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();

        let bus1 = bus.clone();
        let bus2 = bus.clone();

        let handle1 = tokio::spawn(async move {
            for i in 0..10 {
                bus1.emit(progress("cfg-1", i)).ok();
            }
        });
        let handle2 = tokio::spawn(async move {
            for i in 0..10 {
                bus2.emit(progress("cfg-2", i)).ok();
            }
        });

        handle1.await.ok();
        handle2.await.ok();

        let mut count = 0;
        while sub.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 20);
    }

    #[test]
    fn test_event_serialization() {
        let event = progress("cfg-123", 5);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Sync\""));
        assert!(json.contains("\"event\":\"Progress\""));
        assert!(json.contains("cfg-123"));

        let deserialized: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }
}
