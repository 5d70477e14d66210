//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the sync engine:
//! - Logging and tracing infrastructure
//! - Configuration management and user sync settings
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that `core-sync` depends on. It
//! establishes the logging conventions, the fail-fast configuration builder,
//! and the broadcast channel that carries progress to the host UI.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, SyncSettings};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventStream, SyncEvent};
