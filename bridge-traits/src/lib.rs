//! # Host Bridge Traits
//!
//! Capability contracts between the sync engine and the host application.
//!
//! ## Overview
//!
//! Each trait is something the engine needs but does not own:
//!
//! - [`HttpClient`](http::HttpClient) - Streaming downloads of remote media
//! - [`SettingsStore`](storage::SettingsStore) - Key-value user preferences
//! - [`MediaCatalog`](catalog::MediaCatalog) - The remote library listing
//!
//! Desktop implementations of `HttpClient` and `SettingsStore` live in
//! `bridge-desktop`. `MediaCatalog` is always supplied by the host because it
//! wraps the remote service's own client.
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should convert platform errors into it and include context such as the URL
//! or key involved.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single instance can be shared
//! by every download worker.

pub mod catalog;
pub mod error;
pub mod http;
pub mod storage;

pub use error::BridgeError;

pub use catalog::{CatalogFile, CatalogResource, FileOccurrence, MediaCatalog};
pub use http::{DownloadOptions, DownloadStream, HttpClient};
pub use storage::SettingsStore;
