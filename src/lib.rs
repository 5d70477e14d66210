//! Workspace façade crate.
//!
//! Exposes the engine crates behind feature flags so a host application can
//! depend on `media-mirror-workspace` alone and pick the desktop bridges with
//! `desktop-shims` (enabled by default).

#[cfg(feature = "core")]
pub use bridge_traits;
#[cfg(feature = "core")]
pub use core_runtime;
#[cfg(feature = "core")]
pub use core_sync;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;
