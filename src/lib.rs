//! Workspace facade crate.
//!
//! Host applications depend on `media-catalog-sync` and pick a feature instead
//! of wiring `core-sync`, `core-runtime` and the bridge crates one by one:
//!
//! - `desktop-shims` (default): core crates plus the reqwest/SQLite adapters
//!   from `bridge-desktop`.
//! - `core`: core crates only; the host injects its own bridges.

pub use bridge_traits;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;

#[cfg(any(feature = "core", feature = "desktop-shims"))]
pub use core_runtime;

#[cfg(any(feature = "core", feature = "desktop-shims"))]
pub use core_sync;
