//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `SlotStore` in process memory, or in a SQLite file shared between
//!   processes
//!
//! The event dispatcher has no desktop-specific adapter: the in-process
//! `EventBus` from `core-runtime` implements it directly.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{InMemorySlotStore, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let http_client = Arc::new(ReqwestHttpClient::new()?);
//!     let slots = Arc::new(InMemorySlotStore::new());
//!
//!     // Hand both to CoreConfig::builder()
//!     Ok(())
//! }
//! ```

mod http;
mod slots;

pub use http::ReqwestHttpClient;
pub use slots::{InMemorySlotStore, SqliteSlotStore};
