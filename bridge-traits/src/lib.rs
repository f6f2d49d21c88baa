//! # Host Bridge Traits
//!
//! Capability traits the sync core needs from its host.
//!
//! ## Overview
//!
//! The core never talks to a socket, a database or a UI toolkit directly. It
//! is handed implementations of the traits below and composes them:
//!
//! - [`HttpClient`](http::HttpClient) - request/response primitive towards the media server
//! - [`EventDispatcher`](dispatch::EventDispatcher) - one-way event hand-off into another context
//! - [`SlotStore`](storage::SlotStore) - keyed shared slots used as a response rendezvous
//! - [`LoggerSink`](log::LoggerSink) - forward structured logs to host logging
//!
//! ## Implementations
//!
//! | Platform | Implementation Crate |
//! |----------|---------------------|
//! | Desktop  | `bridge-desktop`    |
//! | Other    | injected by the host |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Transport
//! implementations report non-2xx answers as [`BridgeError::Http`] so callers
//! can classify failures by status code.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`; the worker pool shares one
//! transport across many tasks.

pub mod dispatch;
pub mod error;
pub mod http;
pub mod log;
pub mod storage;

pub use error::BridgeError;

pub use dispatch::{EventDispatcher, EventPayload};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use log::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use storage::SlotStore;
