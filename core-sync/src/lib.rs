//! # Catalog Sync Module
//!
//! Pulls a server-hosted media catalog through a paginated HTTP API.
//!
//! ## Overview
//!
//! A sync is two phases:
//! - **Discovery**: page through a listing endpoint, collecting identifiers
//! - **Hydration**: resolve each identifier into its full record with a pool
//!   of concurrent workers, routing records by type
//!
//! A request bridge lets code on the far side of a one-way event channel make
//! blocking request/response calls, which is also how the API can be reached
//! when the HTTP stack lives in the host.
//!
//! ## Components
//!
//! - **Query model** (`query`): endpoints, parameters, batches and restore points
//! - **Catalog queries** (`catalog`): builders for the server's listing endpoints
//! - **Transports** (`transport`): direct HTTP and bridged access to the API
//! - **Paginated fetcher** (`paginate`): resumable window-by-window walks
//! - **Worker pool** (`pool`): shared queue, type routing, dead letters
//! - **Request bridge** (`bridge`): correlation-id rendezvous over a slot store
//! - **Catalog sync** (`sync`): discovery plus hydration in one run

pub mod bridge;
pub mod catalog;
pub mod error;
pub mod paginate;
pub mod pool;
pub mod query;
pub mod sync;
pub mod transport;

pub use bridge::{slot_key, BridgeResponder, RequestBridge, RequestHandler, CORRELATION_KEY};
pub use error::{Result, SyncError};
pub use paginate::{ItemPages, PaginatedFetcher};
pub use pool::{
    DeadLetter, Delivery, OutputRouter, PoolConfig, PoolHandle, PoolReport, WorkQueue,
    WorkerPool, WorkerReport,
};
pub use query::{Batch, Item, Params, Query, RestorePoint};
pub use sync::{CatalogSync, SyncReport, SyncRun, SyncSettings};
pub use transport::{
    ApiTransport, BridgeTransport, BridgedReply, BridgedRequest, HttpRequestHandler,
    HttpTransport, HTTP_REQUEST_METHOD,
};
