//! # Event Bus System
//!
//! Typed broadcast channel shared by the sync components and the request
//! bridge, built on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The bus carries two families of events:
//! - **Sync events**: progress published by the paginated fetcher, the worker
//!   pool and the catalog sync orchestrator.
//! - **Bridge events**: requests dispatched by a `RequestBridge`. The bus
//!   implements [`EventDispatcher`], so it is the default one-way channel a
//!   bridge sends through; a responder subscribes to the same bus.
//!
//! ```text
//! ┌──────────────────┐   emit    ┌───────────┐   subscribe   ┌─────────────────┐
//! │ PaginatedFetcher ├──────────>│           ├──────────────>│ progress UI/log │
//! └──────────────────┘           │ EventBus  │               └─────────────────┘
//! ┌──────────────────┐  dispatch │ (broadcast│   subscribe   ┌─────────────────┐
//! │  RequestBridge   ├──────────>│  channel) ├──────────────>│ BridgeResponder │
//! └──────────────────┘           └───────────┘               └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Started {
//!         run_id: "run-1".to_string(),
//!         endpoint: "Users/{UserId}/Items".to_string(),
//!     }))
//!     .ok();
//!
//! let received = subscriber.recv().await.unwrap();
//! assert_eq!(received.description(), "Catalog sync started");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; non-fatal.
//! - **`RecvError::Closed`**: every sender is gone; treat as shutdown.
//!
//! Publishers ignore the "no subscribers" error with `.ok()`; the bridge does
//! not, because an undeliverable request would otherwise poll forever.

use bridge_traits::{error::BridgeError, EventDispatcher, EventPayload};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published through the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sync progress and outcome events
    Sync(SyncEvent),
    /// Requests travelling through the request bridge
    Bridge(BridgeEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Bridge(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. })
            | CoreEvent::Sync(SyncEvent::PaginationFailed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::ItemDeadLettered { .. })
            | CoreEvent::Sync(SyncEvent::Cancelled { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
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

/// Events published while pulling the catalog from the media server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A catalog sync run started.
    Started {
        /// Identifier of the run.
        run_id: String,
        /// Endpoint being walked.
        endpoint: String,
    },
    /// One pagination window was fetched.
    PageFetched {
        /// Endpoint being walked.
        endpoint: String,
        /// Cursor of the fetched window.
        start_index: u64,
        /// Number of items in the window.
        item_count: u64,
        /// Server-reported total.
        total_record_count: u64,
    },
    /// The total-count probe or a window fetch failed.
    PaginationFailed {
        /// Endpoint being walked.
        endpoint: String,
        /// Cursor at the time of failure, `None` when the probe failed.
        start_index: Option<u64>,
        /// Human-readable error message.
        message: String,
    },
    /// An identifier failed with a non-retryable status and was set aside.
    ItemDeadLettered {
        /// The item identifier.
        item_id: String,
        /// Status code returned by the server.
        status: u16,
    },
    /// A worker drained the queue (or was cancelled) and exited.
    WorkerFinished {
        /// Worker index within the pool.
        worker_id: usize,
        /// Queue entries this worker completed.
        completed: u64,
    },
    /// A sync run finished.
    Completed {
        /// Identifier of the run.
        run_id: String,
        /// Identifiers discovered through pagination.
        discovered: u64,
        /// Queue entries completed by the pool.
        completed: u64,
        /// Records delivered to an output queue.
        delivered: u64,
        /// Identifiers set aside as dead letters.
        dead_lettered: u64,
        /// Duration of the run in seconds.
        duration_secs: u64,
    },
    /// A sync run stopped on an error.
    Failed {
        /// Identifier of the run.
        run_id: String,
        /// Human-readable error message.
        message: String,
        /// Whether the run can be resumed from its restore point.
        recoverable: bool,
    },
    /// A sync run was cancelled.
    Cancelled {
        /// Identifier of the run.
        run_id: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Catalog sync started",
            SyncEvent::PageFetched { .. } => "Page fetched",
            SyncEvent::PaginationFailed { .. } => "Pagination failed",
            SyncEvent::ItemDeadLettered { .. } => "Item set aside as dead letter",
            SyncEvent::WorkerFinished { .. } => "Worker finished",
            SyncEvent::Completed { .. } => "Catalog sync completed",
            SyncEvent::Failed { .. } => "Catalog sync failed",
            SyncEvent::Cancelled { .. } => "Catalog sync cancelled",
        }
    }
}

// ============================================================================
// Bridge Events
// ============================================================================

/// Events travelling from a request bridge to its responder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum BridgeEvent {
    /// A request waiting for an answer in its correlation slot.
    Request {
        /// Method name, e.g. `"http/request"`.
        method: String,
        /// JSON object payload, carrying the correlation id.
        payload: EventPayload,
    },
}

impl BridgeEvent {
    fn description(&self) -> &str {
        match self {
            BridgeEvent::Request { .. } => "Bridge request dispatched",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus clones the sender; every clone publishes to the same
/// subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
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

impl EventDispatcher for EventBus {
    fn dispatch(&self, method: &str, payload: EventPayload) -> bridge_traits::error::Result<()> {
        let event = CoreEvent::Bridge(BridgeEvent::Request {
            method: method.to_string(),
            payload,
        });

        self.emit(event).map(|_| ()).map_err(|_| {
            BridgeError::NotAvailable(format!("No subscriber listening for '{}'", method))
        })
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
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

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
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
