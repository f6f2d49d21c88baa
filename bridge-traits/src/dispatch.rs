//! Event Dispatch Abstraction
//!
//! One-way, fire-and-forget delivery of a named event with a JSON payload into
//! another execution context. There is no acknowledgment and no return value;
//! answers come back out of band (see [`SlotStore`](crate::storage::SlotStore)).

use serde_json::{Map, Value};

use crate::error::Result;

/// JSON object payload carried by a dispatched event.
pub type EventPayload = Map<String, Value>;

/// Event dispatcher trait
///
/// `dispatch` must return as soon as the event is handed off. An `Err` means
/// the event could not be handed off at all (e.g. nobody is listening); it
/// says nothing about whether the receiver will ever act on it.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::dispatch::EventDispatcher;
/// use serde_json::json;
///
/// fn ping(dispatcher: &dyn EventDispatcher) -> Result<()> {
///     let payload = json!({ "handler": "System/Ping" });
///     dispatcher.dispatch("http/request", payload.as_object().cloned().unwrap_or_default())
/// }
/// ```
pub trait EventDispatcher: Send + Sync {
    /// Hand an event off to the other side
    fn dispatch(&self, method: &str, payload: EventPayload) -> Result<()>;
}
