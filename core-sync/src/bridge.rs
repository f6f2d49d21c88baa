//! # Request Bridge
//!
//! Turns a one-way event channel plus a shared slot store into a
//! request/response call.
//!
//! ## Protocol
//!
//! 1. The caller's payload (a JSON object) gets a fresh correlation id under
//!    [`CORRELATION_KEY`].
//! 2. The payload is dispatched as a named event; dispatch returns
//!    immediately.
//! 3. The caller polls the slot `sync_bridge_<id>.json` until it is filled,
//!    clears it and returns the stored string.
//!
//! The answering side subscribes to the same event channel and writes its
//! answer into the slot named after the request's correlation id.
//! [`BridgeResponder`] does that for an [`EventBus`].
//!
//! ```text
//!  RequestBridge                 EventBus                BridgeResponder
//!       │  dispatch(method, {..., CorrelationId}) │                │
//!       ├───────────────────────────>│────────────────────────────>│
//!       │                            │                 handle()    │
//!       │        poll slot           │        write slot           │
//!       │<───────────────── SlotStore ────────────────────────────-┤
//! ```

use async_trait::async_trait;
use bridge_traits::{BridgeError, EventDispatcher, EventPayload, SlotStore};
use core_runtime::config::CoreConfig;
use core_runtime::events::{BridgeEvent, CoreEvent, EventBus, EventStream, RecvError};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Payload key reserved for the correlation id.
pub const CORRELATION_KEY: &str = "CorrelationId";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Name of the slot a request's answer is written to.
pub fn slot_key(correlation_id: &str) -> String {
    format!("sync_bridge_{}.json", correlation_id)
}

/// Blocking request/response over an event dispatcher and a slot store.
///
/// Cloning is cheap; clones share the dispatcher, the store and the
/// cancellation token.
#[derive(Clone)]
pub struct RequestBridge {
    dispatcher: Arc<dyn EventDispatcher>,
    slots: Arc<dyn SlotStore>,
    poll_interval: Duration,
    response_timeout: Option<Duration>,
    cancellation_token: CancellationToken,
}

impl RequestBridge {
    pub fn new(dispatcher: Arc<dyn EventDispatcher>, slots: Arc<dyn SlotStore>) -> Self {
        Self {
            dispatcher,
            slots,
            poll_interval: DEFAULT_POLL_INTERVAL,
            response_timeout: None,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Bridge over the configured dispatcher and slot store.
    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        let dispatcher = config.require_event_dispatcher()?;
        let mut bridge = Self::new(dispatcher, Arc::clone(&config.slot_store))
            .with_poll_interval(config.bridge_poll_interval);
        bridge.response_timeout = config.bridge_timeout;
        Ok(bridge)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Dispatch `method` with `payload` and wait for the answer.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `payload` is not a JSON object; nothing is
    ///   dispatched in that case
    /// - `Bridge` if the dispatcher or the slot store fails
    /// - `Cancelled` if the cancellation token fires while waiting
    /// - `Timeout` if a response timeout is set and elapses
    #[instrument(skip(self, payload), fields(method = %method))]
    pub async fn invoke(&self, method: &str, payload: Value) -> Result<String> {
        let mut payload = match payload {
            Value::Object(map) => map,
            other => {
                return Err(SyncError::InvalidArgument(format!(
                    "Bridge payload must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let correlation_id = Uuid::new_v4().to_string();
        payload.insert(
            CORRELATION_KEY.to_string(),
            Value::String(correlation_id.clone()),
        );
        let key = slot_key(&correlation_id);

        self.dispatcher.dispatch(method, payload)?;
        debug!(correlation_id = %correlation_id, "Request dispatched");

        let deadline = self.response_timeout.map(|timeout| Instant::now() + timeout);

        loop {
            if self.cancellation_token.is_cancelled() {
                debug!(correlation_id = %correlation_id, "Request abandoned");
                return Err(SyncError::Cancelled);
            }

            let value = self.slots.read(&key).await?;
            if !value.is_empty() {
                self.slots.clear(&key).await?;
                debug!(correlation_id = %correlation_id, "Response received");
                return Ok(value);
            }

            if let (Some(deadline), Some(timeout)) = (deadline, self.response_timeout) {
                if Instant::now() >= deadline {
                    warn!(correlation_id = %correlation_id, "No response before timeout");
                    return Err(SyncError::Timeout(timeout));
                }
            }

            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    debug!(correlation_id = %correlation_id, "Request abandoned");
                    return Err(SyncError::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Synchronous form of [`invoke`](Self::invoke).
    ///
    /// Outside a tokio runtime the poll loop runs on a private current-thread
    /// runtime. On a multi-thread runtime the calling worker is handed over
    /// with [`tokio::task::block_in_place`], so responders on the same runtime
    /// keep running while the caller waits.
    ///
    /// A current-thread runtime has no other thread to answer on, so the call
    /// is refused there. Async callers should use [`invoke`](Self::invoke);
    /// synchronous code that must live next to a current-thread runtime
    /// belongs on a thread of its own.
    ///
    /// # Errors
    ///
    /// Same as [`invoke`](Self::invoke), plus `Bridge(OperationFailed)` when
    /// called from a current-thread runtime or when the private runtime cannot
    /// be built.
    pub fn invoke_blocking(&self, method: &str, payload: Value) -> Result<String> {
        match Handle::try_current() {
            Ok(handle) => match handle.runtime_flavor() {
                RuntimeFlavor::CurrentThread => Err(SyncError::Bridge(BridgeError::OperationFailed(
                    format!(
                        "Blocking bridge call '{}' would stall a current-thread runtime; use invoke() instead",
                        method
                    ),
                ))),
                _ => tokio::task::block_in_place(|| handle.block_on(self.invoke(method, payload))),
            },
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .map_err(|e| {
                        SyncError::Bridge(BridgeError::OperationFailed(format!(
                            "Failed to create runtime for bridge call: {}",
                            e
                        )))
                    })?;

                runtime.block_on(self.invoke(method, payload))
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Produces the answer for one bridged request.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Answer `method` with `payload`; the returned string is written to the
    /// request's slot verbatim.
    async fn handle(&self, method: &str, payload: &EventPayload) -> String;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(String, EventPayload) -> Fut + Send + Sync,
    Fut: Future<Output = String> + Send,
{
    async fn handle(&self, method: &str, payload: &EventPayload) -> String {
        (self)(method.to_string(), payload.clone()).await
    }
}

/// Answering side of the bridge for requests published on an [`EventBus`].
pub struct BridgeResponder {
    slots: Arc<dyn SlotStore>,
    handler: Arc<dyn RequestHandler>,
    method: Option<String>,
}

impl BridgeResponder {
    pub fn new(slots: Arc<dyn SlotStore>, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            slots,
            handler,
            method: None,
        }
    }

    /// Only answer requests for `method`; others are left to other responders.
    pub fn for_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Answer a single request.
    ///
    /// Requests without a correlation id cannot be answered and are rejected.
    pub async fn respond(&self, method: &str, payload: &EventPayload) -> Result<()> {
        let correlation_id = payload
            .get(CORRELATION_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SyncError::InvalidArgument(format!("Request '{}' has no correlation id", method))
            })?;

        let answer = self.handler.handle(method, payload).await;
        self.slots.write(&slot_key(correlation_id), &answer).await?;

        debug!(correlation_id, method, "Request answered");
        Ok(())
    }

    /// Subscribe to `bus` and answer requests until `token` is cancelled or
    /// the bus closes.
    ///
    /// The subscription is taken before this returns, so requests dispatched
    /// afterwards are never missed. Each request is answered on its own task,
    /// so a slow handler does not hold up the others; answers still in flight
    /// when the token fires are awaited. The task resolves to the number of
    /// requests answered.
    pub fn spawn(self, bus: &EventBus, token: CancellationToken) -> JoinHandle<u64> {
        let wanted = self.method.clone();
        let requests = EventStream::new(bus.subscribe()).filter(move |event| match event {
            CoreEvent::Bridge(BridgeEvent::Request { method, .. }) => {
                wanted.as_deref().map_or(true, |wanted| wanted == method.as_str())
            }
            _ => false,
        });
        tokio::spawn(Arc::new(self).run(requests, token))
    }

    async fn run(self: Arc<Self>, mut requests: EventStream, token: CancellationToken) -> u64 {
        let mut in_flight = JoinSet::new();
        let mut answered = 0u64;

        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    answered += Self::tally(joined);
                    continue;
                }
                event = requests.recv() => event,
            };

            let (method, payload) = match event {
                Ok(CoreEvent::Bridge(BridgeEvent::Request { method, payload })) => {
                    (method, payload)
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Bridge responder lagged behind the event bus");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let responder = Arc::clone(&self);
            in_flight.spawn(async move {
                let outcome = responder.respond(&method, &payload).await;
                (method, outcome)
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            answered += Self::tally(joined);
        }

        info!(answered, "Bridge responder stopped");
        answered
    }

    fn tally(joined: std::result::Result<(String, Result<()>), JoinError>) -> u64 {
        match joined {
            Ok((_, Ok(()))) => 1,
            Ok((method, Err(e))) => {
                warn!(method = %method, error = %e, "Failed to answer bridge request");
                0
            }
            Err(e) => {
                warn!(error = %e, "Bridge handler task failed");
                0
            }
        }
    }
}
