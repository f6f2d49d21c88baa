//! # Core Configuration Module
//!
//! Configuration for the catalog sync core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! holding the server coordinates, tuning knobs for pagination and the worker
//! pool, and the host capabilities the core talks through. Validation is
//! fail-fast: `build()` refuses to produce a config that the core could not
//! run with.
//!
//! ## Required Settings
//!
//! - `server_url` - Base URL of the media server (`https://host:8096`)
//! - `user_id` - Substituted into `Users/{UserId}/...` endpoints
//!
//! ## Capabilities (with platform defaults)
//!
//! - `HttpClient` - HTTP operations (desktop default: reqwest)
//! - `SlotStore` - Response slots for the request bridge (desktop default: in memory)
//! - `EventDispatcher` - One-way event channel for the request bridge (optional)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .server_url("http://localhost:8096")
//!     .user_id("f3c1a9")
//!     .access_token("secret")
//!     .worker_count(8)
//!     .idle_timeout(Duration::from_millis(500))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{EventDispatcher, HttpClient, SlotStore};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound the server accepts for a single page.
pub const MAX_PAGE_SIZE: u32 = 50;

pub const DEFAULT_PAGE_SIZE: u32 = MAX_PAGE_SIZE;
pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRYABLE_STATUS: u16 = 500;
pub const DEFAULT_BRIDGE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Core configuration for the catalog sync core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Base URL of the media server, without the `/emby` suffix
    pub server_url: String,

    /// User whose catalog is synchronized
    pub user_id: String,

    /// Token sent as `X-Emby-Token`
    pub access_token: Option<String>,

    /// Device identifier reported to the server
    pub device_id: Option<String>,

    /// Items requested per page, in `1..=MAX_PAGE_SIZE`
    pub page_size: u32,

    /// Number of concurrent hydration workers
    pub worker_count: usize,

    /// How long an idle worker waits on an empty queue before exiting
    pub idle_timeout: Duration,

    /// Status code that completes a work item without treating it as lost
    pub retryable_status: u16,

    /// Interval between response slot polls
    pub bridge_poll_interval: Duration,

    /// Give up on a bridge request after this long (no limit when `None`)
    pub bridge_timeout: Option<Duration>,

    pub http_client: Arc<dyn HttpClient>,

    pub slot_store: Arc<dyn SlotStore>,

    pub event_dispatcher: Option<Arc<dyn EventDispatcher>>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("server_url", &self.server_url)
            .field("user_id", &self.user_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("device_id", &self.device_id)
            .field("page_size", &self.page_size)
            .field("worker_count", &self.worker_count)
            .field("idle_timeout", &self.idle_timeout)
            .field("retryable_status", &self.retryable_status)
            .field("bridge_poll_interval", &self.bridge_poll_interval)
            .field("bridge_timeout", &self.bridge_timeout)
            .field("http_client", &"HttpClient { ... }")
            .field("slot_store", &"SlotStore { ... }")
            .field(
                "event_dispatcher",
                &self
                    .event_dispatcher
                    .as_ref()
                    .map(|_| "EventDispatcher { ... }"),
            )
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Server URL and user id are not empty
    /// - Server URL has an http(s) scheme
    /// - Page size is within `1..=MAX_PAGE_SIZE`
    /// - Worker count and timing values are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            return Err(Error::Config("Server URL cannot be empty".to_string()));
        }

        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "Server URL must start with http:// or https://, got '{}'",
                self.server_url
            )));
        }

        if self.user_id.trim().is_empty() {
            return Err(Error::Config("User id cannot be empty".to_string()));
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "Page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }

        if self.worker_count == 0 {
            return Err(Error::Config(
                "Worker count must be at least 1".to_string(),
            ));
        }

        if self.idle_timeout.is_zero() {
            return Err(Error::Config(
                "Idle timeout must be greater than zero".to_string(),
            ));
        }

        if self.bridge_poll_interval.is_zero() {
            return Err(Error::Config(
                "Bridge poll interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the dispatcher, or an actionable error when the host did not
    /// provide one.
    pub fn require_event_dispatcher(&self) -> Result<Arc<dyn EventDispatcher>> {
        self.event_dispatcher
            .clone()
            .ok_or_else(event_dispatcher_missing_error)
    }
}

fn event_dispatcher_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "EventDispatcher".to_string(),
        message: "The request bridge needs an EventDispatcher to deliver requests. \
                 In-process: pass core_runtime::events::EventBus. \
                 Embedded hosts: inject the host's notification channel."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for catalog requests. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestHttpClient. \
                 Embedded hosts: inject the host's HTTP stack."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn slot_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SlotStore".to_string(),
        message: "SlotStore implementation is required for bridge responses. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default InMemorySlotStore. \
                 Embedded hosts: inject the host's shared property table."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to initialize default HttpClient: {}", e)))?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_slot_store() -> Result<Arc<dyn SlotStore>> {
    use bridge_desktop::InMemorySlotStore;

    let store: Arc<dyn SlotStore> = Arc::new(InMemorySlotStore::new());
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_slot_store() -> Result<Arc<dyn SlotStore>> {
    Err(slot_store_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Call [`build()`](CoreConfigBuilder::build) to validate and produce the
/// final config.
#[derive(Default)]
pub struct CoreConfigBuilder {
    server_url: Option<String>,
    user_id: Option<String>,
    access_token: Option<String>,
    device_id: Option<String>,
    page_size: Option<u32>,
    worker_count: Option<usize>,
    idle_timeout: Option<Duration>,
    retryable_status: Option<u16>,
    bridge_poll_interval: Option<Duration>,
    bridge_timeout: Option<Duration>,
    http_client: Option<Arc<dyn HttpClient>>,
    slot_store: Option<Arc<dyn SlotStore>>,
    event_dispatcher: Option<Arc<dyn EventDispatcher>>,
}

impl CoreConfigBuilder {
    /// Sets the server base URL (required). A trailing `/` is removed.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .server_url("http://localhost:8096");
    /// ```
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.server_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    /// Sets the user id (required).
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Sets the page size.
    ///
    /// Default: 50. Values above 50 are rejected by `build()`.
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Sets the number of hydration workers.
    ///
    /// Default: 4
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    /// Sets how long a worker waits on an empty queue before exiting.
    ///
    /// Default: 1 second
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Sets the status code treated as retryable by the worker pool.
    ///
    /// Default: 500
    pub fn retryable_status(mut self, status: u16) -> Self {
        self.retryable_status = Some(status);
        self
    }

    /// Sets the response slot polling interval.
    ///
    /// Default: 25 ms
    pub fn bridge_poll_interval(mut self, interval: Duration) -> Self {
        self.bridge_poll_interval = Some(interval);
        self
    }

    pub fn bridge_timeout(mut self, timeout: Duration) -> Self {
        self.bridge_timeout = Some(timeout);
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the slot store used by the request bridge.
    ///
    /// If not provided, an in-memory store is used when the `desktop-shims`
    /// feature is enabled.
    pub fn slot_store(mut self, store: Arc<dyn SlotStore>) -> Self {
        self.slot_store = Some(store);
        self
    }

    pub fn event_dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.event_dispatcher = Some(dispatcher);
        self
    }

    /// Builds the final `CoreConfig`, validating all settings.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for missing or out-of-range settings and
    /// `Error::CapabilityMissing` when a capability has no platform default.
    pub fn build(self) -> Result<CoreConfig> {
        let server_url = self.server_url.ok_or_else(|| {
            Error::Config(
                "Server URL is required. Use .server_url(\"http://host:8096\") to set it."
                    .to_string(),
            )
        })?;

        let user_id = self.user_id.ok_or_else(|| {
            Error::Config("User id is required. Use .user_id(\"...\") to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let slot_store = match self.slot_store {
            Some(store) => store,
            None => provide_default_slot_store()?,
        };

        let config = CoreConfig {
            server_url,
            user_id,
            access_token: self.access_token,
            device_id: self.device_id,
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            worker_count: self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT),
            idle_timeout: self.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT),
            retryable_status: self.retryable_status.unwrap_or(DEFAULT_RETRYABLE_STATUS),
            bridge_poll_interval: self
                .bridge_poll_interval
                .unwrap_or(DEFAULT_BRIDGE_POLL_INTERVAL),
            bridge_timeout: self.bridge_timeout,
            http_client,
            slot_store,
            event_dispatcher: self.event_dispatcher,
        };

        config.validate()?;

        Ok(config)
    }
}
