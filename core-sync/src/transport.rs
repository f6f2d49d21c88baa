//! # API Transports
//!
//! The fetcher and the worker pool only need "GET this endpoint with these
//! parameters and hand me the JSON body". [`ApiTransport`] is that seam.
//!
//! Two implementations ship with the crate:
//! - [`HttpTransport`] talks to the server directly through a host
//!   [`HttpClient`].
//! - [`BridgeTransport`] sends `http/request` events through a
//!   [`RequestBridge`] and lets whoever answers the bridge do the HTTP call.
//!   [`HttpRequestHandler`] is the matching answering side.

use async_trait::async_trait;
use bridge_traits::{EventPayload, HttpClient, HttpMethod, HttpRequest};
use core_runtime::config::CoreConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::bridge::{RequestBridge, RequestHandler};
use crate::catalog::server_url;
use crate::error::{Result, SyncError};
use crate::query::{render_value, Params, Query};

/// Bridge method carrying API requests.
pub const HTTP_REQUEST_METHOD: &str = "http/request";

/// Placeholder substituted with the configured user id.
pub const USER_ID_PLACEHOLDER: &str = "{UserId}";

const CLIENT_NAME: &str = "media-catalog-sync";

/// GET access to the media server's JSON API.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Fetch `endpoint` with `params` and return the decoded body.
    ///
    /// A non-success answer must surface as [`SyncError::Http`] so callers can
    /// classify it by status.
    async fn get(&self, endpoint: &str, params: &Params) -> Result<Value>;
}

#[async_trait]
impl<T: ApiTransport + ?Sized> ApiTransport for Arc<T> {
    async fn get(&self, endpoint: &str, params: &Params) -> Result<Value> {
        (**self).get(endpoint, params).await
    }
}

/// Direct HTTP access to the server.
pub struct HttpTransport {
    http_client: Arc<dyn HttpClient>,
    server_url: String,
    user_id: String,
    access_token: Option<String>,
    device_id: Option<String>,
    request_timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        server_url: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            server_url: server_url.into(),
            user_id: user_id.into(),
            access_token: None,
            device_id: None,
            request_timeout: None,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            http_client: Arc::clone(&config.http_client),
            server_url: config.server_url.clone(),
            user_id: config.user_id.clone(),
            access_token: config.access_token.clone(),
            device_id: config.device_id.clone(),
            request_timeout: None,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn resolve(&self, text: &str) -> String {
        text.replace(USER_ID_PLACEHOLDER, &self.user_id)
    }

    fn build_request(&self, endpoint: &str, params: &Params) -> HttpRequest {
        let url = server_url(&self.server_url, &self.resolve(endpoint));
        let mut request = HttpRequest::new(HttpMethod::Get, url)
            .header("Accept", "application/json");

        for (key, value) in params {
            if let Some(rendered) = render_value(value) {
                request = request.query_param(key.as_str(), self.resolve(&rendered));
            }
        }

        if let Some(token) = &self.access_token {
            request = request.header("X-Emby-Token", token.as_str());
        }

        if let Some(device_id) = &self.device_id {
            request = request.header(
                "X-Emby-Authorization",
                format!(
                    "MediaBrowser Client=\"{}\", DeviceId=\"{}\", Version=\"{}\", UserId=\"{}\"",
                    CLIENT_NAME,
                    device_id,
                    env!("CARGO_PKG_VERSION"),
                    self.user_id
                ),
            );
        }

        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }

        request
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    #[instrument(skip(self, params), fields(endpoint = %endpoint))]
    async fn get(&self, endpoint: &str, params: &Params) -> Result<Value> {
        let request = self.build_request(endpoint, params);

        let response = self
            .http_client
            .execute(request)
            .await?
            .error_for_status()
            .map_err(|e| match e.status() {
                Some(status) => SyncError::Http {
                    status,
                    message: e.to_string(),
                },
                None => SyncError::Bridge(e),
            })?;

        if response.body.is_empty() {
            return Ok(Value::Null);
        }

        let body = response
            .json::<Value>()
            .map_err(|e| SyncError::InvalidResponse(format!("{}: {}", endpoint, e)))?;

        debug!(status = response.status, "Request succeeded");
        Ok(body)
    }
}

/// Request body sent through the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgedRequest {
    #[serde(rename = "type")]
    pub method: String,
    pub handler: String,
    #[serde(default)]
    pub params: Params,
}

/// Answer written back by the responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgedReply {
    pub status: u16,
    #[serde(default)]
    pub body: Value,
}

impl BridgedReply {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// API access through the request bridge.
#[derive(Clone)]
pub struct BridgeTransport {
    bridge: RequestBridge,
}

impl BridgeTransport {
    pub fn new(bridge: RequestBridge) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl ApiTransport for BridgeTransport {
    #[instrument(skip(self, params), fields(endpoint = %endpoint))]
    async fn get(&self, endpoint: &str, params: &Params) -> Result<Value> {
        let request = BridgedRequest {
            method: HttpMethod::Get.as_str().to_string(),
            handler: endpoint.to_string(),
            params: params.clone(),
        };

        let raw = self
            .bridge
            .invoke(HTTP_REQUEST_METHOD, serde_json::to_value(&request)?)
            .await?;

        let reply: BridgedReply = serde_json::from_str(&raw)
            .map_err(|e| SyncError::InvalidResponse(format!("Malformed bridge reply: {}", e)))?;

        if !reply.is_success() {
            let message = match &reply.body {
                Value::String(text) => text.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            return Err(SyncError::Http {
                status: reply.status,
                message,
            });
        }

        Ok(reply.body)
    }
}

/// Answers `http/request` bridge events by running them on an inner transport.
pub struct HttpRequestHandler<T> {
    transport: T,
}

impl<T: ApiTransport> HttpRequestHandler<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn answer(&self, payload: &EventPayload) -> BridgedReply {
        let request: BridgedRequest =
            match serde_json::from_value(Value::Object(payload.clone())) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Malformed bridged request");
                    return BridgedReply {
                        status: 400,
                        body: json!(e.to_string()),
                    };
                }
            };

        if request.method != HttpMethod::Get.as_str() {
            return BridgedReply {
                status: 405,
                body: json!(format!("Unsupported method {}", request.method)),
            };
        }

        let query = Query {
            endpoint: request.handler,
            params: request.params,
        };

        match self.transport.get(&query.endpoint, &query.params).await {
            Ok(body) => BridgedReply { status: 200, body },
            Err(e) => BridgedReply {
                // Unclassified failures are reported as a gateway error
                status: e.status().unwrap_or(502),
                body: json!(e.to_string()),
            },
        }
    }
}

#[async_trait]
impl<T: ApiTransport> RequestHandler for HttpRequestHandler<T> {
    async fn handle(&self, _method: &str, payload: &EventPayload) -> String {
        let reply = self.answer(payload).await;
        serde_json::to_string(&reply).unwrap_or_else(|_| r#"{"status":500}"#.to_string())
    }
}
