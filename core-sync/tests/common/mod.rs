//! Shared fakes for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use core_sync::{ApiTransport, Params, Result, SyncError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const ITEM_PREFIX: &str = "Users/{UserId}/Items/";

/// In-memory media server.
///
/// Listing requests are answered from `listing`; single-item requests from
/// `records` (or a synthesized record typed after the listing entry).
#[derive(Default)]
pub struct ScriptedTransport {
    listing: Vec<Value>,
    records: HashMap<String, Value>,
    item_failures: HashMap<String, u16>,
    probe_failure: Option<u16>,
    window_failure_at: Option<u64>,
    item_delay: Option<Duration>,
    requests: Mutex<Vec<(String, Params)>>,
}

impl ScriptedTransport {
    /// Catalog of `count` movies with ids `"0"`, `"1"`, ...
    pub fn with_movies(count: u64) -> Self {
        let listing = (0..count)
            .map(|i| json!({ "Id": i.to_string(), "Type": "Movie" }))
            .collect();
        Self {
            listing,
            ..Default::default()
        }
    }

    /// Catalog from `(id, type)` pairs.
    pub fn with_items(items: &[(&str, &str)]) -> Self {
        let listing = items
            .iter()
            .map(|(id, item_type)| json!({ "Id": id, "Type": item_type }))
            .collect();
        Self {
            listing,
            ..Default::default()
        }
    }

    pub fn fail_item(mut self, id: &str, status: u16) -> Self {
        self.item_failures.insert(id.to_string(), status);
        self
    }

    pub fn fail_probe(mut self, status: u16) -> Self {
        self.probe_failure = Some(status);
        self
    }

    pub fn fail_window_at(mut self, start_index: u64) -> Self {
        self.window_failure_at = Some(start_index);
        self
    }

    pub fn slow_items(mut self, delay: Duration) -> Self {
        self.item_delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<(String, Params)> {
        self.requests.lock().unwrap().clone()
    }

    /// Single-item requests, in arrival order.
    pub fn item_requests(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|(endpoint, _)| endpoint.strip_prefix(ITEM_PREFIX).map(str::to_string))
            .collect()
    }

    /// Listing windows requested, as `(StartIndex, Limit)`.
    pub fn windows(&self) -> Vec<(u64, u64)> {
        self.requests()
            .into_iter()
            .filter(|(endpoint, params)| {
                !endpoint.starts_with(ITEM_PREFIX)
                    && params.get("EnableTotalRecordCount") != Some(&json!(true))
            })
            .map(|(_, params)| {
                (
                    params["StartIndex"].as_u64().unwrap(),
                    params["Limit"].as_u64().unwrap(),
                )
            })
            .collect()
    }

    fn http_error(status: u16) -> SyncError {
        SyncError::Http {
            status,
            message: format!("status {}", status),
        }
    }

    fn record(&self, id: &str) -> Option<Value> {
        if let Some(record) = self.records.get(id) {
            return Some(record.clone());
        }
        self.listing
            .iter()
            .find(|entry| entry["Id"] == id)
            .map(|entry| json!({ "Id": id, "Type": entry["Type"], "Name": format!("Item {}", id) }))
    }
}

#[async_trait]
impl ApiTransport for ScriptedTransport {
    async fn get(&self, endpoint: &str, params: &Params) -> Result<Value> {
        self.requests
            .lock()
            .unwrap()
            .push((endpoint.to_string(), params.clone()));

        if let Some(id) = endpoint.strip_prefix(ITEM_PREFIX) {
            if let Some(delay) = self.item_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(status) = self.item_failures.get(id) {
                return Err(Self::http_error(*status));
            }
            return self.record(id).ok_or_else(|| Self::http_error(404));
        }

        if params.get("EnableTotalRecordCount") == Some(&json!(true)) {
            if let Some(status) = self.probe_failure {
                return Err(Self::http_error(status));
            }
            return Ok(json!({ "Items": [], "TotalRecordCount": self.listing.len() }));
        }

        let start = params["StartIndex"].as_u64().unwrap_or(0);
        let limit = params["Limit"].as_u64().unwrap_or(50);

        if self.window_failure_at == Some(start) {
            return Err(Self::http_error(503));
        }

        let items: Vec<Value> = self
            .listing
            .iter()
            .skip(start as usize)
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(json!({ "Items": items }))
    }
}
