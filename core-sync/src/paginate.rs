//! # Paginated Fetcher
//!
//! Walks a listing endpoint window by window.
//!
//! ## Workflow
//!
//! 1. Normalize the query so every listing is walked the same way (physical
//!    items only, recursive, box sets expanded, no total count per window).
//! 2. Probe with `Limit=1` and `EnableTotalRecordCount=true` to learn the
//!    total. A failed probe ends the walk before any window is requested.
//! 3. Starting at the query's `StartIndex` (or 0), request windows of
//!    `page_size` items until the cursor reaches the total.
//!
//! Every [`Batch`] carries a [`RestorePoint`] whose `StartIndex` is the first
//! window not yet handed out. Feeding it back into [`PaginatedFetcher::fetch`]
//! resumes without repeating an item.
//!
//! ## Usage
//!
//! ```ignore
//! let fetcher = PaginatedFetcher::new(transport, 50)?;
//! let mut pages = fetcher.fetch(catalog::items(Some(library_id), Some("Movie"), true));
//!
//! while let Some(batch) = pages.next_batch().await? {
//!     for item in &batch.items {
//!         queue.push(item.id().unwrap_or_default());
//!     }
//!     save(&batch.restore_point);
//! }
//! ```

use core_runtime::config::MAX_PAGE_SIZE;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use futures::Stream;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::error::{Result, SyncError};
use crate::query::{Batch, ItemsResponse, Params, Query, RestorePoint, LIMIT, START_INDEX};
use crate::transport::ApiTransport;

/// Apply the parameters every paginated listing is walked with.
///
/// Caller values for these keys are overridden.
pub fn normalize(mut query: Query) -> Query {
    query.set("CollapseBoxSetItems", false);
    query.set("IsVirtualUnaired", false);
    query.set("EnableTotalRecordCount", false);
    query.set("LocationTypes", "FileSystem,Remote,Offline");
    query.set("IsMissing", false);
    query.set("Recursive", true);
    query
}

/// Produces [`ItemPages`] walks over a transport.
#[derive(Clone)]
pub struct PaginatedFetcher {
    transport: Arc<dyn ApiTransport>,
    window: u32,
    cancellation_token: CancellationToken,
    event_bus: Option<EventBus>,
}

impl PaginatedFetcher {
    /// Create a fetcher requesting `page_size` items per window.
    ///
    /// The window is capped at the server maximum of 50.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `page_size` is 0.
    pub fn new(transport: Arc<dyn ApiTransport>, page_size: u32) -> Result<Self> {
        if page_size == 0 {
            return Err(SyncError::InvalidArgument(
                "Page size must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            transport,
            window: page_size.min(MAX_PAGE_SIZE),
            cancellation_token: CancellationToken::new(),
            event_bus: None,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    /// Start a walk over `query`. Nothing is requested until the first
    /// [`ItemPages::next_batch`].
    pub fn fetch(&self, query: impl Into<Query>) -> ItemPages {
        let query = normalize(query.into());
        let cursor = query.start_index().unwrap_or(0);

        ItemPages {
            transport: Arc::clone(&self.transport),
            window: u64::from(self.window),
            cancellation_token: self.cancellation_token.clone(),
            event_bus: self.event_bus.clone(),
            query,
            state: WalkState::Probe,
            cursor,
            total_record_count: None,
            restore_point: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    Probe,
    Paging,
    Done,
}

/// One walk over a listing.
///
/// Ends after the last window, after the first error, or on cancellation.
/// An error or cancellation is reported exactly once; later calls return
/// `Ok(None)`.
pub struct ItemPages {
    transport: Arc<dyn ApiTransport>,
    window: u64,
    cancellation_token: CancellationToken,
    event_bus: Option<EventBus>,
    query: Query,
    state: WalkState,
    cursor: u64,
    total_record_count: Option<u64>,
    restore_point: Option<RestorePoint>,
}

impl ItemPages {
    /// Total reported by the probe, once it has run.
    pub fn total_record_count(&self) -> Option<u64> {
        self.total_record_count
    }

    /// Restore point of the last batch handed out.
    pub fn restore_point(&self) -> Option<&RestorePoint> {
        self.restore_point.as_ref()
    }

    /// The normalized query being walked.
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn is_done(&self) -> bool {
        self.state == WalkState::Done
    }

    /// Fetch the next window.
    #[instrument(skip(self), fields(endpoint = %self.query.endpoint, start_index = self.cursor))]
    pub async fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.state == WalkState::Done {
            return Ok(None);
        }

        if self.cancellation_token.is_cancelled() {
            self.state = WalkState::Done;
            return Err(SyncError::Cancelled);
        }

        if self.state == WalkState::Probe {
            match self.probe().await {
                Ok(total) => {
                    info!(total, start_index = self.cursor, "Paginating");
                    self.total_record_count = Some(total);
                    self.state = WalkState::Paging;
                }
                Err(SyncError::Cancelled) => {
                    self.state = WalkState::Done;
                    return Err(SyncError::Cancelled);
                }
                Err(e) => {
                    self.state = WalkState::Done;
                    error!(
                        endpoint = %self.query.endpoint,
                        params = ?self.query.params,
                        error = %e,
                        "Failed to retrieve the total record count"
                    );
                    self.emit_failure(None, &e);
                    return Err(SyncError::Probe {
                        endpoint: self.query.endpoint.clone(),
                        source: Box::new(e),
                    });
                }
            }
        }

        let total = self.total_record_count.unwrap_or(0);
        if self.cursor >= total {
            debug!(total, "Pagination exhausted");
            self.state = WalkState::Done;
            return Ok(None);
        }

        let start_index = self.cursor;
        let response = match self.fetch_window(start_index).await {
            Ok(response) => response,
            Err(e) => {
                self.state = WalkState::Done;
                if !e.is_cancelled() {
                    error!(start_index, error = %e, "Failed to fetch window");
                    self.emit_failure(Some(start_index), &e);
                }
                return Err(e);
            }
        };

        self.cursor = start_index + self.window;
        let restore_point = RestorePoint::new(&self.query, self.cursor);
        self.restore_point = Some(restore_point.clone());

        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Sync(SyncEvent::PageFetched {
                endpoint: self.query.endpoint.clone(),
                start_index,
                item_count: response.items.len() as u64,
                total_record_count: total,
            }))
            .ok();
        }

        debug!(start_index, items = response.items.len(), "Window fetched");

        Ok(Some(Batch {
            items: response.items,
            total_record_count: total,
            restore_point,
        }))
    }

    /// Consume the walk as a stream of batches.
    pub fn into_stream(self) -> impl Stream<Item = Result<Batch>> + Send {
        futures::stream::unfold(self, |mut pages| async move {
            match pages.next_batch().await {
                Ok(Some(batch)) => Some((Ok(batch), pages)),
                Ok(None) => None,
                Err(e) => Some((Err(e), pages)),
            }
        })
    }

    async fn probe(&self) -> Result<u64> {
        let mut params = self.query.params.clone();
        params.insert(LIMIT.to_string(), Value::from(1));
        params.insert("EnableTotalRecordCount".to_string(), Value::from(true));

        let body = self.get(params).await?;
        let response: ItemsResponse = serde_json::from_value(body)
            .map_err(|e| SyncError::InvalidResponse(format!("Probe body: {}", e)))?;

        response.total_record_count.ok_or_else(|| {
            SyncError::InvalidResponse("Probe response has no TotalRecordCount".to_string())
        })
    }

    async fn fetch_window(&self, start_index: u64) -> Result<ItemsResponse> {
        let mut params = self.query.params.clone();
        params.insert(START_INDEX.to_string(), Value::from(start_index));
        params.insert(LIMIT.to_string(), Value::from(self.window));

        let body = self.get(params).await?;
        serde_json::from_value(body)
            .map_err(|e| SyncError::InvalidResponse(format!("Window body: {}", e)))
    }

    async fn get(&self, params: Params) -> Result<Value> {
        tokio::select! {
            _ = self.cancellation_token.cancelled() => Err(SyncError::Cancelled),
            result = self.transport.get(&self.query.endpoint, &params) => result,
        }
    }

    fn emit_failure(&self, start_index: Option<u64>, error: &SyncError) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Sync(SyncEvent::PaginationFailed {
                endpoint: self.query.endpoint.clone(),
                start_index,
                message: error.to_string(),
            }))
            .ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves `total` numbered items and records every request.
    struct CatalogTransport {
        total: u64,
        requests: Mutex<Vec<Params>>,
    }

    impl CatalogTransport {
        fn new(total: u64) -> Self {
            Self {
                total,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ApiTransport for CatalogTransport {
        async fn get(&self, _endpoint: &str, params: &Params) -> Result<Value> {
            self.requests.lock().unwrap().push(params.clone());

            if params.get("EnableTotalRecordCount") == Some(&json!(true)) {
                return Ok(json!({ "Items": [], "TotalRecordCount": self.total }));
            }

            let start = params[START_INDEX].as_u64().unwrap();
            let limit = params[LIMIT].as_u64().unwrap();
            let items: Vec<Value> = (start..(start + limit).min(self.total))
                .map(|i| json!({ "Id": i.to_string(), "Type": "Movie" }))
                .collect();
            Ok(json!({ "Items": items }))
        }
    }

    #[test]
    fn test_normalize_overrides_caller_values() {
        let query = normalize(Query::new("Users/{UserId}/Items").param("Recursive", false));

        assert_eq!(query.get("Recursive"), Some(&json!(true)));
        assert_eq!(query.get("CollapseBoxSetItems"), Some(&json!(false)));
        assert_eq!(query.get("IsVirtualUnaired"), Some(&json!(false)));
        assert_eq!(query.get("EnableTotalRecordCount"), Some(&json!(false)));
        assert_eq!(query.get("IsMissing"), Some(&json!(false)));
        assert_eq!(
            query.get("LocationTypes"),
            Some(&json!("FileSystem,Remote,Offline"))
        );
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let transport = Arc::new(CatalogTransport::new(10));
        assert!(matches!(
            PaginatedFetcher::new(transport, 0),
            Err(SyncError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_window_capped_at_server_maximum() {
        let transport = Arc::new(CatalogTransport::new(10));
        assert_eq!(PaginatedFetcher::new(transport, 200).unwrap().window(), 50);
    }

    #[tokio::test]
    async fn test_probe_requests_single_item_with_count() {
        let transport = Arc::new(CatalogTransport::new(3));
        let fetcher = PaginatedFetcher::new(transport.clone(), 50).unwrap();

        let mut pages = fetcher.fetch(Query::new("Users/{UserId}/Items"));
        pages.next_batch().await.unwrap();

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0][LIMIT], json!(1));
        assert_eq!(requests[0]["EnableTotalRecordCount"], json!(true));
        assert_eq!(requests[1]["EnableTotalRecordCount"], json!(false));
        assert_eq!(requests[1][START_INDEX], json!(0));
        assert_eq!(requests[1][LIMIT], json!(50));
    }

    #[tokio::test]
    async fn test_counts_known_after_first_batch() {
        let transport = Arc::new(CatalogTransport::new(7));
        let fetcher = PaginatedFetcher::new(transport, 5).unwrap();
        let mut pages = fetcher.fetch(Query::new("Artists"));

        assert_eq!(pages.total_record_count(), None);
        assert!(pages.restore_point().is_none());

        let batch = pages.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 5);
        assert_eq!(pages.total_record_count(), Some(7));
        assert_eq!(pages.restore_point().unwrap().start_index(), 5);

        let batch = pages.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.ids(), vec!["5", "6"]);
        assert!(pages.next_batch().await.unwrap().is_none());
        assert!(pages.is_done());
    }
}
