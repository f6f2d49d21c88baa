//! # Catalog Sync
//!
//! Orchestrates one pass over a listing: discovery through the paginated
//! fetcher, hydration through the worker pool.
//!
//! ## Workflow
//!
//! 1. Walk the listing with the basic field selector and push every
//!    discovered `Id` onto a [`WorkQueue`]
//! 2. Start the [`WorkerPool`] over that queue with the caller's routes
//! 3. Hand back a [`SyncRun`]; [`SyncRun::finish`] waits for the pool and
//!    publishes the outcome
//!
//! A discovery failure stops discovery but not hydration: whatever was
//! enqueued before the failure is still drained, and the run's restore point
//! says where to pick discovery back up.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{catalog, CatalogSync, OutputRouter};
//!
//! # async fn example(sync: CatalogSync) -> Result<(), Box<dyn std::error::Error>> {
//! let mut router = OutputRouter::new();
//! let mut movies = router.channel("Movie");
//!
//! let run = sync.run(catalog::items(Some("lib"), Some("Movie"), true), router).await?;
//! let report = run.finish().await;
//! println!("{} delivered, {} dead letters", report.pool.delivered, report.dead_letters.len());
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::basic_info;
use crate::error::{Result, SyncError};
use crate::paginate::PaginatedFetcher;
use crate::pool::{DeadLetter, OutputRouter, PoolConfig, PoolHandle, PoolReport, WorkQueue, WorkerPool};
use crate::query::{Query, RestorePoint};
use crate::transport::{ApiTransport, HttpTransport};

/// Tuning for a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub page_size: u32,
    pub pool: PoolConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: core_runtime::config::DEFAULT_PAGE_SIZE,
            pool: PoolConfig::default(),
        }
    }
}

impl From<&CoreConfig> for SyncSettings {
    fn from(config: &CoreConfig) -> Self {
        Self {
            page_size: config.page_size,
            pool: PoolConfig::from(config),
        }
    }
}

/// Discovery plus hydration over one transport.
pub struct CatalogSync {
    transport: Arc<dyn ApiTransport>,
    settings: SyncSettings,
    event_bus: Option<EventBus>,
    cancellation_token: CancellationToken,
}

impl CatalogSync {
    pub fn new(transport: Arc<dyn ApiTransport>, settings: SyncSettings) -> Self {
        Self {
            transport,
            settings,
            event_bus: None,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Sync over direct HTTP with the configured server and tuning.
    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(
            Arc::new(HttpTransport::from_config(config)),
            SyncSettings::from(config),
        )
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Token that cancels discovery and every worker of runs started from
    /// here.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Sync(event)).ok();
        }
    }

    /// Discover `query` and start hydrating it.
    ///
    /// # Errors
    ///
    /// Only a configuration problem (page size 0) fails the call; discovery
    /// failures are carried in [`SyncRun::discovery_error`].
    #[instrument(skip(self, query, router), fields(endpoint = %query.endpoint))]
    pub async fn run(&self, query: Query, router: OutputRouter) -> Result<SyncRun> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut fetcher = PaginatedFetcher::new(Arc::clone(&self.transport), self.settings.page_size)?
            .with_cancellation(self.cancellation_token.clone());
        if let Some(bus) = &self.event_bus {
            fetcher = fetcher.with_event_bus(bus.clone());
        }

        info!(run_id = %run_id, "Starting catalog sync");
        self.emit(SyncEvent::Started {
            run_id: run_id.clone(),
            endpoint: query.endpoint.clone(),
        });

        let query = query.param("Fields", basic_info());
        let queue = Arc::new(WorkQueue::new());
        let mut pages = fetcher.fetch(query);
        let mut discovered = 0u64;
        let mut discovery_error = None;

        loop {
            match pages.next_batch().await {
                Ok(Some(batch)) => {
                    let ids = batch.ids();
                    if ids.len() < batch.len() {
                        warn!(
                            missing = batch.len() - ids.len(),
                            "Items without an Id skipped"
                        );
                    }
                    discovered += ids.len() as u64;
                    queue.extend(ids);
                }
                Ok(None) => break,
                Err(e) => {
                    if e.is_cancelled() {
                        info!(run_id = %run_id, "Discovery cancelled");
                    } else {
                        error!(run_id = %run_id, error = %e, "Discovery failed");
                    }
                    discovery_error = Some(e);
                    break;
                }
            }
        }

        info!(discovered, "Discovery finished, hydrating");

        let (dead_letter_tx, dead_letter_rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(
            Arc::clone(&self.transport),
            queue,
            router,
            self.settings.pool,
        )
        .with_cancellation(self.cancellation_token.clone())
        .with_dead_letters(dead_letter_tx);
        if let Some(bus) = &self.event_bus {
            pool = pool.with_event_bus(bus.clone());
        }

        Ok(SyncRun {
            run_id,
            started_at,
            clock,
            discovered,
            total_record_count: pages.total_record_count(),
            restore_point: pages.restore_point().cloned(),
            discovery_error,
            pool: pool.start(),
            dead_letters: dead_letter_rx,
            event_bus: self.event_bus.clone(),
        })
    }
}

/// A sync run whose workers are hydrating.
pub struct SyncRun {
    run_id: String,
    started_at: DateTime<Utc>,
    clock: Instant,
    discovered: u64,
    total_record_count: Option<u64>,
    restore_point: Option<RestorePoint>,
    discovery_error: Option<SyncError>,
    pool: PoolHandle,
    dead_letters: mpsc::UnboundedReceiver<DeadLetter>,
    event_bus: Option<EventBus>,
}

impl SyncRun {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Identifiers pushed to the pool.
    pub fn discovered(&self) -> u64 {
        self.discovered
    }

    pub fn total_record_count(&self) -> Option<u64> {
        self.total_record_count
    }

    /// Where discovery stopped; `None` if no window was fetched.
    pub fn restore_point(&self) -> Option<&RestorePoint> {
        self.restore_point.as_ref()
    }

    pub fn discovery_error(&self) -> Option<&SyncError> {
        self.discovery_error.as_ref()
    }

    pub fn pool(&self) -> &PoolHandle {
        &self.pool
    }

    /// Wait for the pool to drain and publish the outcome.
    pub async fn finish(mut self) -> SyncReport {
        let pool = self.pool.wait().await;

        let mut dead_letters = Vec::new();
        while let Ok(letter) = self.dead_letters.try_recv() {
            dead_letters.push(letter);
        }

        let duration_secs = self.clock.elapsed().as_secs();
        let cancelled = pool.cancelled
            || self
                .discovery_error
                .as_ref()
                .is_some_and(SyncError::is_cancelled);

        let event = if cancelled {
            SyncEvent::Cancelled {
                run_id: self.run_id.clone(),
            }
        } else if let Some(e) = &self.discovery_error {
            SyncEvent::Failed {
                run_id: self.run_id.clone(),
                message: e.to_string(),
                recoverable: self.restore_point.is_some(),
            }
        } else {
            SyncEvent::Completed {
                run_id: self.run_id.clone(),
                discovered: self.discovered,
                completed: pool.completed,
                delivered: pool.delivered,
                dead_lettered: pool.dead_lettered,
                duration_secs,
            }
        };

        info!(
            run_id = %self.run_id,
            discovered = self.discovered,
            completed = pool.completed,
            delivered = pool.delivered,
            dead_lettered = pool.dead_lettered,
            cancelled,
            "Catalog sync finished"
        );

        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Sync(event)).ok();
        }

        SyncReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            discovered: self.discovered,
            total_record_count: self.total_record_count,
            restore_point: self.restore_point,
            discovery_error: self.discovery_error,
            cancelled,
            pool,
            dead_letters,
        }
    }
}

/// Outcome of a finished run.
#[derive(Debug)]
pub struct SyncReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub discovered: u64,
    pub total_record_count: Option<u64>,
    pub restore_point: Option<RestorePoint>,
    pub discovery_error: Option<SyncError>,
    pub cancelled: bool,
    pub pool: PoolReport,
    pub dead_letters: Vec<DeadLetter>,
}

impl SyncReport {
    /// Discovery ran to the end and nothing was cancelled.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.discovery_error.is_none()
    }
}
