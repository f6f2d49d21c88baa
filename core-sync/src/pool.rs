//! # Worker Pool
//!
//! Resolves item identifiers into full records with a fixed number of
//! concurrent workers and routes each record to an output channel chosen by
//! its `Type`.
//!
//! ## Overview
//!
//! - [`WorkQueue`]: shared FIFO of identifiers with outstanding-work
//!   accounting, so producers can [`join`](WorkQueue::join) until every entry
//!   has been handled.
//! - [`OutputRouter`]: fixed `type -> channel` map. Records of unregistered
//!   types are dropped.
//! - [`WorkerPool`]: spawns the workers; [`PoolHandle::wait`] collects one
//!   [`WorkerReport`] per worker into a [`PoolReport`].
//!
//! ## Worker loop
//!
//! Each worker pops with a bounded wait. An empty queue for a whole idle
//! timeout means the run is over and the worker exits. For every popped
//! identifier the worker requests `Users/{UserId}/Items/<id>`:
//!
//! | Outcome                        | Delivered | Counted complete | Dead letter |
//! |--------------------------------|-----------|------------------|-------------|
//! | success, routed type           | yes       | yes              | no          |
//! | success, unrouted type         | no        | yes              | no          |
//! | HTTP retryable status (500)    | no        | yes              | no          |
//! | HTTP other status              | no        | no               | yes         |
//! | unclassified failure           | no        | yes              | no          |
//!
//! The queue's outstanding counter is released in every case.
//!
//! ## Usage
//!
//! ```ignore
//! let queue = Arc::new(WorkQueue::new());
//! queue.extend(ids);
//!
//! let mut router = OutputRouter::new();
//! let mut movies = router.channel("Movie");
//!
//! let handle = WorkerPool::new(transport, queue, router, PoolConfig::default()).start();
//! let report = handle.wait().await;
//! ```

use core_runtime::config::{
    CoreConfig, DEFAULT_IDLE_TIMEOUT, DEFAULT_RETRYABLE_STATUS, DEFAULT_WORKER_COUNT,
};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::item_endpoint;
use crate::query::{Item, Params};
use crate::transport::ApiTransport;

// ============================================================================
// Work Queue
// ============================================================================

/// Shared FIFO of item identifiers.
///
/// Every pushed entry counts as outstanding until a consumer calls
/// [`task_done`](Self::task_done) for it. Duplicates are allowed and are
/// processed once per push.
pub struct WorkQueue {
    sender: mpsc::UnboundedSender<String>,
    receiver: Mutex<mpsc::UnboundedReceiver<String>>,
    queued: AtomicUsize,
    outstanding: watch::Sender<usize>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0);

        Self {
            sender,
            receiver: Mutex::new(receiver),
            queued: AtomicUsize::new(0),
            outstanding,
        }
    }

    pub fn push(&self, item_id: impl Into<String>) {
        // The receiver lives as long as the queue, so sending cannot fail
        if self.sender.send(item_id.into()).is_ok() {
            self.queued.fetch_add(1, Ordering::SeqCst);
            self.outstanding.send_modify(|n| *n += 1);
        }
    }

    pub fn extend<I, S>(&self, item_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for item_id in item_ids {
            self.push(item_id);
        }
    }

    /// Entries waiting to be popped.
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries pushed but not yet marked done.
    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Pop the next entry, waiting at most `wait` for one to arrive.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<String> {
        let popped = tokio::time::timeout(wait, async {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await
        })
        .await
        .ok()
        .flatten();

        if popped.is_some() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
        popped
    }

    /// Mark one popped entry as handled.
    pub fn task_done(&self) {
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Wait until every pushed entry has been marked done.
    pub async fn join(&self) {
        let mut outstanding = self.outstanding.subscribe();
        // The sender is owned by `self`, so the channel cannot close here
        let _ = outstanding.wait_for(|n| *n == 0).await;
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("len", &self.len())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

// ============================================================================
// Output Routing
// ============================================================================

/// Fixed mapping from record type to output channel.
#[derive(Debug, Default, Clone)]
pub struct OutputRouter {
    routes: HashMap<String, mpsc::UnboundedSender<Item>>,
}

/// What happened to a hydrated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No channel for the record's type, or the record had no type.
    Unrouted,
    /// A channel exists but its receiver is gone.
    Closed,
}

impl OutputRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing sender for `item_type`.
    pub fn route(mut self, item_type: impl Into<String>, sender: mpsc::UnboundedSender<Item>) -> Self {
        self.routes.insert(item_type.into(), sender);
        self
    }

    /// Create a channel for `item_type` and return its receiving end.
    pub fn channel(&mut self, item_type: impl Into<String>) -> mpsc::UnboundedReceiver<Item> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.routes.insert(item_type.into(), sender);
        receiver
    }

    pub fn is_routed(&self, item_type: &str) -> bool {
        self.routes.contains_key(item_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn deliver(&self, item: Item) -> Delivery {
        let Some(sender) = item.item_type().and_then(|t| self.routes.get(t)) else {
            return Delivery::Unrouted;
        };

        match sender.send(item) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Closed,
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// An identifier that failed with a non-retryable status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub item_id: String,
    pub status: u16,
    pub message: String,
}

/// Counters kept by one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    /// Identifiers popped from the queue
    pub attempted: u64,
    /// Entries counted as complete
    pub completed: u64,
    /// Records sent to an output channel
    pub delivered: u64,
    /// Records dropped because nothing is routed for their type
    pub unrouted: u64,
    /// Entries that failed with the retryable status
    pub retryable: u64,
    /// Entries set aside with a non-retryable status
    pub dead_lettered: u64,
    /// Entries that failed without a status
    pub failed: u64,
    /// Worker stopped on cancellation rather than an idle queue
    pub cancelled: bool,
}

/// Aggregate of every worker's report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolReport {
    pub workers: Vec<WorkerReport>,
    pub attempted: u64,
    pub completed: u64,
    pub delivered: u64,
    pub unrouted: u64,
    pub retryable: u64,
    pub dead_lettered: u64,
    pub failed: u64,
    pub cancelled: bool,
}

impl PoolReport {
    fn from_workers(mut workers: Vec<WorkerReport>) -> Self {
        workers.sort_by_key(|w| w.worker_id);

        let mut report = PoolReport::default();
        for worker in &workers {
            report.attempted += worker.attempted;
            report.completed += worker.completed;
            report.delivered += worker.delivered;
            report.unrouted += worker.unrouted;
            report.retryable += worker.retryable;
            report.dead_lettered += worker.dead_lettered;
            report.failed += worker.failed;
            report.cancelled |= worker.cancelled;
        }
        report.workers = workers;
        report
    }
}

// ============================================================================
// Worker Pool
// ============================================================================

/// Pool tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub worker_count: usize,
    pub idle_timeout: Duration,
    pub retryable_status: u16,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            retryable_status: DEFAULT_RETRYABLE_STATUS,
        }
    }
}

impl From<&CoreConfig> for PoolConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            worker_count: config.worker_count,
            idle_timeout: config.idle_timeout,
            retryable_status: config.retryable_status,
        }
    }
}

/// Everything a worker task needs, shared between workers.
struct WorkerContext {
    transport: Arc<dyn ApiTransport>,
    queue: Arc<WorkQueue>,
    router: OutputRouter,
    config: PoolConfig,
    cancellation_token: CancellationToken,
    event_bus: Option<EventBus>,
    dead_letters: Option<mpsc::UnboundedSender<DeadLetter>>,
}

/// Hydrates identifiers from a [`WorkQueue`] with N concurrent workers.
pub struct WorkerPool {
    transport: Arc<dyn ApiTransport>,
    queue: Arc<WorkQueue>,
    router: OutputRouter,
    config: PoolConfig,
    cancellation_token: CancellationToken,
    event_bus: Option<EventBus>,
    dead_letters: Option<mpsc::UnboundedSender<DeadLetter>>,
}

impl WorkerPool {
    pub fn new(
        transport: Arc<dyn ApiTransport>,
        queue: Arc<WorkQueue>,
        router: OutputRouter,
        config: PoolConfig,
    ) -> Self {
        Self {
            transport,
            queue,
            router,
            config,
            cancellation_token: CancellationToken::new(),
            event_bus: None,
            dead_letters: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Send non-retryable failures to `sender`.
    pub fn with_dead_letters(mut self, sender: mpsc::UnboundedSender<DeadLetter>) -> Self {
        self.dead_letters = Some(sender);
        self
    }

    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn start(self) -> PoolHandle {
        // A pool always has at least one worker
        let worker_count = self.config.worker_count.max(1);

        info!(
            workers = worker_count,
            queued = self.queue.len(),
            "Starting worker pool"
        );

        let context = Arc::new(WorkerContext {
            transport: self.transport,
            queue: Arc::clone(&self.queue),
            router: self.router,
            config: self.config,
            cancellation_token: self.cancellation_token.clone(),
            event_bus: self.event_bus,
            dead_letters: self.dead_letters,
        });

        let mut tasks = JoinSet::new();
        for worker_id in 0..worker_count {
            tasks.spawn(run_worker(worker_id, Arc::clone(&context)));
        }

        PoolHandle {
            tasks,
            queue: self.queue,
            cancellation_token: self.cancellation_token,
        }
    }
}

/// Running pool.
pub struct PoolHandle {
    tasks: JoinSet<WorkerReport>,
    queue: Arc<WorkQueue>,
    cancellation_token: CancellationToken,
}

impl PoolHandle {
    /// Ask the workers to stop after their current item.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Workers still running.
    pub fn active_workers(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every worker to exit and aggregate their reports.
    pub async fn wait(mut self) -> PoolReport {
        let mut workers = Vec::new();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(report) => workers.push(report),
                Err(e) => error!(error = %e, "Worker task failed"),
            }
        }

        let report = PoolReport::from_workers(workers);
        info!(
            completed = report.completed,
            delivered = report.delivered,
            dead_lettered = report.dead_lettered,
            "Worker pool finished"
        );
        report
    }
}

#[instrument(skip(context), fields(worker = worker_id))]
async fn run_worker(worker_id: usize, context: Arc<WorkerContext>) -> WorkerReport {
    let mut report = WorkerReport {
        worker_id,
        ..Default::default()
    };
    let token = &context.cancellation_token;

    loop {
        if token.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let popped = tokio::select! {
            _ = token.cancelled() => {
                report.cancelled = true;
                break;
            }
            popped = context.queue.pop_timeout(context.config.idle_timeout) => popped,
        };

        let Some(item_id) = popped else {
            debug!("Queue idle, worker exiting");
            break;
        };

        report.attempted += 1;
        process_item(&context, &item_id, &mut report).await;
        context.queue.task_done();
    }

    if let Some(bus) = &context.event_bus {
        bus.emit(CoreEvent::Sync(SyncEvent::WorkerFinished {
            worker_id,
            completed: report.completed,
        }))
        .ok();
    }

    report
}

async fn process_item(context: &WorkerContext, item_id: &str, report: &mut WorkerReport) {
    let endpoint = item_endpoint(item_id);

    let error = match context.transport.get(&endpoint, &Params::new()).await {
        Ok(body) => {
            match context.router.deliver(Item::new(body)) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Unrouted => report.unrouted += 1,
                Delivery::Closed => {
                    warn!(item_id, "Output channel closed, record dropped");
                    report.unrouted += 1;
                }
            }
            report.completed += 1;
            return;
        }
        Err(error) => error,
    };

    match error.status() {
        Some(status) if status == context.config.retryable_status => {
            warn!(item_id, status, "Retryable status, leaving item for a later run");
            report.retryable += 1;
            report.completed += 1;
        }
        Some(status) => {
            error!(item_id, status, "Item request failed");
            report.dead_lettered += 1;

            if let Some(sender) = &context.dead_letters {
                sender
                    .send(DeadLetter {
                        item_id: item_id.to_string(),
                        status,
                        message: error.to_string(),
                    })
                    .ok();
            }

            if let Some(bus) = &context.event_bus {
                bus.emit(CoreEvent::Sync(SyncEvent::ItemDeadLettered {
                    item_id: item_id.to_string(),
                    status,
                }))
                .ok();
            }
        }
        None => {
            error!(item_id, error = ?error, "Item request failed");
            report.failed += 1;
            report.completed += 1;
        }
    }
}
