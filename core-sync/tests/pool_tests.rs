//! Worker pool behaviour against an in-memory server.

mod common;

use common::ScriptedTransport;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_sync::{OutputRouter, PoolConfig, WorkQueue, WorkerPool};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn config(workers: usize) -> PoolConfig {
    PoolConfig {
        worker_count: workers,
        idle_timeout: Duration::from_millis(100),
        retryable_status: 500,
    }
}

#[tokio::test]
async fn test_retryable_status_completes_without_delivery() {
    let transport = Arc::new(
        ScriptedTransport::with_items(&[("a", "Movie"), ("b", "Movie"), ("c", "Movie")])
            .fail_item("b", 500),
    );
    let queue = Arc::new(WorkQueue::new());
    queue.extend(["a", "b", "c"]);

    let mut router = OutputRouter::new();
    let mut movies = router.channel("Movie");

    let report = WorkerPool::new(transport.clone(), queue.clone(), router, config(2))
        .start()
        .wait()
        .await;

    assert_eq!(report.completed, 3);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.retryable, 1);
    assert_eq!(report.dead_lettered, 0);
    assert_eq!(report.workers.len(), 2);
    assert_eq!(queue.outstanding(), 0);

    let mut delivered = HashSet::new();
    while let Ok(item) = movies.try_recv() {
        delivered.insert(item.id().unwrap().to_string());
    }
    assert_eq!(delivered, HashSet::from(["a".to_string(), "c".to_string()]));
}

#[tokio::test]
async fn test_non_retryable_status_goes_to_dead_letters() {
    let transport = Arc::new(
        ScriptedTransport::with_items(&[("a", "Movie"), ("b", "Movie"), ("c", "Movie")])
            .fail_item("c", 404),
    );
    let queue = Arc::new(WorkQueue::new());
    queue.extend(["a", "b", "c"]);

    let (dead_tx, mut dead_rx) = mpsc::unbounded_channel();
    let bus = EventBus::new(32);
    let mut events = bus.subscribe();

    let report = WorkerPool::new(transport, queue.clone(), OutputRouter::new(), config(2))
        .with_dead_letters(dead_tx)
        .with_event_bus(bus.clone())
        .start()
        .wait()
        .await;

    assert_eq!(report.attempted, 3);
    assert_eq!(report.completed, 2);
    assert_eq!(report.dead_lettered, 1);

    // The queue is fully released even though one entry did not complete
    tokio::time::timeout(Duration::from_millis(100), queue.join())
        .await
        .unwrap();

    let letter = dead_rx.try_recv().unwrap();
    assert_eq!(letter.item_id, "c");
    assert_eq!(letter.status, 404);

    let mut dead_events = 0;
    let mut finished_workers = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            CoreEvent::Sync(SyncEvent::ItemDeadLettered { item_id, status }) => {
                assert_eq!((item_id.as_str(), status), ("c", 404));
                dead_events += 1;
            }
            CoreEvent::Sync(SyncEvent::WorkerFinished { .. }) => finished_workers += 1,
            _ => {}
        }
    }
    assert_eq!(dead_events, 1);
    assert_eq!(finished_workers, 2);
}

#[tokio::test]
async fn test_every_identifier_attempted() {
    let transport = Arc::new(ScriptedTransport::with_movies(40));
    let queue = Arc::new(WorkQueue::new());
    queue.extend((0..40).map(|i| i.to_string()));

    let mut router = OutputRouter::new();
    let _movies = router.channel("Movie");

    let report = WorkerPool::new(transport.clone(), queue, router, config(4))
        .start()
        .wait()
        .await;

    let requested: HashSet<String> = transport.item_requests().into_iter().collect();
    assert_eq!(requested.len(), 40);
    assert_eq!(report.completed, 40);
    assert_eq!(report.delivered, 40);
}

#[tokio::test]
async fn test_records_only_reach_their_type_channel() {
    let transport = Arc::new(ScriptedTransport::with_items(&[
        ("m1", "Movie"),
        ("e1", "Episode"),
        ("p1", "Photo"),
        ("m2", "Movie"),
    ]));
    let queue = Arc::new(WorkQueue::new());
    queue.extend(["m1", "e1", "p1", "m2"]);

    let mut router = OutputRouter::new();
    let mut movies = router.channel("Movie");
    let mut episodes = router.channel("Episode");

    let report = WorkerPool::new(transport, queue, router, config(3))
        .start()
        .wait()
        .await;

    assert_eq!(report.completed, 4);
    assert_eq!(report.delivered, 3);
    assert_eq!(report.unrouted, 1);

    let mut movie_ids = Vec::new();
    while let Ok(item) = movies.try_recv() {
        assert_eq!(item.item_type(), Some("Movie"));
        movie_ids.push(item.id().unwrap().to_string());
    }
    movie_ids.sort();
    assert_eq!(movie_ids, vec!["m1", "m2"]);

    let episode = episodes.try_recv().unwrap();
    assert_eq!(episode.id(), Some("e1"));
    assert!(episodes.try_recv().is_err());
}

#[tokio::test]
async fn test_duplicates_processed_per_push() {
    let transport = Arc::new(ScriptedTransport::with_items(&[("a", "Movie")]));
    let queue = Arc::new(WorkQueue::new());
    queue.extend(["a", "a"]);

    let mut router = OutputRouter::new();
    let mut movies = router.channel("Movie");

    let report = WorkerPool::new(transport.clone(), queue, router, config(1))
        .start()
        .wait()
        .await;

    assert_eq!(report.completed, 2);
    assert_eq!(transport.item_requests(), vec!["a", "a"]);
    assert!(movies.try_recv().is_ok());
    assert!(movies.try_recv().is_ok());
}

#[tokio::test]
async fn test_empty_queue_terminates_within_idle_timeout() {
    let transport = Arc::new(ScriptedTransport::default());
    let queue = Arc::new(WorkQueue::new());

    let started = Instant::now();
    let report = WorkerPool::new(transport, queue, OutputRouter::new(), config(4))
        .start()
        .wait()
        .await;

    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(report.workers.len(), 4);
    assert_eq!(report.attempted, 0);
    assert!(!report.cancelled);
}

#[tokio::test]
async fn test_cancellation_stops_workers() {
    let transport = Arc::new(ScriptedTransport::with_movies(100).slow_items(Duration::from_millis(20)));
    let queue = Arc::new(WorkQueue::new());
    queue.extend((0..100).map(|i| i.to_string()));

    let token = CancellationToken::new();
    let handle = WorkerPool::new(
        transport,
        queue.clone(),
        OutputRouter::new(),
        PoolConfig {
            idle_timeout: Duration::from_secs(5),
            ..config(2)
        },
    )
    .with_cancellation(token.clone())
    .start();

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    let report = tokio::time::timeout(Duration::from_secs(1), handle.wait())
        .await
        .expect("cancelled workers should exit promptly");

    assert!(report.cancelled);
    assert!(report.attempted < 100);
    assert!(!queue.is_empty());
}
