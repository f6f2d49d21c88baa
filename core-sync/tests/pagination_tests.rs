//! Paginated walks against an in-memory catalog.

mod common;

use common::ScriptedTransport;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_sync::{catalog, Batch, PaginatedFetcher, Query, SyncError};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn collect(fetcher: &PaginatedFetcher, query: Query) -> Vec<Batch> {
    let mut pages = fetcher.fetch(query);
    let mut batches = Vec::new();
    while let Some(batch) = pages.next_batch().await.unwrap() {
        batches.push(batch);
    }
    batches
}

fn ids(batches: &[Batch]) -> Vec<String> {
    batches.iter().flat_map(Batch::ids).collect()
}

#[tokio::test]
async fn test_windows_cover_catalog_without_gaps() {
    let transport = Arc::new(ScriptedTransport::with_movies(120));
    let fetcher = PaginatedFetcher::new(transport.clone(), 50).unwrap();

    let batches = collect(&fetcher, catalog::items(None, Some("Movie"), true)).await;

    let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
    assert_eq!(sizes, vec![50, 50, 20]);

    let expected: Vec<String> = (0..120).map(|i| i.to_string()).collect();
    assert_eq!(ids(&batches), expected);

    assert!(batches.iter().all(|b| b.total_record_count == 120));
    assert_eq!(batches[1].restore_point.start_index(), 100);
    assert_eq!(transport.windows(), vec![(0, 50), (50, 50), (100, 50)]);
}

#[tokio::test]
async fn test_resume_from_restore_point_is_disjoint() {
    let transport = Arc::new(ScriptedTransport::with_movies(120));
    let fetcher = PaginatedFetcher::new(transport.clone(), 50).unwrap();

    let mut pages = fetcher.fetch(catalog::items(None, None, true));
    let first = pages.next_batch().await.unwrap().unwrap();
    let restore_point = first.restore_point.clone();
    drop(pages);

    let rest = collect(&fetcher, restore_point.into_query()).await;

    let seen: HashSet<String> = first.ids().into_iter().collect();
    let resumed: Vec<String> = ids(&rest);
    assert!(resumed.iter().all(|id| !seen.contains(id)));
    assert_eq!(seen.len() + resumed.len(), 120);
    assert_eq!(rest.len(), 2);
}

#[tokio::test]
async fn test_resume_with_explicit_start_index() {
    let transport = Arc::new(ScriptedTransport::with_movies(30));
    let fetcher = PaginatedFetcher::new(transport.clone(), 10).unwrap();

    let batches = collect(&fetcher, Query::new("Users/{UserId}/Items").param("StartIndex", 20)).await;

    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].ids().first().map(String::as_str), Some("20"));
    assert_eq!(batches[0].restore_point.start_index(), 30);
}

#[tokio::test]
async fn test_empty_catalog_yields_no_batches() {
    let transport = Arc::new(ScriptedTransport::with_movies(0));
    let fetcher = PaginatedFetcher::new(transport.clone(), 50).unwrap();

    let mut pages = fetcher.fetch(Query::new("Artists"));
    assert!(pages.next_batch().await.unwrap().is_none());
    assert_eq!(pages.total_record_count(), Some(0));
    assert!(transport.windows().is_empty());
}

#[tokio::test]
async fn test_probe_failure_reported_once() {
    let transport = Arc::new(ScriptedTransport::with_movies(10).fail_probe(401));
    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let fetcher = PaginatedFetcher::new(transport.clone(), 50)
        .unwrap()
        .with_event_bus(bus.clone());

    let mut pages = fetcher.fetch(Query::new("Users/{UserId}/Items"));

    match pages.next_batch().await {
        Err(SyncError::Probe { endpoint, source }) => {
            assert_eq!(endpoint, "Users/{UserId}/Items");
            assert_eq!(source.status(), Some(401));
        }
        other => panic!("expected probe error, got {:?}", other),
    }

    assert!(pages.next_batch().await.unwrap().is_none());
    assert!(transport.windows().is_empty());

    match events.try_recv().unwrap() {
        CoreEvent::Sync(SyncEvent::PaginationFailed { start_index, .. }) => {
            assert_eq!(start_index, None)
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_window_failure_ends_walk() {
    let transport = Arc::new(ScriptedTransport::with_movies(30).fail_window_at(10));
    let fetcher = PaginatedFetcher::new(transport.clone(), 10).unwrap();

    let mut pages = fetcher.fetch(Query::new("Users/{UserId}/Items"));

    assert_eq!(pages.next_batch().await.unwrap().unwrap().len(), 10);
    let err = pages.next_batch().await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(pages.next_batch().await.unwrap().is_none());

    // Resuming from the last good restore point retries the failed window
    assert_eq!(pages.restore_point().unwrap().start_index(), 10);
}

#[tokio::test]
async fn test_cancellation_ends_walk() {
    let transport = Arc::new(ScriptedTransport::with_movies(100));
    let token = CancellationToken::new();
    let fetcher = PaginatedFetcher::new(transport.clone(), 10)
        .unwrap()
        .with_cancellation(token.clone());

    let mut pages = fetcher.fetch(Query::new("Users/{UserId}/Items"));
    assert!(pages.next_batch().await.unwrap().is_some());

    token.cancel();
    assert!(pages.next_batch().await.unwrap_err().is_cancelled());
    assert!(pages.next_batch().await.unwrap().is_none());
    assert_eq!(transport.windows().len(), 1);
}

#[tokio::test]
async fn test_stream_and_progress_events() {
    let transport = Arc::new(ScriptedTransport::with_movies(25));
    let bus = EventBus::new(32);
    let mut events = bus.subscribe();
    let fetcher = PaginatedFetcher::new(transport, 10)
        .unwrap()
        .with_event_bus(bus.clone());

    let batches: Vec<_> = fetcher
        .fetch(Query::new("Users/{UserId}/Items"))
        .into_stream()
        .collect()
        .await;

    assert_eq!(batches.len(), 3);
    assert!(batches.iter().all(Result::is_ok));

    let mut fetched = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Sync(SyncEvent::PageFetched { start_index, item_count, .. }) = event {
            fetched.push((start_index, item_count));
        }
    }
    assert_eq!(fetched, vec![(0, 10), (10, 10), (20, 5)]);
}
