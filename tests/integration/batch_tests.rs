//! Batch dispatcher integration tests.
//!
//! Tests verify:
//! - Quota admission is all-or-nothing per batch
//! - Results stay index-aligned when items fail
//! - Successful items are persisted and recorded in the caller's history
//! - Unconstrained tiers bypass the quota

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use toonify::batch::{AccountTier, BatchItem, CallerContext};
use toonify::error::{BatchError, ProcessError};
use toonify::store::{AccountLedger, AssetStore, MemoryLedger};
use toonify::style::{ResolutionTier, StyleRequest};

use super::test_utils::{scene_png, test_dispatcher, CountingStore};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn items(styles: &[&str]) -> Vec<BatchItem> {
    styles
        .iter()
        .map(|style| {
            BatchItem::new(
                scene_png(40, 24),
                StyleRequest::from_identifier(style, ResolutionTier::Standard),
            )
        })
        .collect()
}

fn free(id: &str) -> CallerContext {
    CallerContext::new(id, AccountTier::Free)
}

// =============================================================================
// Quota Admission
// =============================================================================

#[tokio::test]
async fn test_quota_admits_batch_that_fits() {
    let store = Arc::new(CountingStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let dispatcher = test_dispatcher(store, ledger.clone(), 5);
    let caller = free("alice");

    let first = dispatcher
        .dispatch(&caller, items(&["cartoon", "sketch", "anime"]))
        .await
        .unwrap();
    assert!(first.iter().all(|r| r.is_success()));

    let second = dispatcher
        .dispatch(&caller, items(&["ghibli", "vintage"]))
        .await
        .unwrap();
    assert_eq!(second.len(), 2);
    assert!(second.iter().all(|r| r.is_success()));

    assert_eq!(ledger.usage_count("alice", DAY).await.unwrap(), 5);
}

#[tokio::test]
async fn test_quota_rejects_whole_batch_that_overflows() {
    let store = Arc::new(CountingStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let dispatcher = test_dispatcher(store.clone(), ledger.clone(), 5);
    let caller = free("bob");

    dispatcher
        .dispatch(&caller, items(&["cartoon", "sketch", "anime"]))
        .await
        .unwrap();

    let err = dispatcher
        .dispatch(&caller, items(&["pop_art", "watercolor", "oil_painting"]))
        .await
        .unwrap_err();
    match err {
        BatchError::QuotaExceeded {
            used,
            requested,
            limit,
            ..
        } => {
            assert_eq!((used, requested, limit), (3, 3, 5));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // Nothing from the rejected batch ran
    assert_eq!(ledger.usage_count("bob", DAY).await.unwrap(), 3);
    assert_eq!(ledger.history("bob").await.len(), 3);
}

#[tokio::test]
async fn test_quota_is_per_caller() {
    let store = Arc::new(CountingStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let dispatcher = test_dispatcher(store, ledger, 2);

    dispatcher
        .dispatch(&free("carol"), items(&["cartoon", "sketch"]))
        .await
        .unwrap();
    let other = dispatcher
        .dispatch(&free("dave"), items(&["cartoon", "sketch"]))
        .await
        .unwrap();
    assert!(other.iter().all(|r| r.is_success()));
}

#[tokio::test]
async fn test_premium_callers_are_not_limited() {
    let store = Arc::new(CountingStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let dispatcher = test_dispatcher(store, ledger, 1);
    let caller = CallerContext::new("vip", AccountTier::Premium);

    let results = dispatcher
        .dispatch(&caller, items(&["cartoon", "sketch", "anime"]))
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.is_success()));
}

#[tokio::test]
async fn test_single_process_counts_as_batch_of_one() {
    let store = Arc::new(CountingStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let dispatcher = test_dispatcher(store, ledger, 1);
    let caller = free("erin");

    let mut single = items(&["cartoon", "sketch"]);
    let second = single.pop().unwrap();
    let first = single.pop().unwrap();

    dispatcher.process(&caller, first).await.unwrap();
    let err = dispatcher.process(&caller, second).await.unwrap_err();
    assert!(matches!(
        err,
        ProcessError::Batch(BatchError::QuotaExceeded { .. })
    ));
}

// =============================================================================
// Partial Failure
// =============================================================================

#[tokio::test]
async fn test_malformed_item_fails_in_place() {
    let store = Arc::new(CountingStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let dispatcher = test_dispatcher(store.clone(), ledger.clone(), 5);
    let caller = free("frank");

    let batch = vec![
        BatchItem::new(
            scene_png(40, 24),
            StyleRequest::from_identifier("cartoon", ResolutionTier::Standard),
        ),
        BatchItem::new(
            Bytes::from_static(b"\x00\x01not an image"),
            StyleRequest::from_identifier("sketch", ResolutionTier::Standard),
        ),
        BatchItem::new(
            scene_png(40, 24),
            StyleRequest::from_identifier("comic_book", ResolutionTier::Standard),
        ),
    ];

    let results = dispatcher.dispatch(&caller, batch).await.unwrap();
    assert_eq!(results.len(), 3);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.index, i);
    }

    assert!(results[0].is_success());
    assert!(!results[1].is_success());
    assert!(results[1].failure_reason().unwrap().contains("Invalid image"));
    assert!(results[2].is_success());

    assert_eq!(results[0].success().unwrap().label, "cartoon");
    assert_eq!(results[2].success().unwrap().label, "comic_book");

    // Only successes reach the store and the history
    for result in [&results[0], &results[2]] {
        let name = &result.success().unwrap().asset_name;
        assert!(store.read_asset(name).await.is_ok());
        assert!(ledger.is_owner("frank", name).await.unwrap());
    }
    assert_eq!(ledger.history("frank").await.len(), 2);
}

#[tokio::test]
async fn test_results_are_distinct_assets() {
    let store = Arc::new(CountingStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let dispatcher = test_dispatcher(store, ledger, 10);

    let results = dispatcher
        .dispatch(&free("gina"), items(&["cartoon", "cartoon", "cartoon", "cartoon"]))
        .await
        .unwrap();

    let mut names: Vec<_> = results
        .iter()
        .map(|r| r.success().unwrap().asset_name.clone())
        .collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 4);
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() {
    let store = Arc::new(CountingStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let dispatcher = test_dispatcher(store, ledger.clone(), 5);

    let results = dispatcher.dispatch(&free("hank"), Vec::new()).await.unwrap();
    assert!(results.is_empty());
    assert_eq!(ledger.usage_count("hank", DAY).await.unwrap(), 0);
}
