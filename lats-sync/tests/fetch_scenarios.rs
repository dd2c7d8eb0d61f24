//! End-to-end read and write scenarios over a fault-injecting store.
//!
//! Every test runs on paused time, so backoff, throttling, and grace
//! periods elapse instantly and deterministically.

#[path = "support/harness.rs"]
mod harness;

use async_trait::async_trait;
use harness::Harness;
use lats_core::{
    ColorTag, CustomerPatch, FetchConfig, LatsError, LatsResult, NewCustomer, NormalizedRecord,
    RawRow, RemoteError, TransientKind, CUSTOMERS,
};
use lats_store::{BackingStore, Filter, InMemoryOfflineCache, OfflineCache, Query, SharedConnectivity};
use lats_sync::DataLayer;
use lats_test_utils::assertions::{assert_not_found, assert_transient};
use lats_test_utils::{fixtures, FlakyStore, MemoryStore, ScriptedTransport, StoreOp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn flaky(count: u64) -> FlakyStore {
    FlakyStore::new(fixtures::seeded_store(count))
}

// ============================================================================
// PAGINATION AND RETRY
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_page_failure_recovers_within_retry_budget() {
    let harness = Harness::new(flaky(130).fail_page(50, 2, TransientKind::ConnectionReset));

    let customers = harness.layer.customers().fetch_all_customers().await.unwrap();

    assert_eq!(customers.len(), 130);
    assert_eq!(harness.store.select_attempts_for_page(0), 1);
    assert_eq!(harness.store.select_attempts_for_page(50), 3);
    assert_eq!(harness.store.select_attempts_for_page(100), 1);
    // newest first
    assert_eq!(customers[0].id, fixtures::customer_id(129));
    assert_eq!(customers[129].id, fixtures::customer_id(0));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_abort_the_whole_fetch() {
    let harness = Harness::new(flaky(130).fail_page(100, 3, TransientKind::FetchFailed));

    let result = harness.layer.customers().fetch_all_customers().await;

    assert_transient(&result, TransientKind::FetchFailed);
    assert_eq!(harness.store.select_attempts_for_page(100), 3);
    // all-or-nothing: nothing was written through to the cache
    assert!(harness.cache.get_all(CUSTOMERS).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_remote_errors_are_not_retried() {
    let store = flaky(10).fail_with(
        StoreOp::Select,
        1,
        RemoteError::PermissionDenied {
            collection: CUSTOMERS.to_string(),
            reason: "row level security".to_string(),
        }
        .into(),
    );
    let harness = Harness::new(store);

    let result = harness.layer.customers().fetch_all_customers().await;

    assert!(matches!(
        result,
        Err(LatsError::Remote(RemoteError::PermissionDenied { .. }))
    ));
    assert_eq!(harness.store.attempts_for(StoreOp::Select), 1);
}

#[tokio::test(start_paused = true)]
async fn test_count_is_retried() {
    let harness = Harness::new(flaky(5).fail_count(2, TransientKind::Timeout));

    let customers = harness.layer.customers().fetch_all_customers().await.unwrap();

    assert_eq!(customers.len(), 5);
    assert_eq!(harness.store.attempts_for(StoreOp::Count), 3);
}

#[tokio::test(start_paused = true)]
async fn test_page_limit_checked_before_any_page() {
    let mut config = fixtures::test_config();
    config.fetch = FetchConfig::default().with_max_pages(2);
    let harness = Harness::with_config(flaky(130), config);

    let result = harness.layer.customers().fetch_all_customers().await;

    assert_eq!(
        result,
        Err(LatsError::PageLimitExceeded {
            collection: CUSTOMERS.to_string(),
            total_pages: 3,
            max_pages: 2,
        })
    );
    assert_eq!(harness.store.attempts_for(StoreOp::Select), 0);
}

/// Read-only store that synthesizes fixture rows for any range, so very
/// large collections cost nothing to seed.
struct GeneratedStore {
    total: u64,
    selects: AtomicU64,
    reject_selects: bool,
}

impl GeneratedStore {
    fn new(total: u64) -> Self {
        Self {
            total,
            selects: AtomicU64::new(0),
            reject_selects: false,
        }
    }
}

#[async_trait]
impl BackingStore for GeneratedStore {
    async fn count(&self, _query: &Query) -> LatsResult<u64> {
        Ok(self.total)
    }

    async fn select(&self, query: &Query) -> LatsResult<Vec<RawRow>> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        if self.reject_selects {
            return Err(rejected());
        }
        let Some(range) = query.range else {
            return Ok(Vec::new());
        };
        let end = (range.to + 1).min(self.total);
        // newest first
        Ok((range.from..end)
            .map(|position| fixtures::customer_row(self.total - 1 - position))
            .collect())
    }

    async fn insert(&self, _collection: &str, _row: RawRow) -> LatsResult<RawRow> {
        Err(rejected())
    }

    async fn update(&self, _collection: &str, _filter: &Filter, _patch: RawRow) -> LatsResult<RawRow> {
        Err(rejected())
    }

    async fn delete(&self, _collection: &str, _filter: &Filter) -> LatsResult<u64> {
        Err(rejected())
    }
}

fn rejected() -> LatsError {
    RemoteError::Rejected {
        status: 405,
        message: "read-only".to_string(),
    }
    .into()
}

fn generated_layer(store: Arc<GeneratedStore>) -> DataLayer {
    DataLayer::new(
        fixtures::test_config(),
        store,
        Arc::new(ScriptedTransport::new()),
        Arc::new(InMemoryOfflineCache::new()),
        Arc::new(SharedConnectivity::online()),
    )
}

#[tokio::test(start_paused = true)]
async fn test_default_config_fetches_past_fifty_thousand_rows() {
    let total = 50_001;
    let store = Arc::new(GeneratedStore::new(total));
    let layer = generated_layer(store.clone());

    let customers = layer.customers().fetch_all_customers().await.unwrap();

    assert_eq!(customers.len() as u64, total);
    assert_eq!(store.selects.load(Ordering::SeqCst), 1_001);
    assert_eq!(customers[0].id, fixtures::customer_id(total - 1));
    assert_eq!(customers[50_000].id, fixtures::customer_id(0));
}

#[tokio::test(start_paused = true)]
async fn test_reported_count_does_not_size_the_buffer() {
    let store = Arc::new(GeneratedStore {
        reject_selects: true,
        ..GeneratedStore::new(1 << 40)
    });
    let layer = generated_layer(store.clone());

    let result = layer.customers().fetch_all_customers().await;

    assert!(matches!(
        result,
        Err(LatsError::Remote(RemoteError::Rejected { status: 405, .. }))
    ));
    assert_eq!(store.selects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_collection_makes_no_page_requests() {
    let harness = Harness::new(FlakyStore::new(MemoryStore::new()));

    let customers = harness.layer.customers().fetch_all_customers().await.unwrap();

    assert!(customers.is_empty());
    assert_eq!(harness.store.attempts_for(StoreOp::Count), 1);
    assert_eq!(harness.store.attempts_for(StoreOp::Select), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pages_are_throttled() {
    let harness = Harness::new(flaky(130));
    let started = tokio::time::Instant::now();

    harness.layer.customers().fetch_all_customers().await.unwrap();

    // two gaps of 100ms between three pages
    assert!(started.elapsed() >= Duration::from_millis(200));
}

// ============================================================================
// DEDUPLICATION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_fetches_share_one_execution() {
    let harness = Harness::new(flaky(130).with_select_delay(Duration::from_millis(50)));
    let customers = harness.layer.customers();

    let (first, second) = tokio::join!(customers.fetch_all_customers(), customers.fetch_all_customers());

    assert_eq!(first.unwrap().len(), 130);
    assert_eq!(second.unwrap().len(), 130);
    assert_eq!(harness.store.attempts_for(StoreOp::Count), 1);
    assert_eq!(harness.store.select_attempts_for_page(0), 1);
}

#[tokio::test(start_paused = true)]
async fn test_registration_expires_after_grace() {
    let harness = Harness::new(flaky(3));
    let customers = harness.layer.customers();

    customers.fetch_all_customers().await.unwrap();
    assert!(customers
        .request_cache_stats()
        .keys
        .contains(&"fetchAllCustomers".to_string()));

    // within the grace window the settled result is reused
    customers.fetch_all_customers().await.unwrap();
    assert_eq!(harness.store.attempts_for(StoreOp::Count), 1);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(customers.request_cache_stats().size, 0);

    customers.fetch_all_customers().await.unwrap();
    assert_eq!(harness.store.attempts_for(StoreOp::Count), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clear_request_cache_forces_a_new_fetch() {
    let harness = Harness::new(flaky(3));
    let customers = harness.layer.customers();

    customers.fetch_all_customers().await.unwrap();
    customers.clear_request_cache();
    assert_eq!(customers.request_cache_stats().size, 0);

    customers.fetch_all_customers().await.unwrap();
    assert_eq!(harness.store.attempts_for(StoreOp::Count), 2);
}

// ============================================================================
// OFFLINE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_offline_with_empty_cache_returns_empty_without_calls() {
    let harness = Harness::new(flaky(20));
    harness.connectivity.set_online(false);

    let customers = harness.layer.customers().fetch_all_customers().await.unwrap();

    assert!(customers.is_empty());
    assert_eq!(harness.store.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_offline_serves_cached_snapshot() {
    let harness = Harness::new(flaky(20));
    harness
        .cache
        .put_all(CUSTOMERS, fixtures::customer_rows(4))
        .await
        .unwrap();
    harness.connectivity.set_online(false);

    let customers = harness.layer.customers().fetch_all_customers().await.unwrap();

    assert_eq!(customers.len(), 4);
    assert_eq!(harness.store.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_online_fetch_writes_through_for_offline_reads() {
    let harness = Harness::new(flaky(7));
    let customers = harness.layer.customers();

    let online = customers.fetch_all_customers().await.unwrap();
    assert_eq!(harness.cache.get_all(CUSTOMERS).await.unwrap().len(), 7);

    tokio::time::sleep(Duration::from_secs(2)).await;
    harness.connectivity.set_online(false);
    let calls_before = harness.store.total_calls();

    let offline = customers.fetch_all_customers().await.unwrap();
    assert_eq!(offline, online);
    assert_eq!(harness.store.total_calls(), calls_before);

    let by_id = customers
        .fetch_customer_by_id(fixtures::customer_id(3))
        .await
        .unwrap();
    assert_eq!(by_id.map(|c| c.name), Some("Customer 3".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_summary_listing_is_not_cached() {
    let harness = Harness::new(flaky(5));

    let summaries = harness
        .layer
        .customers()
        .fetch_all_customers_simple()
        .await
        .unwrap();

    assert_eq!(summaries.len(), 5);
    assert_eq!(summaries[0].color_tag, ColorTag::Vip);
    assert!(harness.cache.get_all(CUSTOMERS).await.unwrap().is_empty());
}

// ============================================================================
// WRITES
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_add_then_update_customer() {
    let harness = Harness::new(flaky(0));
    let customers = harness.layer.customers();

    let mut new_customer = NewCustomer::new("Mona");
    new_customer.color_tag = Some("premium".to_string());
    let created = customers.add_customer(new_customer).await.unwrap();
    assert_eq!(created.name, "Mona");
    assert_eq!(created.color_tag, ColorTag::Vip);

    let patch = CustomerPatch {
        points: Some(40),
        color_tag: Some("problem".to_string()),
        ..Default::default()
    };
    let updated = customers.update_customer(created.id, patch).await.unwrap();
    assert_eq!(updated.points, 40);
    assert_eq!(updated.color_tag, ColorTag::Complainer);
    assert!(updated.updated_at.is_some());

    let stored = harness.store.inner().rows(CUSTOMERS);
    assert_eq!(stored.len(), 1);
    assert_eq!(
        lats_core::Customer::normalize(stored[0].clone()).unwrap().points,
        40
    );
}

#[tokio::test(start_paused = true)]
async fn test_update_missing_customer_is_not_found() {
    let harness = Harness::new(flaky(2));

    let result = harness
        .layer
        .customers()
        .update_customer(Uuid::nil(), CustomerPatch::default())
        .await;

    assert_not_found(&result);
}

#[tokio::test(start_paused = true)]
async fn test_writes_are_never_retried() {
    let harness = Harness::new(FlakyStore::new(MemoryStore::new()).fail_with(
        StoreOp::Insert,
        1,
        LatsError::transient(TransientKind::ConnectionReset, "reset"),
    ));

    let result = harness
        .layer
        .customers()
        .add_customer(NewCustomer::new("Once"))
        .await;

    assert_transient(&result, TransientKind::ConnectionReset);
    assert_eq!(harness.store.attempts_for(StoreOp::Insert), 1);
    assert!(harness.store.inner().rows(CUSTOMERS).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fetch_by_id_is_retried_and_missing_is_none() {
    let harness = Harness::new(flaky(3).fail_with(
        StoreOp::Select,
        1,
        LatsError::transient(TransientKind::FetchFailed, "flaky"),
    ));
    let customers = harness.layer.customers();

    let found = customers
        .fetch_customer_by_id(fixtures::customer_id(2))
        .await
        .unwrap();
    assert_eq!(found.map(|c| c.id), Some(fixtures::customer_id(2)));
    assert_eq!(harness.store.attempts_for(StoreOp::Select), 2);

    assert_eq!(customers.fetch_customer_by_id(Uuid::nil()).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_store_is_usable_directly() {
    let harness = Harness::new(flaky(2));
    let removed = harness
        .store
        .delete(CUSTOMERS, &lats_store::Filter::eq("id", fixtures::customer_id(0).to_string()))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let customers = harness.layer.customers().fetch_all_customers().await.unwrap();
    assert_eq!(customers.len(), 1);
}
