//! Property-Based Tests for the fetch path
//!
//! - For any collection size N and batch size B, a bulk fetch issues exactly
//!   ceil(N/B) page requests and returns all N records in store order.
//! - For any retry budget M and K leading transient failures, a read
//!   succeeds iff K < M, after exactly min(K + 1, M) attempts.
//! - Normalizing an already-normalized record changes nothing.
//! - Offline reads never reach the store.

#[path = "support/harness.rs"]
mod harness;

use harness::Harness;
use lats_core::{
    Customer, CustomerSummary, FetchConfig, LatsError, NormalizedRecord, RetryConfig,
    TransientKind,
};
use lats_sync::{page_count, RetryExecutor};
use lats_test_utils::generators::{arb_raw_customer_row, arb_retry_config};
use lats_test_utils::{fixtures, FlakyStore, StoreOp};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn paused_runtime() -> Result<tokio::runtime::Runtime, TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_pages_cover_collection_in_order(total in 0u64..260, batch_size in 1u64..60) {
        let rt = paused_runtime()?;
        rt.block_on(async {
            let mut config = fixtures::test_config();
            config.fetch = FetchConfig::default()
                .with_batch_size(batch_size)
                .with_inter_page_delay(Duration::ZERO);
            let harness = Harness::with_config(FlakyStore::new(fixtures::seeded_store(total)), config);

            let customers = harness.layer.customers().fetch_all_customers().await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            prop_assert_eq!(
                harness.store.attempts_for(StoreOp::Select) as u64,
                page_count(total, batch_size)
            );
            prop_assert_eq!(customers.len() as u64, total);
            for (position, customer) in customers.iter().enumerate() {
                let index = total - 1 - position as u64;
                prop_assert_eq!(customer.id, fixtures::customer_id(index));
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_retry_succeeds_iff_failures_below_budget(
        config in arb_retry_config(),
        failures in 0u32..8,
    ) {
        let rt = paused_runtime()?;
        rt.block_on(async {
            let executor = RetryExecutor::new(config.clone());
            let calls = AtomicU32::new(0);

            let result = executor
                .execute(|| async {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    if call < failures {
                        Err(LatsError::transient(TransientKind::ConnectionReset, "reset"))
                    } else {
                        Ok(call)
                    }
                })
                .await;

            let max_attempts = config.max_attempts.max(1);
            prop_assert_eq!(result.is_ok(), failures < max_attempts);
            prop_assert_eq!(calls.load(Ordering::SeqCst), (failures + 1).min(max_attempts));
            Ok(())
        })?;
    }

    #[test]
    fn prop_backoff_is_capped_and_monotonic(config in arb_retry_config()) {
        let executor = RetryExecutor::new(config.clone());
        let mut previous = Duration::ZERO;
        for attempt in 1..=12 {
            let delay = executor.delay_for(attempt);
            prop_assert!(delay <= config.max_delay());
            prop_assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn prop_normalization_is_idempotent(row in arb_raw_customer_row()) {
        let once = Customer::normalize(row.clone())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let row_again = once.to_row().map_err(|e| TestCaseError::fail(e.to_string()))?;
        let twice = Customer::normalize(row_again)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(&once, &twice);

        let summary = CustomerSummary::normalize(row)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(summary.id, once.id);
        prop_assert_eq!(summary.color_tag, once.color_tag);
        prop_assert_eq!(summary.points, once.points);
    }

    #[test]
    fn prop_offline_reads_never_reach_the_store(total in 0u64..80, cached in 0u64..20) {
        let rt = paused_runtime()?;
        rt.block_on(async {
            let harness = Harness::new(FlakyStore::new(fixtures::seeded_store(total)));
            lats_store::OfflineCache::put_all(
                harness.cache.as_ref(),
                lats_core::CUSTOMERS,
                fixtures::customer_rows(cached),
            )
            .await
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
            harness.connectivity.set_online(false);

            let customers = harness.layer.customers().fetch_all_customers().await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            prop_assert_eq!(customers.len() as u64, cached);
            prop_assert_eq!(harness.store.total_calls(), 0);
            Ok(())
        })?;
    }
}

#[test]
fn test_single_attempt_budget_never_retries() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap();
    rt.block_on(async {
        let executor = RetryExecutor::new(RetryConfig::default().with_max_attempts(1));
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = executor
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LatsError::transient(TransientKind::FetchFailed, "down"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    });
}
