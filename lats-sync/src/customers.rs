//! Customer reads and writes exposed to application code.

use crate::dedup::{DedupStats, RequestDeduplicator};
use crate::fetcher::PaginatedBulkFetcher;
use chrono::Utc;
use lats_core::{
    Customer, CustomerPatch, CustomerSummary, DedupConfig, LatsResult, NewCustomer,
    NormalizedRecord, CUSTOMERS,
};
use lats_store::{Filter, Query};
use uuid::Uuid;

const FETCH_ALL_KEY: &str = "fetchAllCustomers";
const FETCH_ALL_SIMPLE_KEY: &str = "fetchAllCustomersSimple";

/// Every call logs failures at the boundary and returns them unchanged.
#[derive(Clone)]
pub struct CustomerRepository {
    fetcher: PaginatedBulkFetcher,
    all: RequestDeduplicator<Vec<Customer>>,
    simple: RequestDeduplicator<Vec<CustomerSummary>>,
}

impl CustomerRepository {
    pub fn new(fetcher: PaginatedBulkFetcher, dedup: &DedupConfig) -> Self {
        Self {
            fetcher,
            all: RequestDeduplicator::new(dedup),
            simple: RequestDeduplicator::new(dedup),
        }
    }

    pub fn fetcher(&self) -> &PaginatedBulkFetcher {
        &self.fetcher
    }

    /// Every customer with devices and payments, newest first.
    pub async fn fetch_all_customers(&self) -> LatsResult<Vec<Customer>> {
        let fetcher = self.fetcher.clone();
        let result = self
            .all
            .dedupe(FETCH_ALL_KEY, move || async move {
                fetcher.fetch_all::<Customer>().await
            })
            .await;
        log_failure("fetch_all_customers", result)
    }

    /// Like [`fetch_all_customers`](Self::fetch_all_customers), but never
    /// reuses a fetch or page request registered before this call. Used when
    /// the store has announced changes that an earlier fetch may have missed.
    pub async fn reload_customers(&self) -> LatsResult<Vec<Customer>> {
        self.fetcher.forget_pages(CUSTOMERS);
        let fetcher = self.fetcher.clone();
        let result = self
            .all
            .restart(FETCH_ALL_KEY, move || async move {
                fetcher.fetch_all::<Customer>().await
            })
            .await;
        log_failure("reload_customers", result)
    }

    /// Lightweight listing without sub-collections.
    pub async fn fetch_all_customers_simple(&self) -> LatsResult<Vec<CustomerSummary>> {
        let fetcher = self.fetcher.clone();
        let result = self
            .simple
            .dedupe(FETCH_ALL_SIMPLE_KEY, move || async move {
                fetcher.fetch_all::<CustomerSummary>().await
            })
            .await;
        log_failure("fetch_all_customers_simple", result)
    }

    /// One customer, or `None` if no row has this id. Offline, answers from
    /// the cached snapshot.
    pub async fn fetch_customer_by_id(&self, id: Uuid) -> LatsResult<Option<Customer>> {
        let id_text = id.to_string();
        let query = Query::table(CUSTOMERS)
            .select(Customer::columns())
            .eq("id", id_text.clone());
        let store = self.fetcher.store();

        let online = async {
            let rows = self.fetcher.retry().execute(|| store.select(&query)).await?;
            rows.into_iter().next().map(Customer::normalize).transpose()
        };
        let offline = |rows: Vec<lats_core::RawRow>| {
            rows.into_iter()
                .find(|row| row.get("id").and_then(|v| v.as_str()) == Some(id_text.as_str()))
                .map(Customer::normalize)
                .transpose()
        };
        let result = self
            .fetcher
            .gate()
            .with_fallback(CUSTOMERS, online, offline)
            .await;
        log_failure("fetch_customer_by_id", result)
    }

    /// Insert a customer. Writes are never retried.
    pub async fn add_customer(&self, customer: NewCustomer) -> LatsResult<Customer> {
        let result = async {
            let row = customer.to_row()?;
            let stored = self.fetcher.store().insert(CUSTOMERS, row).await?;
            Customer::normalize(stored)
        }
        .await;
        if let Ok(created) = &result {
            tracing::info!(customer_id = %created.id, "Customer created");
        }
        log_failure("add_customer", result)
    }

    /// Apply a partial update and stamp `updated_at`. Writes are never retried.
    pub async fn update_customer(&self, id: Uuid, patch: CustomerPatch) -> LatsResult<Customer> {
        let result = async {
            let row = patch.to_row(Utc::now())?;
            let filter = Filter::eq("id", id.to_string());
            let stored = self.fetcher.store().update(CUSTOMERS, &filter, row).await?;
            Customer::normalize(stored)
        }
        .await;
        log_failure("update_customer", result)
    }

    /// Forget every in-flight and recently settled request.
    pub fn clear_request_cache(&self) {
        self.all.clear();
        self.simple.clear();
        self.fetcher.page_registry().clear();
    }

    pub fn request_cache_stats(&self) -> DedupStats {
        let mut keys = self.all.stats().keys;
        keys.extend(self.simple.stats().keys);
        keys.extend(self.fetcher.page_registry().stats().keys);
        DedupStats {
            size: keys.len(),
            keys,
        }
    }
}

fn log_failure<T>(operation: &'static str, result: LatsResult<T>) -> LatsResult<T> {
    if let Err(err) = &result {
        tracing::error!(operation, error = %err, error_class = err.class(), "Customer operation failed");
    }
    result
}
