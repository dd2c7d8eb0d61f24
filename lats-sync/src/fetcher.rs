//! Sequential, throttled paginated fetch of whole collections.

use crate::dedup::RequestDeduplicator;
use crate::gate::OfflineFallbackGate;
use crate::retry::RetryExecutor;
use lats_core::{FetchConfig, LatsError, LatsResult, NormalizedRecord, RawRow};
use lats_store::{BackingStore, Direction, Query};
use std::sync::Arc;

const INITIAL_CAPACITY_ROWS: u64 = 10_000;

/// Number of pages needed for `total` rows in batches of `batch_size`.
pub fn page_count(total: u64, batch_size: u64) -> u64 {
    if batch_size == 0 {
        return 0;
    }
    total.div_ceil(batch_size)
}

/// Fetches every row of a collection page by page.
///
/// Pages are requested strictly in order, one at a time, each through the
/// page dedup registry and the retry executor. Any page failure that
/// survives retry aborts the whole call.
#[derive(Clone)]
pub struct PaginatedBulkFetcher {
    store: Arc<dyn BackingStore>,
    retry: RetryExecutor,
    pages: RequestDeduplicator<Vec<RawRow>>,
    gate: OfflineFallbackGate,
    config: FetchConfig,
}

impl PaginatedBulkFetcher {
    pub fn new(
        store: Arc<dyn BackingStore>,
        retry: RetryExecutor,
        pages: RequestDeduplicator<Vec<RawRow>>,
        gate: OfflineFallbackGate,
        config: FetchConfig,
    ) -> Self {
        Self {
            store,
            retry,
            pages,
            gate,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    pub fn gate(&self) -> &OfflineFallbackGate {
        &self.gate
    }

    pub fn page_registry(&self) -> &RequestDeduplicator<Vec<RawRow>> {
        &self.pages
    }

    /// All records of `R`'s collection, newest first.
    ///
    /// Offline, this reads the cached snapshot instead and makes no network
    /// calls. A fresh call always starts again from the first page.
    pub async fn fetch_all<R: NormalizedRecord>(&self) -> LatsResult<Vec<R>> {
        self.gate
            .with_fallback(R::COLLECTION, self.fetch_online::<R>(), normalize_all::<R>)
            .await
    }

    async fn fetch_online<R: NormalizedRecord>(&self) -> LatsResult<Vec<R>> {
        let collection = R::COLLECTION;
        let batch_size = self.config.batch_size.max(1);

        let total = {
            let store = &self.store;
            let query = Query::table(collection);
            self.retry.execute(|| store.count(&query)).await?
        };
        let total_pages = page_count(total, batch_size);
        if let Some(max_pages) = self.config.max_pages {
            if total_pages > max_pages {
                return Err(LatsError::PageLimitExceeded {
                    collection: collection.to_string(),
                    total_pages,
                    max_pages,
                });
            }
        }
        tracing::debug!(collection, total, total_pages, batch_size, "Starting paginated fetch");

        // the count is only a hint; grow past the first pages on demand
        let mut records = Vec::with_capacity(total.min(INITIAL_CAPACITY_ROWS) as usize);
        for page in 0..total_pages {
            let from = page * batch_size;
            let to = from + batch_size - 1;
            let rows = self.fetch_page(collection, R::columns(), from, to).await?;
            tracing::debug!(
                collection,
                page = page + 1,
                total_pages,
                returned = rows.len(),
                "Fetched page"
            );
            for row in rows {
                records.push(R::normalize(row)?);
            }
            if page + 1 < total_pages {
                tokio::time::sleep(self.config.inter_page_delay()).await;
            }
        }

        if self.config.write_through_cache && R::write_through() {
            self.write_through(collection, &records).await;
        }
        Ok(records)
    }

    async fn fetch_page(&self, collection: &str, columns: &str, from: u64, to: u64) -> LatsResult<Vec<RawRow>> {
        let key = format!("{collection}:{columns}:{from}-{to}");
        let query = Query::table(collection)
            .select(columns)
            .order("created_at", Direction::Desc)
            .range(from, to);
        let store = self.store.clone();
        let retry = self.retry.clone();
        self.pages
            .dedupe(&key, move || async move {
                retry.execute(|| store.select(&query)).await
            })
            .await
    }

    /// Forget registered page requests for `collection`, so the next fetch
    /// reads every page anew.
    pub fn forget_pages(&self, collection: &str) {
        self.pages.forget_prefix(&format!("{collection}:"));
    }

    async fn write_through<R: NormalizedRecord>(&self, collection: &str, records: &[R]) {
        let rows: LatsResult<Vec<RawRow>> = records.iter().map(R::to_row).collect();
        let result = match rows {
            Ok(rows) => self.gate.cache().put_all(collection, rows).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            tracing::warn!(collection, error = %err, "Failed to refresh offline cache");
        }
    }
}

fn normalize_all<R: NormalizedRecord>(rows: Vec<RawRow>) -> LatsResult<Vec<R>> {
    rows.into_iter().map(R::normalize).collect()
}
