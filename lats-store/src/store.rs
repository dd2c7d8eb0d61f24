//! Backing store trait.

use crate::query::{Filter, Query};
use async_trait::async_trait;
use lats_core::{LatsResult, RawRow};

/// Generic query/insert/update/delete interface of the hosted store.
///
/// Implementations report retryable transport failures as
/// `LatsError::Transient` and application-level failures as
/// `LatsError::Remote`; callers never inspect transport-specific errors.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Count the rows matching the query's filters.
    async fn count(&self, query: &Query) -> LatsResult<u64>;

    /// Fetch the rows matching the query, honouring order and range.
    async fn select(&self, query: &Query) -> LatsResult<Vec<RawRow>>;

    /// Insert a row and return it as stored.
    async fn insert(&self, collection: &str, row: RawRow) -> LatsResult<RawRow>;

    /// Apply `patch` to the row matching `filter` and return the updated row.
    ///
    /// Returns `RemoteError::NotFound` when nothing matches.
    async fn update(&self, collection: &str, filter: &Filter, patch: RawRow) -> LatsResult<RawRow>;

    /// Delete the rows matching `filter`, returning how many were removed.
    async fn delete(&self, collection: &str, filter: &Filter) -> LatsResult<u64>;
}
