//! Online/offline routing for collection reads.

use crate::probe::NetworkQualityProbe;
use lats_core::{GateConfig, LatsError, LatsResult, RawRow};
use lats_store::OfflineCache;
use std::future::Future;
use std::sync::Arc;

/// Chooses between the network path and the local cache per call.
///
/// The gate never retries; that happens one layer down. An online call that
/// fails mid-flight propagates its error unless
/// `serve_cache_after_transient_failure` is enabled.
#[derive(Clone)]
pub struct OfflineFallbackGate {
    probe: NetworkQualityProbe,
    cache: Arc<dyn OfflineCache>,
    config: GateConfig,
}

impl OfflineFallbackGate {
    pub fn new(probe: NetworkQualityProbe, cache: Arc<dyn OfflineCache>, config: GateConfig) -> Self {
        Self { probe, cache, config }
    }

    pub fn probe(&self) -> &NetworkQualityProbe {
        &self.probe
    }

    pub fn cache(&self) -> &Arc<dyn OfflineCache> {
        &self.cache
    }

    /// Await `online` when connected; otherwise hand the cached rows for
    /// `collection` to `offline` without touching the network.
    ///
    /// `online` is not polled at all on the offline path.
    pub async fn with_fallback<T, On, Off>(&self, collection: &str, online: On, offline: Off) -> LatsResult<T>
    where
        On: Future<Output = LatsResult<T>>,
        Off: FnOnce(Vec<RawRow>) -> LatsResult<T>,
    {
        if !self.probe.is_online() {
            let rows = self.cache.get_all(collection).await?;
            tracing::debug!(collection, cached = rows.len(), "Offline, serving from cache");
            return offline(rows);
        }

        match online.await {
            Err(err) if err.is_transient() && self.config.serve_cache_after_transient_failure => {
                let rows = self.cache.get_all(collection).await?;
                if rows.is_empty() {
                    return Err(LatsError::OfflineUnavailable {
                        collection: collection.to_string(),
                    });
                }
                tracing::warn!(
                    collection,
                    cached = rows.len(),
                    error = %err,
                    "Network path failed, serving from cache"
                );
                offline(rows)
            }
            result => result,
        }
    }
}
