//! Wiring for the whole data layer.

use crate::customers::CustomerRepository;
use crate::dedup::RequestDeduplicator;
use crate::feed::CustomerFeed;
use crate::fetcher::PaginatedBulkFetcher;
use crate::gate::OfflineFallbackGate;
use crate::probe::NetworkQualityProbe;
use crate::realtime::RealtimeHub;
use crate::retry::RetryExecutor;
use lats_core::{LatsConfig, LatsResult, CUSTOMERS};
use lats_store::{
    BackingStore, ChannelSpec, ConnectivitySource, InMemoryOfflineCache, JsonFileCache,
    OfflineCache, PhoenixTransport, RealtimeTransport, RestBackingStore, SharedConnectivity,
};
use std::sync::Arc;

/// Root object owning every component and the registries they share.
///
/// Nothing here is global: two layers built from the same config have
/// separate dedup registries and separate realtime channels.
#[derive(Clone)]
pub struct DataLayer {
    config: LatsConfig,
    customers: CustomerRepository,
    hub: RealtimeHub,
    probe: NetworkQualityProbe,
}

impl DataLayer {
    pub fn new(
        config: LatsConfig,
        store: Arc<dyn BackingStore>,
        transport: Arc<dyn RealtimeTransport>,
        cache: Arc<dyn OfflineCache>,
        connectivity: Arc<dyn ConnectivitySource>,
    ) -> Self {
        let probe = NetworkQualityProbe::new(connectivity);
        let gate = OfflineFallbackGate::new(probe.clone(), cache, config.gate.clone());
        let fetcher = PaginatedBulkFetcher::new(
            store,
            RetryExecutor::new(config.retry.clone()),
            RequestDeduplicator::new(&config.dedup),
            gate,
            config.fetch.clone(),
        );
        let customers = CustomerRepository::new(fetcher, &config.dedup);
        let hub = RealtimeHub::new(transport, config.realtime.clone());
        Self {
            config,
            customers,
            hub,
            probe,
        }
    }

    /// Build a layer against the hosted store described by `config`.
    ///
    /// Returns the connectivity handle alongside so the host can report
    /// online/offline transitions.
    pub fn connect(config: LatsConfig) -> LatsResult<(Self, SharedConnectivity)> {
        config.validate()?;
        let store = Arc::new(RestBackingStore::new(&config.store)?);
        let transport = Arc::new(PhoenixTransport::new(&config.store));
        let cache: Arc<dyn OfflineCache> = match &config.cache.directory {
            Some(directory) => Arc::new(JsonFileCache::new(directory.clone())),
            None => Arc::new(InMemoryOfflineCache::new()),
        };
        let connectivity = SharedConnectivity::online();
        tracing::info!(
            base_url = %config.store.base_url,
            persistent_cache = config.cache.directory.is_some(),
            "Data layer connected"
        );
        let layer = Self::new(
            config,
            store,
            transport,
            cache,
            Arc::new(connectivity.clone()),
        );
        Ok((layer, connectivity))
    }

    pub fn config(&self) -> &LatsConfig {
        &self.config
    }

    pub fn customers(&self) -> &CustomerRepository {
        &self.customers
    }

    pub fn hub(&self) -> &RealtimeHub {
        &self.hub
    }

    pub fn probe(&self) -> &NetworkQualityProbe {
        &self.probe
    }

    pub fn fetcher(&self) -> &PaginatedBulkFetcher {
        self.customers.fetcher()
    }

    /// Load the customer list and keep it current from the customers
    /// realtime channel.
    ///
    /// A failed initial load is recorded in the feed's state rather than
    /// returned.
    pub async fn watch_customers(&self) -> CustomerFeed {
        let feed = CustomerFeed::new(self.customers.clone());
        let handle = self
            .hub
            .open(ChannelSpec::table(CUSTOMERS), feed.listener())
            .await;
        feed.attach(handle);
        let _ = feed.refresh().await;
        feed
    }

    /// Close every realtime channel and forget in-flight registrations.
    pub async fn shutdown(&self) {
        self.hub.close_all().await;
        self.customers.clear_request_cache();
        tracing::info!("Data layer shut down");
    }
}
