//! Shared wiring for the lats-sync scenario tests.

#![allow(dead_code)]

use async_trait::async_trait;
use lats_core::{LatsConfig, RealtimeConfig};
use lats_store::{
    BackingStore, InMemoryOfflineCache, OfflineCache, RealtimeTransport, RowChange,
    SharedConnectivity,
};
use lats_sync::{ChangeListener, DataLayer};
use lats_test_utils::{fixtures, FlakyStore, ScriptedTransport};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A data layer over test doubles, with handles to each of them.
pub struct Harness {
    pub layer: DataLayer,
    pub store: Arc<FlakyStore>,
    pub transport: Arc<ScriptedTransport>,
    pub cache: Arc<InMemoryOfflineCache>,
    pub connectivity: SharedConnectivity,
}

impl Harness {
    pub fn new(store: FlakyStore) -> Self {
        Self::with_config(store, fixtures::test_config())
    }

    pub fn with_config(store: FlakyStore, config: LatsConfig) -> Self {
        let store = Arc::new(store);
        let transport = Arc::new(ScriptedTransport::new());
        let cache = Arc::new(InMemoryOfflineCache::new());
        let connectivity = SharedConnectivity::online();

        let backing: Arc<dyn BackingStore> = store.clone();
        let realtime: Arc<dyn RealtimeTransport> = transport.clone();
        let offline: Arc<dyn OfflineCache> = cache.clone();
        let layer = DataLayer::new(
            config,
            backing,
            realtime,
            offline,
            Arc::new(connectivity.clone()),
        );
        Self {
            layer,
            store,
            transport,
            cache,
            connectivity,
        }
    }
}

/// Listener that records what a supervised channel delivered.
#[derive(Default)]
pub struct RecordingListener {
    refreshes: Mutex<Vec<Vec<RowChange>>>,
    disabled: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refreshes(&self) -> Vec<Vec<RowChange>> {
        self.refreshes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn disabled(&self) -> Vec<String> {
        self.disabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ChangeListener for RecordingListener {
    async fn on_refresh(&self, changes: Vec<RowChange>) {
        self.refreshes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(changes);
    }

    fn on_disabled(&self, topic: &str) {
        self.disabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(topic.to_string());
    }
}

/// Realtime timings used by the channel scenarios (the production defaults).
pub fn realtime_config() -> RealtimeConfig {
    RealtimeConfig::default()
}

/// Poll `condition` on paused time, advancing in small steps, for at most
/// `within` of virtual time.
pub async fn wait_until(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while waited <= within {
        if condition() {
            return true;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    condition()
}
