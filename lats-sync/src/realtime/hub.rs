use super::machine::ChannelSnapshot;
use super::supervisor::{ChannelHandle, RealtimeChannelSupervisor};
use super::ChangeListener;
use dashmap::DashMap;
use lats_core::RealtimeConfig;
use lats_store::{ChannelSpec, RealtimeTransport};
use std::sync::Arc;

/// Owns every supervised channel, one per topic.
#[derive(Clone)]
pub struct RealtimeHub {
    transport: Arc<dyn RealtimeTransport>,
    config: RealtimeConfig,
    channels: Arc<DashMap<String, ChannelHandle>>,
}

impl RealtimeHub {
    pub fn new(transport: Arc<dyn RealtimeTransport>, config: RealtimeConfig) -> Self {
        Self {
            transport,
            config,
            channels: Arc::new(DashMap::new()),
        }
    }

    /// Open a channel for `spec.topic`. An existing channel on the same topic
    /// is torn down first, so a topic never has two live subscriptions.
    pub async fn open(&self, spec: ChannelSpec, listener: Arc<dyn ChangeListener>) -> ChannelHandle {
        if let Some((_, previous)) = self.channels.remove(&spec.topic) {
            tracing::debug!(topic = %spec.topic, "Replacing existing realtime channel");
            previous.close();
            previous.join().await;
        }
        let handle = RealtimeChannelSupervisor::open(
            spec.clone(),
            self.transport.clone(),
            listener,
            self.config.clone(),
        );
        self.channels.insert(spec.topic, handle.clone());
        handle
    }

    pub async fn close(&self, topic: &str) {
        if let Some((_, handle)) = self.channels.remove(topic) {
            handle.close();
            handle.join().await;
        }
    }

    pub async fn close_all(&self) {
        let topics: Vec<String> = self.topics();
        for topic in topics {
            self.close(&topic).await;
        }
    }

    pub fn snapshot(&self, topic: &str) -> Option<ChannelSnapshot> {
        self.channels.get(topic).map(|handle| handle.snapshot())
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        topics.sort();
        topics
    }
}
