//! Read-only connectivity and link-quality probe.

use lats_core::{ConnectionQuality, NetworkStatus};
use lats_store::ConnectivitySource;
use std::sync::Arc;

#[derive(Clone)]
pub struct NetworkQualityProbe {
    source: Arc<dyn ConnectivitySource>,
}

impl NetworkQualityProbe {
    pub fn new(source: Arc<dyn ConnectivitySource>) -> Self {
        Self { source }
    }

    /// Current reading. Never mutates anything.
    pub fn sample(&self) -> NetworkStatus {
        self.source.current()
    }

    pub fn is_online(&self) -> bool {
        self.sample().online
    }

    pub fn quality(&self) -> ConnectionQuality {
        ConnectionQuality::classify(&self.sample())
    }
}

impl std::fmt::Debug for NetworkQualityProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkQualityProbe")
            .field("sample", &self.sample())
            .finish()
    }
}
