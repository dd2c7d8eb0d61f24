//! Connectivity signal collaborator.

use lats_core::NetworkStatus;
use tokio::sync::watch;

/// Source of the current connectivity reading.
///
/// Reads are synchronous and cheap; the offline gate consults this before
/// every fetch.
pub trait ConnectivitySource: Send + Sync {
    fn current(&self) -> NetworkStatus;
}

/// A connectivity signal that can be updated by whatever observes the
/// platform, and watched by anything that cares about transitions.
#[derive(Debug, Clone)]
pub struct SharedConnectivity {
    tx: watch::Sender<NetworkStatus>,
}

impl SharedConnectivity {
    pub fn new(initial: NetworkStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn online() -> Self {
        Self::new(NetworkStatus::default())
    }

    pub fn offline() -> Self {
        Self::new(NetworkStatus::offline())
    }

    pub fn set_status(&self, status: NetworkStatus) {
        self.tx.send_replace(status);
    }

    pub fn set_online(&self, online: bool) {
        self.tx.send_modify(|status| status.online = online);
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }
}

impl Default for SharedConnectivity {
    fn default() -> Self {
        Self::online()
    }
}

impl ConnectivitySource for SharedConnectivity {
    fn current(&self) -> NetworkStatus {
        self.tx.borrow().clone()
    }
}
