//! In-flight request deduplication.
//!
//! At most one task runs per logical key. Concurrent callers with the same
//! key share its result, and the registration lingers for a grace period
//! after settlement so near-simultaneous bursts collapse onto one execution.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use lats_core::{DedupConfig, LatsResult};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

type SharedTask<T> = Shared<BoxFuture<'static, LatsResult<T>>>;

struct Registration<T: Clone> {
    generation: u64,
    task: SharedTask<T>,
}

struct Registry<T: Clone> {
    entries: DashMap<String, Registration<T>>,
    next_generation: AtomicU64,
    grace: Duration,
}

/// Snapshot of the registry for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupStats {
    pub size: usize,
    pub keys: Vec<String>,
}

/// Owned, injectable dedup registry. Cloning shares the registry.
pub struct RequestDeduplicator<T: Clone> {
    registry: Arc<Registry<T>>,
}

impl<T: Clone> Clone for RequestDeduplicator<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            registry: Arc::new(Registry {
                entries: DashMap::new(),
                next_generation: AtomicU64::new(0),
                grace: config.grace(),
            }),
        }
    }

    /// Run `factory` under `key`, or join the task already registered there.
    ///
    /// The task is driven to completion by a background driver even if every
    /// caller stops waiting, so late joiners still get its result.
    pub async fn dedupe<F, Fut>(&self, key: &str, factory: F) -> LatsResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LatsResult<T>> + Send + 'static,
    {
        let task = match self.registry.entries.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                tracing::debug!(key, "Joining in-flight request");
                existing.get().task.clone()
            }
            Entry::Vacant(vacant) => {
                let generation = self.registry.next_generation.fetch_add(1, Ordering::Relaxed);
                let task = factory().boxed().shared();
                vacant.insert(Registration {
                    generation,
                    task: task.clone(),
                });
                self.spawn_driver(key.to_string(), generation, task.clone());
                task
            }
        };
        task.await
    }

    /// Run a new `factory` task under `key` even if one is already
    /// registered. Callers arriving afterwards join the new task; callers of
    /// the replaced one keep their result.
    pub async fn restart<F, Fut>(&self, key: &str, factory: F) -> LatsResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LatsResult<T>> + Send + 'static,
    {
        let generation = self.registry.next_generation.fetch_add(1, Ordering::Relaxed);
        let task = factory().boxed().shared();
        self.registry.entries.insert(
            key.to_string(),
            Registration {
                generation,
                task: task.clone(),
            },
        );
        tracing::debug!(key, "Restarted request");
        self.spawn_driver(key.to_string(), generation, task.clone());
        task.await
    }

    /// Drop the registrations whose key starts with `prefix`.
    pub fn forget_prefix(&self, prefix: &str) {
        self.registry.entries.retain(|key, _| !key.starts_with(prefix));
    }

    fn spawn_driver(&self, key: String, generation: u64, task: SharedTask<T>) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let _ = task.await;
            tokio::time::sleep(registry.grace).await;
            // a clear() followed by a fresh registration must survive this purge
            registry
                .entries
                .remove_if(&key, |_, registration| registration.generation == generation);
        });
    }

    /// Drop every registration. Tasks already running keep serving the
    /// callers that joined them.
    pub fn clear(&self) {
        self.registry.entries.clear();
    }

    pub fn stats(&self) -> DedupStats {
        let mut keys: Vec<String> = self
            .registry
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        DedupStats {
            size: keys.len(),
            keys,
        }
    }
}
