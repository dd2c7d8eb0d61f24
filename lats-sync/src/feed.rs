//! Observable customer list for UI callers.
//!
//! A [`CustomerFeed`] holds the last fetched customer list together with
//! `loading`/`error` flags and republishes them on a `watch` channel. Its
//! [`listener`](CustomerFeed::listener) lets a supervised realtime channel
//! drive refreshes; a change-driven refresh never reuses a fetch that was
//! already registered when the change arrived.

use crate::customers::CustomerRepository;
use crate::realtime::{ChangeListener, ChannelHandle};
use async_trait::async_trait;
use lats_core::{Customer, LatsError, LatsResult};
use lats_store::RowChange;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    pub customers: Vec<Customer>,
    /// True while at least one refresh is running.
    pub loading: bool,
    pub error: Option<LatsError>,
    /// Set once the realtime channel has given up reconnecting.
    pub live_updates_paused: bool,
}

struct Shared {
    repository: CustomerRepository,
    state: watch::Sender<FeedState>,
    loads: Mutex<LoadTracker>,
}

/// Orders overlapping refreshes: `loading` stays set until every one of
/// them settles, and a refresh never overwrites a newer one's result.
#[derive(Default)]
struct LoadTracker {
    in_flight: usize,
    started: u64,
    applied: u64,
}

#[derive(Clone, Copy)]
enum Reload {
    /// Share any fetch already running or still in its grace window.
    Join,
    /// Start from scratch; earlier fetches may predate a change.
    Fresh,
}

/// The realtime channel only holds a weak reference, so dropping every
/// clone of the feed releases it and later change notifications are ignored.
/// The channel itself keeps running until [`CustomerFeed::close`] or
/// `DataLayer::shutdown`.
#[derive(Clone)]
pub struct CustomerFeed {
    shared: Arc<Shared>,
    channel: Arc<OnceLock<ChannelHandle>>,
}

impl CustomerFeed {
    pub fn new(repository: CustomerRepository) -> Self {
        let (state, _) = watch::channel(FeedState::default());
        Self {
            shared: Arc::new(Shared {
                repository,
                state,
                loads: Mutex::new(LoadTracker::default()),
            }),
            channel: Arc::new(OnceLock::new()),
        }
    }

    /// Listener to register with a supervised channel.
    pub fn listener(&self) -> Arc<dyn ChangeListener> {
        Arc::new(FeedListener {
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Bind the realtime channel feeding this list. Only the first call wins.
    pub fn attach(&self, handle: ChannelHandle) {
        if self.channel.set(handle).is_err() {
            tracing::debug!("Customer feed already has a realtime channel");
        }
    }

    pub fn channel(&self) -> Option<&ChannelHandle> {
        self.channel.get()
    }

    /// Refetch the whole list. The error is recorded in the state and also
    /// returned.
    pub async fn refresh(&self) -> LatsResult<()> {
        self.shared.load(Reload::Join).await
    }

    /// Fetch one customer from the store (or the offline snapshot).
    pub async fn get_by_id(&self, id: Uuid) -> LatsResult<Option<Customer>> {
        let result = self.shared.repository.fetch_customer_by_id(id).await;
        if let Err(err) = &result {
            let err = err.clone();
            self.shared.state.send_modify(|state| state.error = Some(err));
        }
        result
    }

    /// Look a customer up in the currently loaded list without any I/O.
    pub fn find(&self, id: Uuid) -> Option<Customer> {
        self.shared
            .state
            .borrow()
            .customers
            .iter()
            .find(|customer| customer.id == id)
            .cloned()
    }

    pub fn state(&self) -> FeedState {
        self.shared.state.borrow().clone()
    }

    pub fn customers(&self) -> Vec<Customer> {
        self.shared.state.borrow().customers.clone()
    }

    pub fn loading(&self) -> bool {
        self.shared.state.borrow().loading
    }

    pub fn error(&self) -> Option<LatsError> {
        self.shared.state.borrow().error.clone()
    }

    pub fn live_updates_paused(&self) -> bool {
        self.shared.state.borrow().live_updates_paused
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.shared.state.subscribe()
    }

    /// Stop the realtime channel, if any. The loaded list stays readable.
    pub fn close(&self) {
        if let Some(handle) = self.channel.get() {
            handle.close();
        }
    }
}

impl Shared {
    async fn load(&self, reload: Reload) -> LatsResult<()> {
        let generation = {
            let mut loads = self.tracker();
            loads.in_flight += 1;
            loads.started += 1;
            loads.started
        };
        self.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });

        let result = match reload {
            Reload::Join => self.repository.fetch_all_customers().await,
            Reload::Fresh => self.repository.reload_customers().await,
        };

        let mut loads = self.tracker();
        loads.in_flight -= 1;
        let newest = generation > loads.applied;
        if newest {
            loads.applied = generation;
        }
        let loading = loads.in_flight > 0;
        self.state.send_modify(|state| {
            state.loading = loading;
            if newest {
                match &result {
                    Ok(customers) => state.customers = customers.clone(),
                    Err(err) => state.error = Some(err.clone()),
                }
            }
        });
        drop(loads);
        result.map(|_| ())
    }

    fn tracker(&self) -> MutexGuard<'_, LoadTracker> {
        self.loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

struct FeedListener {
    shared: Weak<Shared>,
}

#[async_trait]
impl ChangeListener for FeedListener {
    async fn on_refresh(&self, changes: Vec<RowChange>) {
        let Some(shared) = self.shared.upgrade() else {
            tracing::debug!("Customer feed dropped, ignoring row changes");
            return;
        };
        tracing::debug!(changes = changes.len(), "Refreshing customers after row changes");
        // failures are already logged by the repository and kept in the state
        let _ = shared.load(Reload::Fresh).await;
    }

    fn on_disabled(&self, topic: &str) {
        tracing::warn!(topic, "Live customer updates paused");
        if let Some(shared) = self.shared.upgrade() {
            shared
                .state
                .send_modify(|state| state.live_updates_paused = true);
        }
    }
}
