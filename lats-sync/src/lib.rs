//! LATS Sync - resilient remote data access
//!
//! Sits between application code and the hosted backing store:
//!
//! - [`RetryExecutor`] retries transient failures with capped exponential backoff
//! - [`RequestDeduplicator`] collapses concurrent identical requests onto one task
//! - [`PaginatedBulkFetcher`] pulls whole collections page by page
//! - [`OfflineFallbackGate`] answers from the offline cache when disconnected
//! - [`RealtimeHub`] supervises realtime channels with a reconnect circuit breaker
//!
//! [`DataLayer`] wires them together; [`CustomerRepository`] and
//! [`CustomerFeed`] are the surfaces application code calls.

pub mod customers;
pub mod dedup;
pub mod feed;
pub mod fetcher;
pub mod gate;
pub mod layer;
pub mod probe;
pub mod realtime;
pub mod retry;
pub mod telemetry;

pub use customers::CustomerRepository;
pub use dedup::{DedupStats, RequestDeduplicator};
pub use feed::{CustomerFeed, FeedState};
pub use fetcher::{page_count, PaginatedBulkFetcher};
pub use gate::OfflineFallbackGate;
pub use layer::DataLayer;
pub use probe::NetworkQualityProbe;
pub use realtime::{
    ChangeListener, ChannelEffect, ChannelEvent, ChannelHandle, ChannelMachine, ChannelSnapshot,
    ChannelState, RealtimeChannelSupervisor, RealtimeHub, ReconnectBudget,
};
pub use retry::{RetryAttempt, RetryExecutor};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
