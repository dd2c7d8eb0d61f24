//! LATS Store - collaborators at the network edge
//!
//! Traits for the three external systems the data layer talks to (the
//! hosted backing store, its realtime channel transport, and a local offline
//! cache), the connectivity signal, and concrete implementations of each:
//!
//! - [`RestBackingStore`] and [`PhoenixTransport`] for a hosted PostgREST/Phoenix
//!   deployment
//! - [`MemoryStore`], [`InMemoryOfflineCache`] for tests and embedding
//! - [`JsonFileCache`] for a persistent offline snapshot

pub mod cache;
pub mod connectivity;
pub mod memory;
pub mod phoenix;
pub mod query;
pub mod realtime;
pub mod rest;
pub mod store;

pub use cache::{InMemoryOfflineCache, JsonFileCache, OfflineCache};
pub use connectivity::{ConnectivitySource, SharedConnectivity};
pub use memory::{MemoryStore, StoreRequest};
pub use phoenix::PhoenixTransport;
pub use query::{Direction, Filter, Order, Query, RowRange};
pub use realtime::{
    ChangeFilter, ChangeKind, ChannelCloser, ChannelFault, ChannelSpec, ChannelStatus,
    RealtimeTransport, RowChange, TransportChannel, TransportEvent,
};
pub use rest::RestBackingStore;
pub use store::BackingStore;
