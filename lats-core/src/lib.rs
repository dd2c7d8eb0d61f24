//! LATS Core - record types, errors, and configuration
//!
//! Shared vocabulary for the data layer: the error taxonomy used to decide
//! what is retried, the TOML configuration document, the normalized record
//! model, and connectivity readings.

pub mod config;
pub mod customer;
pub mod error;
pub mod network;
pub mod record;

pub use config::{
    CacheConfig, DedupConfig, FetchConfig, GateConfig, LatsConfig, RealtimeConfig, RetryConfig,
    StoreConfig,
};
pub use customer::{
    ColorTag, Customer, CustomerDefaults, CustomerNote, CustomerPatch, CustomerSummary, Device,
    NewCustomer, Payment, RawCustomerRow, CUSTOMERS,
};
pub use error::{
    CacheError, ConfigError, LatsError, LatsResult, RemoteError, TransientError, TransientKind,
};
pub use network::{ConnectionQuality, EffectiveType, NetworkStatus};
pub use record::{decode_row, lenient, NormalizedRecord, RawRow};
