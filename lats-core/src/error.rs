//! Error types for LATS data-layer operations

use thiserror::Error;

/// The closed set of transport failures that are safe to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientKind {
    /// Connection reset or closed by the peer.
    ConnectionReset,
    /// Generic fetch failure (request never produced a response).
    FetchFailed,
    /// Transport protocol error (e.g. QUIC/HTTP2 stream errors).
    Protocol,
    /// The request exceeded its timeout.
    Timeout,
}

impl TransientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransientKind::ConnectionReset => "connection_reset",
            TransientKind::FetchFailed => "fetch_failed",
            TransientKind::Protocol => "protocol",
            TransientKind::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retryable network failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransientError {
    pub kind: TransientKind,
    pub message: String,
}

impl TransientError {
    pub fn new(kind: TransientKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Application-level failures reported by the backing store. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Record not found in {collection}: {id}")]
    NotFound { collection: String, id: String },

    #[error("Validation failed on {collection}: {reason}")]
    Validation { collection: String, reason: String },

    #[error("Permission denied on {collection}: {reason}")]
    PermissionDenied { collection: String, reason: String },

    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed record in {collection}: {reason}")]
    MalformedRecord { collection: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or LATS_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {0}")]
    Parse(String),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Offline cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache IO error for {collection}: {reason}")]
    Io { collection: String, reason: String },

    #[error("Cache serialization error for {collection}: {reason}")]
    Serde { collection: String, reason: String },
}

/// Master error type for the data layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LatsError {
    #[error("Transient network error: {0}")]
    Transient(#[from] TransientError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Offline and no cached data available for {collection}")]
    OfflineUnavailable { collection: String },

    #[error("{collection} needs {total_pages} pages, more than the limit of {max_pages}")]
    PageLimitExceeded {
        collection: String,
        total_pages: u64,
        max_pages: u64,
    },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl LatsError {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::Transient(TransientError::new(kind, message))
    }

    /// Returns true only for the retryable network classes.
    pub fn is_transient(&self) -> bool {
        matches!(self, LatsError::Transient(_))
    }

    pub fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            LatsError::Transient(err) => Some(err.kind),
            _ => None,
        }
    }

    /// Short label used in logs and retry records.
    pub fn class(&self) -> &'static str {
        match self {
            LatsError::Transient(err) => err.kind.as_str(),
            LatsError::Remote(_) => "remote",
            LatsError::OfflineUnavailable { .. } => "offline_unavailable",
            LatsError::PageLimitExceeded { .. } => "page_limit_exceeded",
            LatsError::Config(_) => "config",
            LatsError::Cache(_) => "cache",
        }
    }
}

/// Result type alias for data-layer operations.
pub type LatsResult<T> = Result<T, LatsError>;

// =============================================================================
// TESTS
// =============================================================================
