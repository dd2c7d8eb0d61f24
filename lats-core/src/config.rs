//! Configuration loading for the LATS data layer.
//!
//! The `[store]` section is required. Every other section may be omitted and
//! falls back to the documented defaults field by field.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LatsConfig {
    pub store: StoreConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Connection details for the hosted backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// REST endpoint root, e.g. `https://project.example.co`.
    pub base_url: String,
    /// Websocket endpoint for realtime channels.
    pub realtime_url: String,
    pub api_key: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Retry policy for idempotent reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-attempt timeout. Zero disables it.
    pub attempt_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            attempt_timeout_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = duration_ms(delay);
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = duration_ms(delay);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout_ms = timeout.map(duration_ms).unwrap_or(0);
        self
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_ms > 0).then(|| Duration::from_millis(self.attempt_timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    /// How long a settled request stays registered.
    pub grace_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { grace_ms: 1_000 }
    }
}

impl DedupConfig {
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace_ms = duration_ms(grace);
        self
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub batch_size: u64,
    pub inter_page_delay_ms: u64,
    /// Optional ceiling on the number of pages one fetch may need. Unset
    /// means any collection size is fetched in full.
    pub max_pages: Option<u64>,
    pub write_through_cache: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            inter_page_delay_ms: 100,
            max_pages: None,
            write_through_cache: true,
        }
    }
}

impl FetchConfig {
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_inter_page_delay(mut self, delay: Duration) -> Self {
        self.inter_page_delay_ms = duration_ms(delay);
        self
    }

    pub fn with_max_pages(mut self, max_pages: u64) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn with_write_through_cache(mut self, enabled: bool) -> Self {
        self.write_through_cache = enabled;
        self
    }

    pub fn inter_page_delay(&self) -> Duration {
        Duration::from_millis(self.inter_page_delay_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    /// Answer from the offline cache when the online path fails transiently.
    pub serve_cache_after_transient_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RealtimeConfig {
    pub initial_setup_delay_ms: u64,
    pub cooldown_ms: u64,
    pub debounce_ms: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            initial_setup_delay_ms: 2_000,
            cooldown_ms: 3_000,
            debounce_ms: 2_000,
            max_attempts: 3,
            base_delay_ms: 5_000,
            cap_delay_ms: 30_000,
            multiplier: 1.5,
        }
    }
}

impl RealtimeConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_setup_delay(mut self, delay: Duration) -> Self {
        self.initial_setup_delay_ms = duration_ms(delay);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_ms = duration_ms(cooldown);
        self
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce_ms = duration_ms(window);
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.base_delay_ms = duration_ms(base);
        self.cap_delay_ms = duration_ms(cap);
        self
    }

    pub fn initial_setup_delay(&self) -> Duration {
        Duration::from_millis(self.initial_setup_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Reconnect delay for the given 1-based attempt number.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.cap_delay_ms as f64);
        Duration::from_millis(capped.round() as u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Directory for the JSON file cache. `None` keeps the cache in memory.
    pub directory: Option<PathBuf>,
}

impl LatsConfig {
    /// Build a configuration with default policies for the given store.
    pub fn with_store(store: StoreConfig) -> Self {
        Self {
            store,
            retry: RetryConfig::default(),
            dedup: DedupConfig::default(),
            fetch: FetchConfig::default(),
            gate: GateConfig::default(),
            realtime: RealtimeConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: LatsConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.base_url.trim().is_empty() {
            return Err(invalid("store.base_url", "must not be empty"));
        }
        if self.store.realtime_url.trim().is_empty() {
            return Err(invalid("store.realtime_url", "must not be empty"));
        }
        if self.store.api_key.trim().is_empty() {
            return Err(invalid("store.api_key", "must not be empty"));
        }
        if self.store.schema.trim().is_empty() {
            return Err(invalid("store.schema", "must not be empty"));
        }
        if self.store.request_timeout_ms == 0 {
            return Err(invalid("store.request_timeout_ms", "must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be >= 1"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(invalid("retry.max_delay_ms", "must be >= base_delay_ms"));
        }
        if self.fetch.batch_size == 0 {
            return Err(invalid("fetch.batch_size", "must be > 0"));
        }
        if self.fetch.max_pages == Some(0) {
            return Err(invalid("fetch.max_pages", "must be > 0"));
        }
        if self.realtime.max_attempts == 0 {
            return Err(invalid("realtime.max_attempts", "must be >= 1"));
        }
        if self.realtime.base_delay_ms == 0 {
            return Err(invalid("realtime.base_delay_ms", "must be > 0"));
        }
        if self.realtime.cap_delay_ms < self.realtime.base_delay_ms {
            return Err(invalid("realtime.cap_delay_ms", "must be >= base_delay_ms"));
        }
        if !(self.realtime.multiplier >= 1.0) {
            return Err(invalid("realtime.multiplier", "must be >= 1.0"));
        }
        if let Some(dir) = &self.cache.directory {
            if dir.as_os_str().is_empty() {
                return Err(invalid("cache.directory", "must not be empty when set"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("LATS_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
