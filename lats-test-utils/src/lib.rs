//! LATS Test Utilities
//!
//! Shared test infrastructure for the LATS workspace:
//! - Proptest generators for raw store rows and configuration
//! - Network doubles: a fault-injecting backing store and a scripted
//!   realtime transport
//! - Fixtures for common scenarios
//! - Assertions over the error taxonomy

pub use lats_store::{InMemoryOfflineCache, MemoryStore, SharedConnectivity, StoreRequest};

pub use lats_core::{
    ColorTag, Customer, CustomerSummary, LatsConfig, LatsError, LatsResult, NetworkStatus,
    NormalizedRecord, RawRow, RemoteError, RetryConfig, StoreConfig, TransientKind, CUSTOMERS,
};

use async_trait::async_trait;
use lats_store::{
    BackingStore, ChannelCloser, ChannelSpec, Filter, Query, RealtimeTransport, RowRange,
    TransportChannel, TransportEvent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// FAULT-INJECTING BACKING STORE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Count,
    Select,
    Insert,
    Update,
    Delete,
}

/// One call that reached a [`FlakyStore`], failed or not.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub op: StoreOp,
    pub range: Option<RowRange>,
    pub failed: bool,
}

#[derive(Debug, Clone)]
struct FaultRule {
    op: StoreOp,
    /// Only selects whose range starts here; `None` matches any call.
    range_from: Option<u64>,
    remaining: u32,
    error: LatsError,
}

/// Wraps a [`MemoryStore`] and fails scripted calls before they reach it.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    rules: Mutex<Vec<FaultRule>>,
    attempts: Mutex<Vec<Attempt>>,
    select_delay: Option<Duration>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    /// Fail the select for the page starting at row `from`, `times` times.
    pub fn fail_page(self, from: u64, times: u32, kind: TransientKind) -> Self {
        self.with_rule(FaultRule {
            op: StoreOp::Select,
            range_from: Some(from),
            remaining: times,
            error: LatsError::transient(kind, format!("injected failure for page at {from}")),
        })
    }

    pub fn fail_count(self, times: u32, kind: TransientKind) -> Self {
        self.with_rule(FaultRule {
            op: StoreOp::Count,
            range_from: None,
            remaining: times,
            error: LatsError::transient(kind, "injected count failure"),
        })
    }

    /// Fail the next `times` calls of `op` with an arbitrary error.
    pub fn fail_with(self, op: StoreOp, times: u32, error: LatsError) -> Self {
        self.with_rule(FaultRule {
            op,
            range_from: None,
            remaining: times,
            error,
        })
    }

    /// Make every select take `delay` of (tokio) time.
    pub fn with_select_delay(mut self, delay: Duration) -> Self {
        self.select_delay = Some(delay);
        self
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn attempts_for(&self, op: StoreOp) -> usize {
        self.attempts().iter().filter(|a| a.op == op).count()
    }

    pub fn select_attempts_for_page(&self, from: u64) -> usize {
        self.attempts()
            .iter()
            .filter(|a| a.op == StoreOp::Select && a.range.map(|r| r.from) == Some(from))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn with_rule(self, rule: FaultRule) -> Self {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rule);
        self
    }

    fn check(&self, op: StoreOp, range: Option<RowRange>) -> LatsResult<()> {
        let injected = {
            let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
            rules
                .iter_mut()
                .find(|rule| {
                    rule.op == op
                        && rule.remaining > 0
                        && rule
                            .range_from
                            .map_or(true, |from| range.map(|r| r.from) == Some(from))
                })
                .map(|rule| {
                    rule.remaining -= 1;
                    rule.error.clone()
                })
        };
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Attempt {
                op,
                range,
                failed: injected.is_some(),
            });
        match injected {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BackingStore for FlakyStore {
    async fn count(&self, query: &Query) -> LatsResult<u64> {
        self.check(StoreOp::Count, None)?;
        self.inner.count(query).await
    }

    async fn select(&self, query: &Query) -> LatsResult<Vec<RawRow>> {
        if let Some(delay) = self.select_delay {
            tokio::time::sleep(delay).await;
        }
        self.check(StoreOp::Select, query.range)?;
        self.inner.select(query).await
    }

    async fn insert(&self, collection: &str, row: RawRow) -> LatsResult<RawRow> {
        self.check(StoreOp::Insert, None)?;
        self.inner.insert(collection, row).await
    }

    async fn update(&self, collection: &str, filter: &Filter, patch: RawRow) -> LatsResult<RawRow> {
        self.check(StoreOp::Update, None)?;
        self.inner.update(collection, filter, patch).await
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> LatsResult<u64> {
        self.check(StoreOp::Delete, None)?;
        self.inner.delete(collection, filter).await
    }
}

// ============================================================================
// SCRIPTED REALTIME TRANSPORT
// ============================================================================

/// Test-side handle to one channel opened through a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct ScriptedChannel {
    pub spec: ChannelSpec,
    events: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl ScriptedChannel {
    /// Deliver an event as if the server sent it. Returns false once the
    /// consumer side has gone away.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedCloser {
    closed: Arc<AtomicBool>,
}

impl ChannelCloser for ScriptedCloser {
    fn close(&mut self) -> LatsResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Realtime transport whose channels are driven by the test.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    channels: Mutex<Vec<ScriptedChannel>>,
    failing_opens: Mutex<u32>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` opens fail outright.
    pub fn fail_opens(&self, times: u32) {
        *self.failing_opens.lock().unwrap_or_else(PoisonError::into_inner) = times;
    }

    pub fn open_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn channel(&self, index: usize) -> Option<ScriptedChannel> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    pub fn last_channel(&self) -> Option<ScriptedChannel> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

#[async_trait]
impl RealtimeTransport for ScriptedTransport {
    async fn open(&self, spec: &ChannelSpec) -> LatsResult<TransportChannel> {
        {
            let mut failing = self.failing_opens.lock().unwrap_or_else(PoisonError::into_inner);
            if *failing > 0 {
                *failing -= 1;
                return Err(LatsError::transient(
                    TransientKind::FetchFailed,
                    "injected open failure",
                ));
            }
        }
        let (tx, rx) = mpsc::channel(64);
        let closed = Arc::new(AtomicBool::new(false));
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ScriptedChannel {
                spec: spec.clone(),
                events: tx,
                closed: closed.clone(),
            });
        Ok(TransportChannel::new(rx, Box::new(ScriptedCloser { closed })))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for raw store rows and configuration.

    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;
    use serde_json::{json, Value};
    use uuid::Uuid;

    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Timestamps between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (1577836800i64..1893456000i64)
            .prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    /// Color tag spellings as they appear in the store, including junk.
    pub fn arb_raw_color_tag() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            Just(None),
            Just(Some("VIP".to_string())),
            Just(Some(" premium ".to_string())),
            Just(Some("problem".to_string())),
            Just(Some("buyer".to_string())),
            Just(Some("normal".to_string())),
            "[a-z]{0,8}".prop_map(Some),
        ]
    }

    /// An optional text column: missing, null, a string, or a number.
    fn arb_text_column() -> impl Strategy<Value = Option<Value>> {
        prop_oneof![
            Just(None),
            Just(Some(Value::Null)),
            "[A-Za-z ]{0,12}".prop_map(|s| Some(json!(s))),
            (0i64..100_000).prop_map(|n| Some(json!(n))),
        ]
    }

    /// A numeric column as number, numeric string, junk string, or null.
    /// Floats are integer-valued so they survive JSON round trips exactly.
    fn arb_number_column() -> impl Strategy<Value = Option<Value>> {
        prop_oneof![
            Just(None),
            Just(Some(Value::Null)),
            (0i64..1_000_000).prop_map(|n| Some(json!(n))),
            (0i64..1_000_000).prop_map(|n| Some(json!(n.to_string()))),
            Just(Some(json!("n/a"))),
        ]
    }

    /// A raw customer row with the irregularities the store produces:
    /// missing columns, nulls, numbers as strings, JSON text lists.
    pub fn arb_raw_customer_row() -> impl Strategy<Value = RawRow> {
        (
            arb_uuid(),
            arb_text_column(),
            arb_raw_color_tag(),
            arb_number_column(),
            arb_number_column(),
            prop::option::of(any::<bool>()),
            prop::option::of(arb_timestamp()),
            prop::collection::vec("[a-z]{1,6}", 0..3),
            any::<bool>(),
        )
            .prop_map(
                |(id, name, color_tag, points, total_spent, is_active, created_at, referrals, referrals_as_text)| {
                    let mut row = RawRow::new();
                    row.insert("id".to_string(), json!(id.to_string()));
                    if let Some(name) = name {
                        row.insert("name".to_string(), name);
                    }
                    if let Some(tag) = color_tag {
                        row.insert("color_tag".to_string(), json!(tag));
                    }
                    if let Some(points) = points {
                        row.insert("points".to_string(), points);
                    }
                    if let Some(spent) = total_spent {
                        row.insert("total_spent".to_string(), spent);
                    }
                    if let Some(active) = is_active {
                        row.insert("is_active".to_string(), json!(active));
                    }
                    if let Some(ts) = created_at {
                        row.insert("created_at".to_string(), json!(ts.to_rfc3339()));
                    }
                    let referrals = json!(referrals);
                    let referrals = if referrals_as_text {
                        json!(referrals.to_string())
                    } else {
                        referrals
                    };
                    row.insert("referrals".to_string(), referrals);
                    row
                },
            )
    }

    pub fn arb_retry_config() -> impl Strategy<Value = RetryConfig> {
        (1u32..=6, 1u64..=2_000, 0u64..=30_000).prop_map(|(attempts, base, extra)| {
            RetryConfig::default()
                .with_max_attempts(attempts)
                .with_base_delay(Duration::from_millis(base))
                .with_max_delay(Duration::from_millis(base + extra))
        })
    }

    pub fn arb_network_status() -> impl Strategy<Value = NetworkStatus> {
        (
            any::<bool>(),
            prop::sample::select(vec!["slow-2g", "2g", "3g", "4g", "unknown"]),
            0u32..=100,
            0u32..=3_000,
        )
            .prop_map(|(online, effective, downlink, rtt)| NetworkStatus {
                online,
                effective_type: lats_core::EffectiveType::parse(effective),
                downlink: downlink as f64 / 10.0,
                rtt,
                save_data: false,
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    pub fn store_config() -> StoreConfig {
        StoreConfig {
            base_url: "https://project.example.co".to_string(),
            realtime_url: "wss://project.example.co/realtime/v1/websocket".to_string(),
            api_key: "test-anon-key".to_string(),
            schema: "public".to_string(),
            request_timeout_ms: 30_000,
        }
    }

    /// Default configuration pointing at the test store.
    pub fn test_config() -> LatsConfig {
        LatsConfig::with_store(store_config())
    }

    /// Deterministic id for the `index`-th fixture customer.
    pub fn customer_id(index: u64) -> Uuid {
        Uuid::from_u128(0x1a75_0000_0000_4000_8000_0000_0000_0000 | index as u128)
    }

    /// Creation time for the `index`-th fixture customer: one minute apart,
    /// so ordering by `created_at desc` yields descending indexes.
    pub fn created_at(index: u64) -> DateTime<Utc> {
        let base = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        base + chrono::Duration::minutes(index as i64)
    }

    pub fn customer_row(index: u64) -> RawRow {
        let mut row = RawRow::new();
        row.insert("id".to_string(), json!(customer_id(index).to_string()));
        row.insert("name".to_string(), json!(format!("Customer {index}")));
        row.insert("phone".to_string(), json!(format!("0100{index:07}")));
        row.insert("color_tag".to_string(), json!("VIP"));
        row.insert("points".to_string(), json!(index.to_string()));
        row.insert("total_spent".to_string(), json!(index * 10));
        row.insert("notes".to_string(), json!("[]"));
        row.insert("created_at".to_string(), json!(created_at(index).to_rfc3339()));
        row.insert("devices".to_string(), json!([]));
        row.insert("customer_payments".to_string(), json!([]));
        row
    }

    pub fn customer_rows(count: u64) -> Vec<RawRow> {
        (0..count).map(customer_row).collect()
    }

    pub fn seeded_store(count: u64) -> MemoryStore {
        MemoryStore::new().with_rows(CUSTOMERS, customer_rows(count))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over the error taxonomy.

    use super::*;

    #[track_caller]
    pub fn assert_transient<T: std::fmt::Debug>(result: &LatsResult<T>, kind: TransientKind) {
        match result {
            Err(err) if err.transient_kind() == Some(kind) => {}
            other => panic!("Expected transient {kind} error, got: {other:?}"),
        }
    }

    #[track_caller]
    pub fn assert_offline_unavailable<T: std::fmt::Debug>(result: &LatsResult<T>) {
        match result {
            Err(LatsError::OfflineUnavailable { .. }) => {}
            other => panic!("Expected OfflineUnavailable, got: {other:?}"),
        }
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &LatsResult<T>) {
        match result {
            Err(LatsError::Remote(RemoteError::NotFound { .. })) => {}
            other => panic!("Expected NotFound, got: {other:?}"),
        }
    }
}
