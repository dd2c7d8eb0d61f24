//! Realtime transport contract.
//!
//! A transport opens one channel per [`ChannelSpec`] and reports everything
//! that happens on it as [`TransportEvent`]s: the subscription ack, faults
//! (closed, channel error, timed out), and row changes.

use async_trait::async_trait;
use lats_core::{LatsResult, RawRow};
use std::fmt;
use tokio::sync::mpsc;

/// Which row events a channel listens for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChangeFilter {
    #[default]
    All,
    Insert,
    Update,
    Delete,
}

impl ChangeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeFilter::All => "*",
            ChangeFilter::Insert => "INSERT",
            ChangeFilter::Update => "UPDATE",
            ChangeFilter::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelSpec {
    /// Unique channel name; also the key the hub tracks channels by.
    pub topic: String,
    pub schema: String,
    pub table: String,
    pub filter: ChangeFilter,
}

impl ChannelSpec {
    /// Listen to every change on `public.{table}` under a topic of the same name.
    pub fn table(table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            topic: format!("{table}-changes"),
            schema: "public".to_string(),
            table,
            filter: ChangeFilter::All,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_filter(mut self, filter: ChangeFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Non-success statuses a channel can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelStatus {
    Closed,
    ChannelError,
    TimedOut,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Closed => "CLOSED",
            ChannelStatus::ChannelError => "CHANNEL_ERROR",
            ChannelStatus::TimedOut => "TIMED_OUT",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A disconnect or error on a realtime channel.
///
/// Faults are handled by the channel supervisor's reconnect policy and are
/// never returned to data-layer callers as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFault {
    pub status: ChannelStatus,
    pub reason: String,
}

impl ChannelFault {
    pub fn new(status: ChannelStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub table: String,
    pub kind: ChangeKind,
    pub record: Option<RawRow>,
    pub old_record: Option<RawRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The subscription was acknowledged (`SUBSCRIBED`).
    Subscribed,
    Fault(ChannelFault),
    Change(RowChange),
}

/// Releases the transport side of a channel.
pub trait ChannelCloser: Send {
    /// May fail if the underlying handle is already gone; callers treat that
    /// as already closed.
    fn close(&mut self) -> LatsResult<()>;
}

/// An opened channel: the event stream plus the means to release it.
pub struct TransportChannel {
    pub events: mpsc::Receiver<TransportEvent>,
    closer: Box<dyn ChannelCloser>,
}

impl TransportChannel {
    pub fn new(events: mpsc::Receiver<TransportEvent>, closer: Box<dyn ChannelCloser>) -> Self {
        Self { events, closer }
    }

    pub fn close(&mut self) -> LatsResult<()> {
        self.events.close();
        self.closer.close()
    }
}

impl fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportChannel").finish_non_exhaustive()
    }
}

/// Opens realtime subscriptions on the hosted store.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open a channel. An `Err` here means the subscription could not even be
    /// attempted; faults after that arrive on the event stream.
    async fn open(&self, spec: &ChannelSpec) -> LatsResult<TransportChannel>;
}
