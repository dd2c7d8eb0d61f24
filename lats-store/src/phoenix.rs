//! Realtime transport over a Phoenix-channels websocket.
//!
//! Each opened channel gets its own socket and a driver task that joins the
//! topic, keeps the socket alive with heartbeats, and translates frames into
//! [`TransportEvent`]s.

use crate::realtime::{
    ChangeKind, ChannelCloser, ChannelFault, ChannelSpec, ChannelStatus, RealtimeTransport,
    RowChange, TransportChannel, TransportEvent,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use lats_core::{LatsError, LatsResult, StoreConfig, TransientKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 64;
const JOIN_REF: &str = "1";

#[derive(Debug, Clone)]
pub struct PhoenixTransport {
    endpoint: String,
    api_key: String,
    heartbeat_interval: Duration,
    join_timeout: Duration,
}

impl PhoenixTransport {
    pub fn new(config: &StoreConfig) -> Self {
        let separator = if config.realtime_url.contains('?') { '&' } else { '?' };
        Self {
            endpoint: format!(
                "{}{}apikey={}&vsn=1.0.0",
                config.realtime_url, separator, config.api_key
            ),
            api_key: config.api_key.clone(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            join_timeout: JOIN_TIMEOUT,
        }
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    fn join_frame(&self, spec: &ChannelSpec) -> PhoenixFrame {
        PhoenixFrame {
            topic: channel_topic(spec),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "postgres_changes": [{
                        "event": spec.filter.as_str(),
                        "schema": spec.schema,
                        "table": spec.table,
                    }]
                },
                "access_token": self.api_key,
            }),
            reference: Some(JOIN_REF.to_string()),
            join_ref: Some(JOIN_REF.to_string()),
        }
    }
}

#[async_trait]
impl RealtimeTransport for PhoenixTransport {
    async fn open(&self, spec: &ChannelSpec) -> LatsResult<TransportChannel> {
        let (socket, _) = tokio_tungstenite::connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| LatsError::transient(TransientKind::FetchFailed, e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let join = self.join_frame(spec);
        sink.send(Message::Text(encode(&join)?))
            .await
            .map_err(|e| LatsError::transient(TransientKind::ConnectionReset, e.to_string()))?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        let topic = join.topic;
        let heartbeat_every = self.heartbeat_interval;
        let join_deadline = Instant::now() + self.join_timeout;

        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let join_timer = tokio::time::sleep_until(join_deadline);
            tokio::pin!(join_timer);
            let mut joined = false;
            let mut next_ref: u64 = 2;

            let fault = loop {
                tokio::select! {
                    _ = &mut close_rx => {
                        let leave = PhoenixFrame::control(&topic, "phx_leave", next_ref);
                        if let Ok(text) = encode(&leave) {
                            let _ = sink.send(Message::Text(text)).await;
                        }
                        let _ = sink.close().await;
                        return;
                    }
                    _ = heartbeat.tick() => {
                        let beat = PhoenixFrame::control("phoenix", "heartbeat", next_ref);
                        next_ref += 1;
                        let sent = match encode(&beat) {
                            Ok(text) => sink.send(Message::Text(text)).await.map_err(|e| e.to_string()),
                            Err(e) => Err(e.to_string()),
                        };
                        if let Err(reason) = sent {
                            break ChannelFault::new(ChannelStatus::ChannelError, reason);
                        }
                    }
                    _ = &mut join_timer, if !joined => {
                        break ChannelFault::new(ChannelStatus::TimedOut, "join was not acknowledged in time");
                    }
                    message = stream.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            let Ok(frame) = serde_json::from_str::<PhoenixFrame>(&text) else {
                                tracing::debug!(topic = %topic, "Ignoring undecodable realtime frame");
                                continue;
                            };
                            if frame.topic != topic {
                                continue;
                            }
                            let Some(event) = decode_frame(&frame) else {
                                continue;
                            };
                            match event {
                                TransportEvent::Subscribed => joined = true,
                                TransportEvent::Fault(fault) => break fault,
                                TransportEvent::Change(_) => {}
                            }
                            if events_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            break ChannelFault::new(ChannelStatus::Closed, "socket closed");
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            break ChannelFault::new(ChannelStatus::ChannelError, err.to_string());
                        }
                    }
                }
            };

            tracing::debug!(topic = %topic, status = %fault.status, reason = %fault.reason, "Realtime channel fault");
            let _ = events_tx.send(TransportEvent::Fault(fault)).await;
        });

        Ok(TransportChannel::new(
            events_rx,
            Box::new(PhoenixCloser {
                close: Some(close_tx),
            }),
        ))
    }
}

struct PhoenixCloser {
    close: Option<oneshot::Sender<()>>,
}

impl ChannelCloser for PhoenixCloser {
    fn close(&mut self) -> LatsResult<()> {
        // driver already gone is the same as closed
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PhoenixFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join_ref: Option<String>,
}

impl PhoenixFrame {
    fn control(topic: &str, event: &str, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }
}

fn channel_topic(spec: &ChannelSpec) -> String {
    format!("realtime:{}", spec.topic)
}

fn encode(frame: &PhoenixFrame) -> LatsResult<String> {
    serde_json::to_string(frame)
        .map_err(|e| LatsError::transient(TransientKind::Protocol, e.to_string()))
}

fn decode_frame(frame: &PhoenixFrame) -> Option<TransportEvent> {
    match frame.event.as_str() {
        "phx_reply" if frame.reference.as_deref() == Some(JOIN_REF) => {
            if frame.payload.get("status").and_then(Value::as_str) == Some("ok") {
                Some(TransportEvent::Subscribed)
            } else {
                let reason = frame
                    .payload
                    .pointer("/response/reason")
                    .and_then(Value::as_str)
                    .unwrap_or("join rejected");
                Some(TransportEvent::Fault(ChannelFault::new(
                    ChannelStatus::ChannelError,
                    reason,
                )))
            }
        }
        "phx_error" => Some(TransportEvent::Fault(ChannelFault::new(
            ChannelStatus::ChannelError,
            "channel crashed",
        ))),
        "phx_close" => Some(TransportEvent::Fault(ChannelFault::new(
            ChannelStatus::Closed,
            "channel closed by server",
        ))),
        "system" if frame.payload.get("status").and_then(Value::as_str) == Some("error") => {
            let reason = frame
                .payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("system error");
            Some(TransportEvent::Fault(ChannelFault::new(
                ChannelStatus::ChannelError,
                reason,
            )))
        }
        "postgres_changes" => decode_change(frame.payload.get("data")?),
        _ => None,
    }
}

fn decode_change(data: &Value) -> Option<TransportEvent> {
    let kind = ChangeKind::parse(data.get("type")?.as_str()?)?;
    let table = data.get("table")?.as_str()?.to_string();
    let row = |key: &str| data.get(key).and_then(Value::as_object).cloned();
    Some(TransportEvent::Change(RowChange {
        table,
        kind,
        record: row("record"),
        old_record: row("old_record"),
    }))
}
