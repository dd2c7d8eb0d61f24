//! Tokio driver for one realtime channel.
//!
//! The driver owns the [`ChannelMachine`], the transport channel, and the two
//! timers (connect/reconnect and refresh debounce). It feeds timer firings
//! and transport events into the machine and performs the effects it returns.

use super::machine::{ChannelEffect, ChannelEvent, ChannelMachine, ChannelSnapshot, ChannelState};
use super::ChangeListener;
use lats_core::RealtimeConfig;
use lats_store::{
    ChannelFault, ChannelSpec, ChannelStatus, RealtimeTransport, TransportChannel, TransportEvent,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

#[derive(Debug)]
enum Command {
    Close,
}

/// Handle to a supervised channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    topic: String,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ChannelSnapshot>,
}

impl ChannelHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Tear the channel down. Safe from any state and never fails, even if
    /// the driver is already gone.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> ChannelState {
        self.snapshot.borrow().state
    }

    pub fn live_updates_paused(&self) -> bool {
        self.snapshot.borrow().live_updates_paused
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.commands.is_closed()
    }

    /// Wait for the driver to exit.
    pub async fn join(&self) {
        let mut snapshot = self.snapshot.clone();
        while snapshot.changed().await.is_ok() {}
    }
}

/// Supervises one realtime subscription.
pub struct RealtimeChannelSupervisor;

impl RealtimeChannelSupervisor {
    /// Start supervising `spec`. The first connection attempt happens after
    /// the configured initial-setup delay.
    pub fn open(
        spec: ChannelSpec,
        transport: Arc<dyn RealtimeTransport>,
        listener: Arc<dyn ChangeListener>,
        config: RealtimeConfig,
    ) -> ChannelHandle {
        let machine = ChannelMachine::new(config);
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            spec: spec.clone(),
            transport,
            listener,
            machine,
            channel: None,
            connect_at: None,
            refresh_at: None,
            commands: commands_rx,
            snapshot: snapshot_tx,
        };
        tokio::spawn(driver.run());

        ChannelHandle {
            topic: spec.topic,
            commands: commands_tx,
            snapshot: snapshot_rx,
        }
    }
}

enum Wake {
    Command(Option<Command>),
    ConnectTimer,
    RefreshTimer,
    Transport(Option<TransportEvent>),
}

struct Driver {
    spec: ChannelSpec,
    transport: Arc<dyn RealtimeTransport>,
    listener: Arc<dyn ChangeListener>,
    machine: ChannelMachine,
    channel: Option<TransportChannel>,
    connect_at: Option<Instant>,
    refresh_at: Option<Instant>,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshot: watch::Sender<ChannelSnapshot>,
}

impl Driver {
    async fn run(mut self) {
        self.apply(ChannelEvent::Open).await;

        loop {
            let now = Instant::now();
            let connect_at = self.connect_at;
            let refresh_at = self.refresh_at;

            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                _ = tokio::time::sleep_until(connect_at.unwrap_or(now)), if connect_at.is_some() => {
                    Wake::ConnectTimer
                }
                _ = tokio::time::sleep_until(refresh_at.unwrap_or(now)), if refresh_at.is_some() => {
                    Wake::RefreshTimer
                }
                event = next_transport_event(&mut self.channel) => Wake::Transport(event),
            };

            let event = match wake {
                // a dropped handle is a close
                Wake::Command(Some(Command::Close)) | Wake::Command(None) => {
                    self.apply(ChannelEvent::Close).await;
                    break;
                }
                Wake::ConnectTimer => {
                    self.connect_at = None;
                    if self.machine.state() == ChannelState::Connecting {
                        ChannelEvent::ConnectDue
                    } else {
                        ChannelEvent::ReconnectDue
                    }
                }
                Wake::RefreshTimer => {
                    self.refresh_at = None;
                    ChannelEvent::DebounceElapsed
                }
                Wake::Transport(Some(TransportEvent::Subscribed)) => ChannelEvent::Ack,
                Wake::Transport(Some(TransportEvent::Change(change))) => {
                    ChannelEvent::RowChanged(change)
                }
                Wake::Transport(Some(TransportEvent::Fault(fault))) => fault_event(fault),
                Wake::Transport(None) => {
                    // stream ended without a status; treat as a close
                    self.channel = None;
                    ChannelEvent::TransportClosed(ChannelFault::new(
                        ChannelStatus::Closed,
                        "transport stream ended",
                    ))
                }
            };
            self.apply(event).await;
        }

        tracing::debug!(topic = %self.spec.topic, "Realtime channel supervisor stopped");
    }

    async fn apply(&mut self, event: ChannelEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let effects = self.machine.handle(event, Instant::now());
            for effect in effects {
                if let Some(follow_up) = self.perform(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
        self.snapshot.send_replace(self.machine.snapshot());
    }

    async fn perform(&mut self, effect: ChannelEffect) -> Option<ChannelEvent> {
        let topic = self.spec.topic.as_str();
        match effect {
            ChannelEffect::ScheduleConnect { delay } => {
                self.connect_at = Some(Instant::now() + delay);
            }
            ChannelEffect::ScheduleReconnect { delay, attempt } => {
                tracing::warn!(
                    topic,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Realtime channel lost, scheduling reconnect"
                );
                self.connect_at = Some(Instant::now() + delay);
            }
            ChannelEffect::CancelReconnect => self.connect_at = None,
            ChannelEffect::Connect => {
                tracing::debug!(topic, "Opening realtime channel");
                match self.transport.open(&self.spec).await {
                    Ok(channel) => self.channel = Some(channel),
                    Err(err) => {
                        return Some(ChannelEvent::TransportErrored(ChannelFault::new(
                            ChannelStatus::ChannelError,
                            err.to_string(),
                        )));
                    }
                }
            }
            ChannelEffect::ScheduleRefresh { delay } => {
                self.refresh_at = Some(Instant::now() + delay);
            }
            ChannelEffect::CancelRefresh => self.refresh_at = None,
            ChannelEffect::InvokeRefresh(changes) => {
                tracing::debug!(topic, changes = changes.len(), "Row changes settled, refreshing");
                let listener = self.listener.clone();
                tokio::spawn(async move { listener.on_refresh(changes).await });
            }
            ChannelEffect::ReleaseTransport => {
                if let Some(mut channel) = self.channel.take() {
                    if let Err(err) = channel.close() {
                        tracing::debug!(topic, error = %err, "Transport already released");
                    }
                }
            }
            ChannelEffect::NotifyDisabled => {
                tracing::error!(
                    topic,
                    attempts = self.machine.budget().attempts_used,
                    "Realtime channel disabled, live updates paused until manual refresh"
                );
                self.listener.on_disabled(topic);
            }
        }
        None
    }
}

fn fault_event(fault: ChannelFault) -> ChannelEvent {
    match fault.status {
        ChannelStatus::Closed => ChannelEvent::TransportClosed(fault),
        ChannelStatus::ChannelError | ChannelStatus::TimedOut => {
            ChannelEvent::TransportErrored(fault)
        }
    }
}

async fn next_transport_event(channel: &mut Option<TransportChannel>) -> Option<TransportEvent> {
    match channel {
        Some(channel) => channel.events.recv().await,
        None => std::future::pending().await,
    }
}
