//! Pure channel lifecycle state machine.
//!
//! `handle(event, now)` mutates the state and returns the side effects the
//! driver must perform. Nothing here touches timers or the transport, so the
//! whole reconnect policy is testable without a runtime.

use lats_core::RealtimeConfig;
use lats_store::{ChannelFault, RowChange};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Idle,
    Connecting,
    Subscribed,
    Closed,
    Errored,
    Disabled,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Idle => "idle",
            ChannelState::Connecting => "connecting",
            ChannelState::Subscribed => "subscribed",
            ChannelState::Closed => "closed",
            ChannelState::Errored => "errored",
            ChannelState::Disabled => "disabled",
        }
    }
}

/// Reconnect accounting for one channel. Reset only by a successful
/// subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBudget {
    pub attempts_used: u32,
    pub max_attempts: u32,
    pub last_attempt_at: Option<Instant>,
    pub cooldown: Duration,
}

impl ReconnectBudget {
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            attempts_used: 0,
            max_attempts: config.max_attempts,
            last_attempt_at: None,
            cooldown: config.cooldown(),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.attempts_used >= self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The consumer mounted the subscription.
    Open,
    /// A scheduled connect (initial or cooldown-deferred) fired.
    ConnectDue,
    /// The transport acknowledged the subscription.
    Ack,
    TransportClosed(ChannelFault),
    TransportErrored(ChannelFault),
    RowChanged(RowChange),
    DebounceElapsed,
    ReconnectDue,
    /// Teardown. Valid from every state.
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEffect {
    ScheduleConnect { delay: Duration },
    Connect,
    ScheduleReconnect { delay: Duration, attempt: u32 },
    CancelReconnect,
    ScheduleRefresh { delay: Duration },
    InvokeRefresh(Vec<RowChange>),
    CancelRefresh,
    ReleaseTransport,
    NotifyDisabled,
}

/// Observable view of a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub state: ChannelState,
    pub attempts_used: u32,
    /// True once the channel gave up; callers must refresh manually.
    pub live_updates_paused: bool,
    #[serde(skip)]
    pub last_fault: Option<ChannelFault>,
}

#[derive(Debug, Clone)]
pub struct ChannelMachine {
    state: ChannelState,
    budget: ReconnectBudget,
    config: RealtimeConfig,
    pending_changes: Vec<RowChange>,
    last_fault: Option<ChannelFault>,
}

impl ChannelMachine {
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            state: ChannelState::Idle,
            budget: ReconnectBudget::new(&config),
            config,
            pending_changes: Vec::new(),
            last_fault: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn budget(&self) -> &ReconnectBudget {
        &self.budget
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            state: self.state,
            attempts_used: self.budget.attempts_used,
            live_updates_paused: self.state == ChannelState::Disabled,
            last_fault: self.last_fault.clone(),
        }
    }

    pub fn handle(&mut self, event: ChannelEvent, now: Instant) -> Vec<ChannelEffect> {
        use ChannelState::*;

        match (self.state, event) {
            (Idle, ChannelEvent::Open) => {
                self.state = Connecting;
                vec![ChannelEffect::ScheduleConnect {
                    delay: self.config.initial_setup_delay(),
                }]
            }
            (Connecting, ChannelEvent::ConnectDue) => self.attempt_connect(now),
            (Connecting, ChannelEvent::Ack) => {
                self.state = Subscribed;
                self.budget.attempts_used = 0;
                self.last_fault = None;
                Vec::new()
            }
            (Connecting | Subscribed, ChannelEvent::TransportClosed(fault)) => {
                self.on_fault(Closed, fault)
            }
            (Connecting | Subscribed, ChannelEvent::TransportErrored(fault)) => {
                self.on_fault(Errored, fault)
            }
            (Subscribed, ChannelEvent::RowChanged(change)) => {
                // trailing debounce: every change restarts the window
                self.pending_changes.push(change);
                vec![ChannelEffect::ScheduleRefresh {
                    delay: self.config.debounce(),
                }]
            }
            (Idle, ChannelEvent::DebounceElapsed) => Vec::new(),
            (_, ChannelEvent::DebounceElapsed) => {
                if self.pending_changes.is_empty() {
                    return Vec::new();
                }
                vec![ChannelEffect::InvokeRefresh(std::mem::take(
                    &mut self.pending_changes,
                ))]
            }
            (Closed | Errored, ChannelEvent::ReconnectDue) => {
                self.state = Connecting;
                self.attempt_connect(now)
            }
            (_, ChannelEvent::Close) => {
                self.state = Idle;
                self.pending_changes.clear();
                vec![
                    ChannelEffect::CancelReconnect,
                    ChannelEffect::CancelRefresh,
                    ChannelEffect::ReleaseTransport,
                ]
            }
            // late transport events, stale timers, duplicate opens
            _ => Vec::new(),
        }
    }

    fn attempt_connect(&mut self, now: Instant) -> Vec<ChannelEffect> {
        if let Some(last) = self.budget.last_attempt_at {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.budget.cooldown {
                return vec![ChannelEffect::ScheduleConnect {
                    delay: self.budget.cooldown - elapsed,
                }];
            }
        }
        self.budget.last_attempt_at = Some(now);
        vec![ChannelEffect::Connect]
    }

    fn on_fault(&mut self, state: ChannelState, fault: ChannelFault) -> Vec<ChannelEffect> {
        self.state = state;
        self.last_fault = Some(fault);
        let mut effects = vec![ChannelEffect::ReleaseTransport];

        if self.budget.exhausted() {
            self.state = ChannelState::Disabled;
            effects.push(ChannelEffect::CancelReconnect);
            effects.push(ChannelEffect::NotifyDisabled);
            return effects;
        }

        self.budget.attempts_used += 1;
        let attempt = self.budget.attempts_used;
        effects.push(ChannelEffect::ScheduleReconnect {
            delay: self.config.reconnect_delay(attempt),
            attempt,
        });
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lats_store::{ChangeKind, ChannelStatus};

    fn error() -> ChannelEvent {
        ChannelEvent::TransportErrored(ChannelFault::new(ChannelStatus::ChannelError, "boom"))
    }

    fn closed() -> ChannelEvent {
        ChannelEvent::TransportClosed(ChannelFault::new(ChannelStatus::Closed, "bye"))
    }

    fn change() -> ChannelEvent {
        ChannelEvent::RowChanged(RowChange {
            table: "customers".to_string(),
            kind: ChangeKind::Insert,
            record: None,
            old_record: None,
        })
    }

    /// Open and connect, returning the machine in Connecting with a
    /// transport in flight.
    fn connecting(now: Instant) -> ChannelMachine {
        let mut machine = ChannelMachine::new(RealtimeConfig::default());
        assert_eq!(
            machine.handle(ChannelEvent::Open, now),
            vec![ChannelEffect::ScheduleConnect {
                delay: Duration::from_millis(2000)
            }]
        );
        assert_eq!(
            machine.handle(ChannelEvent::ConnectDue, now + Duration::from_millis(2000)),
            vec![ChannelEffect::Connect]
        );
        machine
    }

    #[test]
    fn test_ack_subscribes_and_resets_budget() {
        let now = Instant::now();
        let mut machine = connecting(now);
        machine.handle(error(), now);
        assert_eq!(machine.budget().attempts_used, 1);

        machine.handle(ChannelEvent::ReconnectDue, now + Duration::from_secs(10));
        machine.handle(ChannelEvent::Ack, now + Duration::from_secs(10));
        assert_eq!(machine.state(), ChannelState::Subscribed);
        assert_eq!(machine.budget().attempts_used, 0);
        assert!(machine.snapshot().last_fault.is_none());
    }

    #[test]
    fn test_backoff_grows_then_disables() {
        let start = Instant::now();
        let mut machine = connecting(start);
        let mut now = start + Duration::from_secs(2);
        let mut delays = Vec::new();

        for _ in 0..3 {
            let effects = machine.handle(error(), now);
            match effects.as_slice() {
                [ChannelEffect::ReleaseTransport, ChannelEffect::ScheduleReconnect { delay, .. }] => {
                    delays.push(*delay)
                }
                other => panic!("unexpected effects {other:?}"),
            }
            assert_eq!(machine.state(), ChannelState::Errored);
            now += *delays.last().unwrap_or(&Duration::ZERO);
            assert_eq!(
                machine.handle(ChannelEvent::ReconnectDue, now),
                vec![ChannelEffect::Connect]
            );
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(5000),
                Duration::from_millis(7500),
                Duration::from_millis(11250)
            ]
        );

        let effects = machine.handle(error(), now);
        assert_eq!(
            effects,
            vec![
                ChannelEffect::ReleaseTransport,
                ChannelEffect::CancelReconnect,
                ChannelEffect::NotifyDisabled
            ]
        );
        assert_eq!(machine.state(), ChannelState::Disabled);
        assert!(machine.snapshot().live_updates_paused);

        // disabled is sticky
        assert!(machine.handle(error(), now).is_empty());
        assert!(machine.handle(ChannelEvent::ReconnectDue, now).is_empty());
        assert!(machine.handle(ChannelEvent::Ack, now).is_empty());
        assert_eq!(machine.state(), ChannelState::Disabled);
    }

    #[test]
    fn test_closed_counts_like_errored() {
        let now = Instant::now();
        let mut machine = connecting(now);
        machine.handle(closed(), now);
        assert_eq!(machine.state(), ChannelState::Closed);
        assert_eq!(machine.budget().attempts_used, 1);
    }

    #[test]
    fn test_cooldown_defers_rapid_reconnect() {
        let now = Instant::now();
        let config = RealtimeConfig::default()
            .with_backoff(Duration::from_millis(500), Duration::from_millis(500));
        let mut machine = ChannelMachine::new(config);
        machine.handle(ChannelEvent::Open, now);
        machine.handle(ChannelEvent::ConnectDue, now);
        machine.handle(error(), now);

        let later = now + Duration::from_millis(500);
        assert_eq!(
            machine.handle(ChannelEvent::ReconnectDue, later),
            vec![ChannelEffect::ScheduleConnect {
                delay: Duration::from_millis(2500)
            }]
        );
        assert_eq!(machine.state(), ChannelState::Connecting);
        assert_eq!(
            machine.handle(ChannelEvent::ConnectDue, now + Duration::from_millis(3000)),
            vec![ChannelEffect::Connect]
        );
    }

    #[test]
    fn test_changes_debounce_into_one_refresh() {
        let now = Instant::now();
        let mut machine = connecting(now);
        machine.handle(ChannelEvent::Ack, now);

        for _ in 0..4 {
            assert_eq!(
                machine.handle(change(), now),
                vec![ChannelEffect::ScheduleRefresh {
                    delay: Duration::from_millis(2000)
                }]
            );
        }
        match machine.handle(ChannelEvent::DebounceElapsed, now).as_slice() {
            [ChannelEffect::InvokeRefresh(changes)] => assert_eq!(changes.len(), 4),
            other => panic!("unexpected effects {other:?}"),
        }
        assert!(machine.handle(ChannelEvent::DebounceElapsed, now).is_empty());
    }

    #[test]
    fn test_changes_ignored_unless_subscribed() {
        let now = Instant::now();
        let mut machine = connecting(now);
        assert!(machine.handle(change(), now).is_empty());
    }

    #[test]
    fn test_close_from_any_state() {
        let now = Instant::now();
        let teardown = vec![
            ChannelEffect::CancelReconnect,
            ChannelEffect::CancelRefresh,
            ChannelEffect::ReleaseTransport,
        ];

        let mut idle = ChannelMachine::new(RealtimeConfig::default());
        assert_eq!(idle.handle(ChannelEvent::Close, now), teardown);

        let mut disabled = ChannelMachine::new(RealtimeConfig::default().with_max_attempts(0));
        disabled.handle(ChannelEvent::Open, now);
        disabled.handle(ChannelEvent::ConnectDue, now);
        disabled.handle(error(), now);
        assert_eq!(disabled.state(), ChannelState::Disabled);
        assert_eq!(disabled.handle(ChannelEvent::Close, now), teardown);
        assert_eq!(disabled.state(), ChannelState::Idle);
    }
}
