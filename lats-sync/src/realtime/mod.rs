//! Realtime channel supervision: a pure lifecycle machine, the tokio driver
//! that runs it, and a per-topic hub.

mod hub;
mod machine;
mod supervisor;

pub use hub::RealtimeHub;
pub use machine::{
    ChannelEffect, ChannelEvent, ChannelMachine, ChannelSnapshot, ChannelState, ReconnectBudget,
};
pub use supervisor::{ChannelHandle, RealtimeChannelSupervisor};

use async_trait::async_trait;
use lats_store::RowChange;

/// Consumer side of a supervised channel.
#[async_trait]
pub trait ChangeListener: Send + Sync {
    /// Called once per settled debounce window with every change received
    /// during it. Runs on its own task.
    async fn on_refresh(&self, changes: Vec<RowChange>);

    /// The channel gave up reconnecting. Callers should surface that live
    /// updates are paused and offer a manual refresh.
    fn on_disabled(&self, _topic: &str) {}
}
