//! Seam to the control-system wire client.
//!
//! The gateway never talks to the control system directly. Anything that
//! can subscribe to a channel, read it and write it implements
//! [`ControlSystemClient`]. Callbacks are replaced by message passing: a
//! subscription is handed an [`EventSink`] and pushes [`ChannelEvent`]s
//! into it from whatever thread the client runs on.

use std::time::Duration;

use async_trait::async_trait;
use chanflux_types::{ChannelMetadata, ChannelValue, ControlSystemName};
use tokio::sync::mpsc;

use crate::error::Result;

/// A change observed by an upstream subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The channel connected or disconnected.
    Connection {
        channel: ControlSystemName,
        connected: bool,
    },
    /// A new value arrived.
    Value {
        channel: ControlSystemName,
        value: ChannelValue,
    },
    /// The channel's descriptive attributes changed.
    Metadata {
        channel: ControlSystemName,
        metadata: ChannelMetadata,
    },
}

impl ChannelEvent {
    pub fn channel(&self) -> &ControlSystemName {
        match self {
            ChannelEvent::Connection { channel, .. }
            | ChannelEvent::Value { channel, .. }
            | ChannelEvent::Metadata { channel, .. } => channel,
        }
    }
}

/// Where a subscription delivers its events. Sending never blocks.
pub type EventSink = mpsc::UnboundedSender<ChannelEvent>;

/// Token for an active upstream subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    channel: ControlSystemName,
}

impl SubscriptionHandle {
    pub fn new(id: u64, channel: ControlSystemName) -> Self {
        Self { id, channel }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &ControlSystemName {
        &self.channel
    }
}

/// Operations the gateway needs from the control system.
///
/// `get` and `put` must honor their timeout by failing with
/// [`Error::Timeout`](crate::Error::Timeout) rather than hanging.
#[async_trait]
pub trait ControlSystemClient: Send + Sync + 'static {
    /// Start delivering connection, value and metadata events for `channel`.
    async fn subscribe(
        &self,
        channel: &ControlSystemName,
        events: EventSink,
    ) -> Result<SubscriptionHandle>;

    /// Stop a subscription. Unsubscribing an unknown handle is not an error.
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()>;

    /// Read the channel's current value.
    async fn get(&self, channel: &ControlSystemName, timeout: Duration) -> Result<ChannelValue>;

    /// Write a value to the channel.
    async fn put(
        &self,
        channel: &ControlSystemName,
        value: ChannelValue,
        timeout: Duration,
    ) -> Result<()>;
}
