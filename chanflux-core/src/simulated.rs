//! In-memory control system.
//!
//! [`SimulatedClient`] behaves like a wire client against a set of
//! channels held in memory. Tests and the demo binary inject values,
//! toggle connectivity and make channels unresponsive to exercise the
//! gateway's failure handling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chanflux_types::{ChannelMetadata, ChannelValue, ControlSystemName, Reading};
use parking_lot::Mutex;

use crate::client::{ChannelEvent, ControlSystemClient, EventSink, SubscriptionHandle};
use crate::error::{Error, Result};

#[derive(Debug)]
struct SimChannel {
    reading: Reading,
    metadata: ChannelMetadata,
    connected: bool,
    responsive: bool,
}

#[derive(Debug, Default)]
struct SimState {
    channels: HashMap<ControlSystemName, SimChannel>,
    subscribers: HashMap<u64, (ControlSystemName, EventSink)>,
}

impl SimState {
    fn notify(&mut self, channel: &ControlSystemName, event: ChannelEvent) {
        // Closed sinks are pruned as they are found.
        self.subscribers.retain(|_, (name, sink)| {
            if name != channel {
                return true;
            }
            sink.send(event.clone()).is_ok()
        });
    }
}

/// A [`ControlSystemClient`] backed by memory.
#[derive(Debug, Default)]
pub struct SimulatedClient {
    state: Mutex<SimState>,
    next_handle: AtomicU64,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl SimulatedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connected channel with an initial reading. Replaces any
    /// existing channel of that name.
    pub fn add_channel(&self, name: impl Into<ControlSystemName>, reading: Reading) {
        let name = name.into();
        let mut state = self.state.lock();
        state.channels.insert(
            name.clone(),
            SimChannel {
                reading: reading.clone(),
                metadata: ChannelMetadata::Unknown,
                connected: true,
                responsive: true,
            },
        );
        state.notify(
            &name,
            ChannelEvent::Value {
                channel: name.clone(),
                value: ChannelValue::from_reading(reading),
            },
        );
    }

    /// Publish a new reading to every subscriber of the channel.
    pub fn set_value(&self, name: &ControlSystemName, reading: Reading) -> Result<()> {
        let mut state = self.state.lock();
        let channel = state
            .channels
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        channel.reading = reading.clone();
        if !channel.connected {
            return Ok(());
        }
        state.notify(
            name,
            ChannelEvent::Value {
                channel: name.clone(),
                value: ChannelValue::from_reading(reading),
            },
        );
        Ok(())
    }

    pub fn set_metadata(&self, name: &ControlSystemName, metadata: ChannelMetadata) -> Result<()> {
        let mut state = self.state.lock();
        let channel = state
            .channels
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        channel.metadata = metadata.clone();
        state.notify(
            name,
            ChannelEvent::Metadata {
                channel: name.clone(),
                metadata,
            },
        );
        Ok(())
    }

    /// Connect or disconnect the channel. Reconnecting re-publishes the
    /// current reading.
    pub fn set_connected(&self, name: &ControlSystemName, connected: bool) -> Result<()> {
        let mut state = self.state.lock();
        let channel = state
            .channels
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if channel.connected == connected {
            return Ok(());
        }
        channel.connected = connected;
        let reading = channel.reading.clone();

        state.notify(
            name,
            ChannelEvent::Connection {
                channel: name.clone(),
                connected,
            },
        );
        if connected {
            state.notify(
                name,
                ChannelEvent::Value {
                    channel: name.clone(),
                    value: ChannelValue::from_reading(reading),
                },
            );
        }
        Ok(())
    }

    /// An unresponsive channel never answers `get` or `put`, so callers
    /// run into their timeout.
    pub fn set_responsive(&self, name: &ControlSystemName, responsive: bool) -> Result<()> {
        let mut state = self.state.lock();
        let channel = state
            .channels
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        channel.responsive = responsive;
        Ok(())
    }

    /// Current reading of a channel, as a subscriber would last have seen it.
    pub fn reading(&self, name: &ControlSystemName) -> Option<Reading> {
        self.state.lock().channels.get(name).map(|c| c.reading.clone())
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::Relaxed)
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::Relaxed)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    /// Subscriptions currently open against `name`.
    pub fn subscribers(&self, name: &ControlSystemName) -> usize {
        self.state
            .lock()
            .subscribers
            .values()
            .filter(|(channel, _)| channel == name)
            .count()
    }

    /// Resolve whether a request can be answered, without holding the lock
    /// across an await.
    fn check(&self, name: &ControlSystemName) -> Result<Option<Reading>> {
        let state = self.state.lock();
        let channel = state.channels.get(name).ok_or_else(|| Error::Transport {
            channel: name.clone(),
            message: "no such channel".to_string(),
        })?;
        if !channel.responsive {
            return Ok(None);
        }
        if !channel.connected {
            return Err(Error::Transport {
                channel: name.clone(),
                message: "channel not connected".to_string(),
            });
        }
        Ok(Some(channel.reading.clone()))
    }
}

#[async_trait]
impl ControlSystemClient for SimulatedClient {
    async fn subscribe(
        &self,
        channel: &ControlSystemName,
        events: EventSink,
    ) -> Result<SubscriptionHandle> {
        self.subscribes.fetch_add(1, Ordering::Relaxed);
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        if let Some(sim) = state.channels.get(channel) {
            if sim.connected {
                let _ = events.send(ChannelEvent::Connection {
                    channel: channel.clone(),
                    connected: true,
                });
                if !sim.metadata.is_unknown() {
                    let _ = events.send(ChannelEvent::Metadata {
                        channel: channel.clone(),
                        metadata: sim.metadata.clone(),
                    });
                }
                let _ = events.send(ChannelEvent::Value {
                    channel: channel.clone(),
                    value: ChannelValue::from_reading(sim.reading.clone()),
                });
            }
        }
        state.subscribers.insert(id, (channel.clone(), events));

        Ok(SubscriptionHandle::new(id, channel.clone()))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        self.unsubscribes.fetch_add(1, Ordering::Relaxed);
        self.state.lock().subscribers.remove(&handle.id());
        Ok(())
    }

    async fn get(&self, channel: &ControlSystemName, timeout: Duration) -> Result<ChannelValue> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        match self.check(channel)? {
            Some(reading) => Ok(ChannelValue::from_reading(reading)),
            None => {
                tokio::time::sleep(timeout).await;
                Err(Error::Timeout {
                    channel: channel.clone(),
                    after: timeout,
                })
            }
        }
    }

    async fn put(
        &self,
        channel: &ControlSystemName,
        value: ChannelValue,
        timeout: Duration,
    ) -> Result<()> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        if self.check(channel)?.is_none() {
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout {
                channel: channel.clone(),
                after: timeout,
            });
        }
        self.set_value(channel, value.reading().clone())
    }
}
