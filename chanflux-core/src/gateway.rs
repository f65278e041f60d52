//! The gateway facade consumed by outward transports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chanflux_types::{
    ChangeSet, ChannelName, ChannelValue, ControlSystemName, FlushKind, StreamEvent, StreamId,
    Timestamp,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::aggregator::{AggregatorStats, StreamAggregator};
use crate::buffer::ChannelBuffer;
use crate::client::ControlSystemClient;
use crate::error::{Error, Result};
use crate::interest::{InterestManager, DEFAULT_REQUEST_TIMEOUT};
use crate::properties::{ChannelProperties, StreamProperties, DEFAULT_BUFFER_CAPACITY};
use crate::sink::{StreamSink, DEFAULT_SINK_CAPACITY};
use crate::stream::Stream;

/// Gateway-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Buffer capacity for channels whose stream sets none.
    pub buffer_capacity: usize,
    /// Deadline for upstream reads and writes.
    pub request_timeout: Duration,
    /// Depth of each consumer's event queue.
    pub sink_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sink_capacity: DEFAULT_SINK_CAPACITY,
        }
    }
}

/// Events drained from a stream's queue, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolledChanges {
    /// Timestamps of heartbeats, oldest first.
    pub heartbeats: Vec<Timestamp>,
    pub monitored: Vec<ChangeSet>,
    pub polled: Vec<ChangeSet>,
}

impl PolledChanges {
    pub fn is_empty(&self) -> bool {
        self.heartbeats.is_empty() && self.monitored.is_empty() && self.polled.is_empty()
    }

    fn push(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Heartbeat { timestamp, .. } => self.heartbeats.push(timestamp),
            StreamEvent::Changes(changes) => match changes.kind {
                FlushKind::Monitored => self.monitored.push(changes),
                FlushKind::Polled => self.polled.push(changes),
            },
        }
    }
}

struct StreamSlot {
    aggregator: Arc<StreamAggregator>,
    receiver: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
}

/// Creates and destroys streams over a shared interest manager.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use chanflux_core::{Gateway, GatewayConfig, SimulatedClient};
/// use chanflux_types::{ChannelName, Reading};
///
/// # tokio_test::block_on(async {
/// let client = Arc::new(SimulatedClient::new());
/// client.add_channel("sr:current", Reading::Disconnected);
///
/// let gateway = Gateway::new(client.clone(), GatewayConfig::default());
/// let id = gateway
///     .create_stream_from_descriptor(r#"{"monflux": 500}"#, [ChannelName::new("sr:current")])
///     .await
///     .unwrap();
///
/// assert_eq!(gateway.stream_count(), 1);
/// gateway.destroy_stream(id).await.unwrap();
/// assert_eq!(client.unsubscribe_count(), 1);
/// gateway.close().await;
/// # });
/// ```
pub struct Gateway {
    client: Arc<dyn ControlSystemClient>,
    manager: InterestManager,
    streams: RwLock<HashMap<StreamId, StreamSlot>>,
    next_id: AtomicU64,
    config: GatewayConfig,
    closed: AtomicBool,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("streams", &self.stream_count())
            .field("config", &self.config)
            .finish()
    }
}

impl Gateway {
    /// Create a gateway. Must be called inside a tokio runtime.
    pub fn new(client: Arc<dyn ControlSystemClient>, config: GatewayConfig) -> Self {
        let buffer = Arc::new(ChannelBuffer::new(config.buffer_capacity));
        let manager =
            InterestManager::with_request_timeout(client.clone(), buffer, config.request_timeout);
        Self {
            client,
            manager,
            streams: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn interest_manager(&self) -> &InterestManager {
        &self.manager
    }

    pub fn buffer(&self) -> &Arc<ChannelBuffer> {
        self.manager.buffer()
    }

    /// Create and activate a stream. Members given `None` inherit the
    /// stream's channel defaults.
    pub async fn create_stream<I>(
        &self,
        properties: StreamProperties,
        channels: I,
    ) -> Result<StreamId>
    where
        I: IntoIterator<Item = (ChannelName, Option<ChannelProperties>)>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::invalid_state("gateway is closed"));
        }

        let id = StreamId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let stream = Stream::builder(id, properties).channels(channels).build()?;
        let (sink, receiver) = StreamSink::channel(self.config.sink_capacity);
        let aggregator = StreamAggregator::new(stream, self.manager.clone(), sink);
        aggregator.activate().await?;

        // `close` may have drained the map while activation was in flight.
        let orphan = {
            let mut streams = self.streams.write();
            if self.closed.load(Ordering::Acquire) {
                Some(aggregator)
            } else {
                streams.insert(
                    id,
                    StreamSlot {
                        aggregator,
                        receiver: Mutex::new(Some(receiver)),
                    },
                );
                None
            }
        };
        if let Some(aggregator) = orphan {
            aggregator.close().await;
            return Err(Error::invalid_state("gateway is closed"));
        }

        info!("created {}", id);
        Ok(id)
    }

    /// Create a stream from a wire descriptor; every member uses the
    /// descriptor's channel settings.
    pub async fn create_stream_from_descriptor<I>(
        &self,
        descriptor: &str,
        channels: I,
    ) -> Result<StreamId>
    where
        I: IntoIterator<Item = ChannelName>,
    {
        let properties = StreamProperties::from_descriptor(descriptor)?;
        self.create_stream(properties, channels.into_iter().map(|name| (name, None)))
            .await
    }

    /// Close a stream and release its channels.
    pub async fn destroy_stream(&self, id: StreamId) -> Result<()> {
        let slot = self
            .streams
            .write()
            .remove(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        slot.aggregator.close().await;
        info!("destroyed {}", id);
        Ok(())
    }

    /// Drain everything queued for the stream's consumer.
    ///
    /// Fails with `InvalidState` once the receiver has been taken for
    /// push-style consumption.
    pub fn poll_change_set(&self, id: StreamId) -> Result<PolledChanges> {
        let streams = self.streams.read();
        let slot = streams
            .get(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let mut receiver = slot.receiver.lock();
        let receiver = receiver
            .as_mut()
            .ok_or_else(|| Error::invalid_state(format!("receiver of {} was taken", id)))?;

        let mut changes = PolledChanges::default();
        while let Ok(event) = receiver.try_recv() {
            changes.push(event);
        }
        Ok(changes)
    }

    /// Hand the stream's event queue to a push-style consumer. Can only
    /// be taken once.
    pub fn take_receiver(&self, id: StreamId) -> Result<mpsc::Receiver<StreamEvent>> {
        let streams = self.streams.read();
        let slot = streams
            .get(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let receiver = slot.receiver.lock().take();
        receiver.ok_or_else(|| Error::invalid_state(format!("receiver of {} was taken", id)))
    }

    /// The stream's aggregator, for direct flushing or inspection.
    pub fn aggregator(&self, id: StreamId) -> Result<Arc<StreamAggregator>> {
        self.streams
            .read()
            .get(&id)
            .map(|slot| Arc::clone(&slot.aggregator))
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn stats(&self, id: StreamId) -> Result<AggregatorStats> {
        Ok(self.aggregator(id)?.stats())
    }

    /// Write a value to the control system, bounded by the request timeout.
    pub async fn write(&self, name: &ControlSystemName, value: ChannelValue) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("channel name must not be empty"));
        }
        let after = self.config.request_timeout;
        match tokio::time::timeout(after, self.client.put(name, value, after)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                channel: name.clone(),
                after,
            }),
        }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    /// Ids of live streams, ascending.
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self.streams.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Destroy every stream and close the interest manager. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let slots: Vec<StreamSlot> = self.streams.write().drain().map(|(_, slot)| slot).collect();
        debug!("closing gateway with {} streams", slots.len());
        for slot in slots {
            slot.aggregator.close().await;
        }
        self.manager.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{EventSink, SubscriptionHandle};
    use crate::SimulatedClient;
    use async_trait::async_trait;
    use chanflux_types::{Alarm, Reading, Scalar};

    fn real(v: f64) -> Reading {
        Reading::Scalar {
            value: Scalar::Real(v),
            alarm: Alarm::NONE,
            source_time: Timestamp(1),
        }
    }

    fn gateway(channels: &[&str]) -> (Arc<SimulatedClient>, Gateway) {
        let client = Arc::new(SimulatedClient::new());
        for name in channels {
            client.add_channel(*name, real(0.0));
        }
        let gateway = Gateway::new(client.clone(), GatewayConfig::default());
        (client, gateway)
    }

    const QUIET: &str = r#"{"heartbeat": 3600000, "monflux": 3600000, "pollflux": 3600000}"#;

    #[tokio::test]
    async fn streams_share_upstream_subscriptions() {
        let (client, gateway) = gateway(&["a", "b"]);
        let first = gateway
            .create_stream_from_descriptor(QUIET, [ChannelName::new("a"), ChannelName::new("b")])
            .await
            .unwrap();
        let second = gateway
            .create_stream_from_descriptor(QUIET, [ChannelName::new("a")])
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(client.subscribe_count(), 2);

        gateway.destroy_stream(first).await.unwrap();
        assert_eq!(client.unsubscribe_count(), 1);
        gateway.destroy_stream(second).await.unwrap();
        assert_eq!(client.unsubscribe_count(), 2);
    }

    #[tokio::test]
    async fn unknown_stream_is_not_found() {
        let (_, gateway) = gateway(&[]);
        assert!(matches!(
            gateway.destroy_stream(StreamId(99)).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            gateway.poll_change_set(StreamId(99)),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn bad_descriptor_creates_nothing() {
        let (client, gateway) = gateway(&["a"]);
        let err = gateway
            .create_stream_from_descriptor(r#"{"daqmode":99}"#, [ChannelName::new("a")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(gateway.stream_count(), 0);
        assert_eq!(client.subscribe_count(), 0);
    }

    #[tokio::test]
    async fn oversized_buffer_rejected_without_registering() {
        let (client, gateway) = gateway(&["a"]);
        let raw = r#"{"buffer": 1000000000000000000}"#;
        match gateway
            .create_stream_from_descriptor(raw, [ChannelName::new("a")])
            .await
        {
            Err(Error::InvalidArgument(msg)) => assert!(msg.contains(raw), "{}", msg),
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
        assert_eq!(client.subscribe_count(), 0);
        assert!(gateway
            .interest_manager()
            .interest(&ControlSystemName::new("a"))
            .is_idle());

        // The channel is still usable afterwards.
        let id = gateway
            .create_stream_from_descriptor(QUIET, [ChannelName::new("a")])
            .await
            .unwrap();
        gateway.destroy_stream(id).await.unwrap();
        assert_eq!(client.unsubscribe_count(), 1);
    }

    /// Subscribes only after a delay, leaving room for a concurrent close.
    struct SlowSubscribe(Arc<SimulatedClient>);

    #[async_trait]
    impl ControlSystemClient for SlowSubscribe {
        async fn subscribe(
            &self,
            channel: &ControlSystemName,
            events: EventSink,
        ) -> Result<SubscriptionHandle> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.0.subscribe(channel, events).await
        }

        async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
            self.0.unsubscribe(handle).await
        }

        async fn get(
            &self,
            channel: &ControlSystemName,
            timeout: Duration,
        ) -> Result<ChannelValue> {
            self.0.get(channel, timeout).await
        }

        async fn put(
            &self,
            channel: &ControlSystemName,
            value: ChannelValue,
            timeout: Duration,
        ) -> Result<()> {
            self.0.put(channel, value, timeout).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_create_leaves_no_stream() {
        let client = Arc::new(SimulatedClient::new());
        client.add_channel("a", real(0.0));
        let gateway = Gateway::new(
            Arc::new(SlowSubscribe(client.clone())),
            GatewayConfig::default(),
        );

        let (created, ()) = tokio::join!(
            gateway.create_stream_from_descriptor(QUIET, [ChannelName::new("a")]),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                gateway.close().await;
            }
        );

        assert!(matches!(created, Err(Error::InvalidState(_))));
        assert_eq!(gateway.stream_count(), 0);
        assert_eq!(client.subscribe_count(), 1);
        assert_eq!(client.unsubscribe_count(), 1);
    }

    #[tokio::test]
    async fn poll_change_set_groups_events() {
        let (_, gateway) = gateway(&["a"]);
        let id = gateway
            .create_stream_from_descriptor(QUIET, [ChannelName::new("a")])
            .await
            .unwrap();
        tokio::task::yield_now().await;

        let agg = gateway.aggregator(id).unwrap();
        agg.heartbeat();
        agg.flush_monitored();
        agg.flush_polled();

        let polled = gateway.poll_change_set(id).unwrap();
        assert_eq!(polled.heartbeats.len(), 1);
        assert_eq!(polled.monitored.len(), 1);
        assert!(polled.polled.is_empty());

        assert!(gateway.poll_change_set(id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn taken_receiver_cannot_be_polled() {
        let (_, gateway) = gateway(&["a"]);
        let id = gateway
            .create_stream_from_descriptor(QUIET, [ChannelName::new("a")])
            .await
            .unwrap();

        let _rx = gateway.take_receiver(id).unwrap();
        assert!(matches!(gateway.take_receiver(id), Err(Error::InvalidState(_))));
        assert!(matches!(gateway.poll_change_set(id), Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn write_passes_through() {
        let (client, gateway) = gateway(&["setpoint"]);
        let name = ControlSystemName::new("setpoint");
        gateway
            .write(&name, ChannelValue::from_reading(real(3.5)))
            .await
            .unwrap();
        assert_eq!(client.reading(&name), Some(real(3.5)));

        let err = gateway
            .write(&ControlSystemName::new("missing"), ChannelValue::disconnected())
            .await
            .unwrap_err();
        assert!(err.is_upstream());
    }

    #[tokio::test]
    async fn close_destroys_everything() {
        let (client, gateway) = gateway(&["a", "b"]);
        gateway
            .create_stream_from_descriptor(QUIET, [ChannelName::new("a")])
            .await
            .unwrap();
        gateway
            .create_stream_from_descriptor(QUIET, [ChannelName::new("b")])
            .await
            .unwrap();

        gateway.close().await;
        gateway.close().await;

        assert_eq!(gateway.stream_count(), 0);
        assert_eq!(client.unsubscribe_count(), 2);
        assert_eq!(gateway.buffer().channel_count(), 0);
        assert!(matches!(
            gateway
                .create_stream_from_descriptor(QUIET, [ChannelName::new("a")])
                .await,
            Err(Error::InvalidState(_))
        ));
    }
}
