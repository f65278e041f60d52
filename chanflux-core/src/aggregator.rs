//! Per-stream flush cycles.
//!
//! A [`StreamAggregator`] owns one [`Stream`]. Activating it registers
//! interest in every member channel and starts a task that, on three
//! independent timers, harvests monitored values, harvests polled values
//! and emits heartbeats.
//!
//! Each flush kind keeps its own high-water mark. A flush reads the window
//! `(previous mark, new mark]` from the buffer, where the new mark is taken
//! from the buffer's receipt clock, so consecutive flushes of one kind never
//! repeat or skip a value that was still retained. The mark advances even
//! when nothing changed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chanflux_types::{
    ChangeSet, ChannelName, ChannelUpdate, FlushKind, StreamEvent, StreamId, Timestamp,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::buffer::ChannelBuffer;
use crate::error::{Error, Result};
use crate::filter::Pipeline;
use crate::interest::InterestManager;
use crate::sink::StreamSink;
use crate::stream::Stream;

/// Lifecycle of an aggregator. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    Active,
    Closed,
}

/// Counters describing an aggregator's output so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub monitored_flushes: u64,
    pub polled_flushes: u64,
    pub heartbeats: u64,
    /// Events accepted by the consumer's queue.
    pub emitted: u64,
    /// Events dropped because the consumer's queue was full or gone.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    monitored_flushes: AtomicU64,
    polled_flushes: AtomicU64,
    heartbeats: AtomicU64,
}

#[derive(Debug)]
struct Marks {
    monitored: Timestamp,
    polled: Timestamp,
}

impl Marks {
    fn get_mut(&mut self, kind: FlushKind) -> &mut Timestamp {
        match kind {
            FlushKind::Monitored => &mut self.monitored,
            FlushKind::Polled => &mut self.polled,
        }
    }
}

struct FlushTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Drives one stream's flushes into its consumer's sink.
pub struct StreamAggregator {
    stream: Arc<Stream>,
    manager: InterestManager,
    buffer: Arc<ChannelBuffer>,
    sink: StreamSink,
    pipelines: BTreeMap<ChannelName, Pipeline>,
    monitored: Vec<ChannelName>,
    polled: Vec<ChannelName>,
    // Serializes activate and close.
    state: tokio::sync::Mutex<StreamState>,
    marks: Mutex<Marks>,
    counters: Counters,
    task: Mutex<Option<FlushTask>>,
}

impl std::fmt::Debug for StreamAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAggregator")
            .field("stream", &self.stream.id())
            .field("channels", &self.stream.len())
            .finish()
    }
}

impl StreamAggregator {
    /// Create an aggregator in the `Created` state. Nothing is registered
    /// and no timer runs until [`activate`](Self::activate).
    pub fn new(stream: Stream, manager: InterestManager, sink: StreamSink) -> Arc<Self> {
        let pipelines = stream
            .channels()
            .map(|(name, props)| (name.clone(), Pipeline::for_channel(props)))
            .collect();
        let monitored = stream.monitored_channels();
        let polled = stream.polled_channels();
        let buffer = Arc::clone(manager.buffer());

        Arc::new(Self {
            stream: Arc::new(stream),
            manager,
            buffer,
            sink,
            pipelines,
            monitored,
            polled,
            state: tokio::sync::Mutex::new(StreamState::Created),
            marks: Mutex::new(Marks {
                monitored: Timestamp::MIN,
                polled: Timestamp::MIN,
            }),
            counters: Counters::default(),
            task: Mutex::new(None),
        })
    }

    pub fn id(&self) -> StreamId {
        self.stream.id()
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub async fn state(&self) -> StreamState {
        *self.state.lock().await
    }

    /// Register interest in every member and start the flush timers.
    ///
    /// Fails with `InvalidState` unless the aggregator is `Created`. If a
    /// registration fails, the ones already made are undone and the
    /// aggregator is closed.
    pub async fn activate(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;
        match *state {
            StreamState::Created => {}
            StreamState::Active => {
                return Err(Error::invalid_state(format!("{} is already active", self.id())))
            }
            StreamState::Closed => {
                return Err(Error::invalid_state(format!(
                    "{} is closed and cannot be reactivated",
                    self.id()
                )))
            }
        }

        let mut registered = Vec::new();
        for (name, props) in self.stream.channels() {
            let cs = name.control_system_name();
            let capacity = Some(self.stream.capacity_for(name));

            if props.mode().includes_monitor() {
                if let Err(e) = self.manager.start_monitoring(cs, capacity).await {
                    self.release(&registered).await;
                    *state = StreamState::Closed;
                    return Err(e);
                }
                registered.push((name.clone(), Registration::Monitor));
            }
            if let Some(every) = props.polling_interval() {
                if let Err(e) = self.manager.start_polling(cs, every, capacity).await {
                    self.release(&registered).await;
                    *state = StreamState::Closed;
                    return Err(e);
                }
                registered.push((name.clone(), Registration::Poll));
            }
        }

        let task = self.spawn_flush_task();
        *self.task.lock() = Some(task);
        *state = StreamState::Active;
        debug!("{} active with {} channels", self.id(), self.stream.len());
        Ok(())
    }

    /// Stop the timers and release every registration exactly once.
    /// Closing a closed aggregator is a no-op.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        let was = *state;
        *state = StreamState::Closed;
        if was != StreamState::Active {
            return;
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.stop.send(true);
            task.handle.abort();
        }

        let registered: Vec<_> = self
            .stream
            .channels()
            .flat_map(|(name, props)| {
                let mut regs = Vec::with_capacity(2);
                if props.mode().includes_monitor() {
                    regs.push((name.clone(), Registration::Monitor));
                }
                if props.mode().includes_poll() {
                    regs.push((name.clone(), Registration::Poll));
                }
                regs
            })
            .collect();
        self.release(&registered).await;
        debug!("{} closed", self.id());
    }

    async fn release(&self, registered: &[(ChannelName, Registration)]) {
        for (name, registration) in registered {
            let cs = name.control_system_name();
            let result = match registration {
                Registration::Monitor => self.manager.stop_monitoring(cs).await,
                Registration::Poll => self.manager.stop_polling(cs).await,
            };
            if let Err(e) = result {
                warn!("{}: releasing {} failed: {}", self.id(), name, e);
            }
        }
    }

    fn spawn_flush_task(self: &Arc<Self>) -> FlushTask {
        let (stop, mut stop_rx) = watch::channel(false);
        let weak: Weak<Self> = Arc::downgrade(self);
        let props = self.stream.properties();
        let has_monitored = !self.monitored.is_empty();
        let has_polled = !self.polled.is_empty();

        let start = Instant::now();
        let mut monitored = interval_at(
            start + props.monitored_flush_interval(),
            props.monitored_flush_interval(),
        );
        let mut polled = interval_at(
            start + props.polled_flush_interval(),
            props.polled_flush_interval(),
        );
        let mut heartbeat =
            interval_at(start + props.heartbeat_interval(), props.heartbeat_interval());
        for timer in [&mut monitored, &mut polled, &mut heartbeat] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = monitored.tick(), if has_monitored => {
                        let Some(agg) = weak.upgrade() else { break };
                        agg.flush_monitored();
                    }
                    _ = polled.tick(), if has_polled => {
                        let Some(agg) = weak.upgrade() else { break };
                        agg.flush_polled();
                    }
                    _ = heartbeat.tick() => {
                        let Some(agg) = weak.upgrade() else { break };
                        agg.heartbeat();
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        FlushTask { stop, handle }
    }

    /// Harvest monitored channels since the previous monitored flush.
    pub fn flush_monitored(&self) -> ChangeSet {
        self.flush(FlushKind::Monitored)
    }

    /// Harvest polled channels since the previous polled flush.
    pub fn flush_polled(&self) -> ChangeSet {
        self.flush(FlushKind::Polled)
    }

    /// Build the change-set for one flush window and emit it if any channel
    /// had activity. The change-set is returned either way.
    fn flush(&self, kind: FlushKind) -> ChangeSet {
        let members = match kind {
            FlushKind::Monitored => &self.monitored,
            FlushKind::Polled => &self.polled,
        };

        let changes = {
            let mut marks = self.marks.lock();
            let mark = marks.get_mut(kind);
            let since = *mark;
            let until = self.buffer.mark();

            let mut builder = ChangeSet::builder(self.id(), kind).timestamp(until);
            for (channel, values) in self.buffer.values_between(members, since, until) {
                let Some(props) = self.stream.channel_properties(&channel) else {
                    continue;
                };
                let values = match self.pipelines.get(&channel) {
                    Some(pipeline) => pipeline.apply(values),
                    None => values,
                };
                let update = ChannelUpdate {
                    fields: props.fields().clone(),
                    metadata: self.buffer.metadata_changed_between(&channel, since, until),
                    values,
                };
                builder = builder.channel(channel.key(), update);
            }

            *mark = until;
            builder.build()
        };

        match kind {
            FlushKind::Monitored => &self.counters.monitored_flushes,
            FlushKind::Polled => &self.counters.polled_flushes,
        }
        .fetch_add(1, Ordering::Relaxed);

        trace!(
            "{} {:?} flush: {} channels, {} values",
            self.id(),
            kind,
            changes.len(),
            changes.total_values()
        );
        if !changes.is_empty() {
            self.sink.emit(StreamEvent::Changes(changes.clone()));
        }
        changes
    }

    /// Emit a liveness marker.
    pub fn heartbeat(&self) {
        self.counters.heartbeats.fetch_add(1, Ordering::Relaxed);
        self.sink.emit(StreamEvent::Heartbeat {
            stream: self.id(),
            timestamp: Timestamp::now(),
        });
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            monitored_flushes: self.counters.monitored_flushes.load(Ordering::Relaxed),
            polled_flushes: self.counters.polled_flushes.load(Ordering::Relaxed),
            heartbeats: self.counters.heartbeats.load(Ordering::Relaxed),
            emitted: self.sink.emitted(),
            dropped: self.sink.dropped(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Registration {
    Monitor,
    Poll,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterSpec;
    use crate::properties::{AcquisitionMode, ChannelProperties, StreamProperties};
    use crate::SimulatedClient;
    use chanflux_types::{
        Alarm, ChannelMetadata, ControlSystemName, Descriptor, ElementType, Reading, Scalar,
    };
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn real(v: f64) -> Reading {
        Reading::Scalar {
            value: Scalar::Real(v),
            alarm: Alarm::NONE,
            source_time: Timestamp(1),
        }
    }

    struct Fixture {
        client: Arc<SimulatedClient>,
        manager: InterestManager,
    }

    fn fixture(channels: &[&str]) -> Fixture {
        let client = Arc::new(SimulatedClient::new());
        for name in channels {
            client.add_channel(*name, real(0.0));
        }
        let manager = InterestManager::new(client.clone(), Arc::new(ChannelBuffer::default()));
        Fixture { client, manager }
    }

    fn aggregator(
        fx: &Fixture,
        stream: Stream,
        capacity: usize,
    ) -> (Arc<StreamAggregator>, mpsc::Receiver<StreamEvent>) {
        let (sink, rx) = StreamSink::channel(capacity);
        (StreamAggregator::new(stream, fx.manager.clone(), sink), rx)
    }

    fn slow_props() -> StreamProperties {
        StreamProperties::builder()
            .heartbeat_interval(Duration::from_secs(3600))
            .monitored_flush_interval(Duration::from_secs(3600))
            .polled_flush_interval(Duration::from_secs(3600))
            .build()
            .unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[tokio::test]
    async fn activate_then_close_registers_once() {
        let fx = fixture(&["a", "b"]);
        let stream = Stream::builder(StreamId(1), slow_props())
            .channel("a")
            .channel("b")
            .build()
            .unwrap();
        let (agg, _rx) = aggregator(&fx, stream, 8);

        assert_eq!(agg.state().await, StreamState::Created);
        agg.activate().await.unwrap();
        assert_eq!(agg.state().await, StreamState::Active);
        assert_eq!(fx.client.subscribe_count(), 2);

        agg.close().await;
        agg.close().await;
        assert_eq!(agg.state().await, StreamState::Closed);
        assert_eq!(fx.client.unsubscribe_count(), 2);
        assert!(fx.manager.active_channels().is_empty());
    }

    #[tokio::test]
    async fn closed_cannot_reactivate() {
        let fx = fixture(&["a"]);
        let stream = Stream::builder(StreamId(1), slow_props())
            .channel("a")
            .build()
            .unwrap();
        let (agg, _rx) = aggregator(&fx, stream, 8);

        agg.activate().await.unwrap();
        assert!(matches!(agg.activate().await, Err(Error::InvalidState(_))));
        agg.close().await;
        assert!(matches!(agg.activate().await, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn close_before_activate_registers_nothing() {
        let fx = fixture(&["a"]);
        let stream = Stream::builder(StreamId(1), slow_props())
            .channel("a")
            .build()
            .unwrap();
        let (agg, _rx) = aggregator(&fx, stream, 8);

        agg.close().await;
        assert_eq!(fx.client.subscribe_count(), 0);
        assert_eq!(fx.client.unsubscribe_count(), 0);
    }

    #[tokio::test]
    async fn poll_and_monitor_registers_both() {
        let fx = fixture(&["a"]);
        let both = ChannelProperties::builder()
            .mode(AcquisitionMode::PollAndMonitor)
            .polling_interval(Duration::from_secs(60))
            .build()
            .unwrap();
        let stream = Stream::builder(StreamId(1), slow_props())
            .channel_with("a", both)
            .build()
            .unwrap();
        let (agg, _rx) = aggregator(&fx, stream, 8);

        agg.activate().await.unwrap();
        let interest = fx.manager.interest(&ControlSystemName::new("a"));
        assert_eq!((interest.monitors, interest.polls), (1, 1));

        agg.close().await;
        assert!(fx.manager.interest(&ControlSystemName::new("a")).is_idle());
    }

    // ========================================================================
    // Flushing
    // ========================================================================

    #[tokio::test]
    async fn consecutive_flushes_do_not_repeat_values() {
        let fx = fixture(&["a"]);
        let stream = Stream::builder(StreamId(7), slow_props())
            .channel("a")
            .build()
            .unwrap();
        let (agg, mut rx) = aggregator(&fx, stream, 8);
        agg.activate().await.unwrap();
        settle().await;

        // Seed placeholder, connect, initial value.
        let first = agg.flush_monitored();
        assert!(first.get("a").unwrap().values.len() >= 2);
        assert!(matches!(rx.try_recv(), Ok(StreamEvent::Changes(_))));

        let name = ControlSystemName::new("a");
        fx.client.set_value(&name, real(1.0)).unwrap();
        fx.client.set_value(&name, real(2.0)).unwrap();
        settle().await;

        let second = agg.flush_monitored();
        let values: Vec<_> = second
            .get("a")
            .unwrap()
            .values
            .iter()
            .map(|v| v.reading().clone())
            .collect();
        assert_eq!(values, vec![real(1.0), real(2.0)]);

        let third = agg.flush_monitored();
        assert!(third.is_empty());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        assert_eq!(agg.stats().monitored_flushes, 3);
        agg.close().await;
    }

    #[tokio::test]
    async fn flush_applies_channel_pipeline() {
        let fx = fixture(&["a"]);
        let last_one = ChannelProperties::builder()
            .filter(FilterSpec::LastN(1))
            .precision(1)
            .build()
            .unwrap();
        let stream = Stream::builder(StreamId(1), slow_props())
            .channel_with("a", last_one)
            .build()
            .unwrap();
        let (agg, _rx) = aggregator(&fx, stream, 8);
        agg.activate().await.unwrap();

        let name = ControlSystemName::new("a");
        for v in [1.0, 2.0, 3.14159] {
            fx.client.set_value(&name, real(v)).unwrap();
        }
        settle().await;

        let changes = agg.flush_monitored();
        let update = changes.get("a").unwrap();
        assert_eq!(update.values.len(), 1);
        assert_eq!(update.values[0].reading(), &real(3.1));
        agg.close().await;
    }

    #[tokio::test]
    async fn metadata_included_when_changed() {
        let fx = fixture(&["a"]);
        let stream = Stream::builder(StreamId(1), slow_props())
            .channel(ChannelName::aliased("a", "alpha"))
            .build()
            .unwrap();
        let (agg, _rx) = aggregator(&fx, stream, 8);
        agg.activate().await.unwrap();
        settle().await;
        agg.flush_monitored();

        let meta =
            ChannelMetadata::from(Descriptor::builder(ElementType::Real).units("mA").build());
        fx.client
            .set_metadata(&ControlSystemName::new("a"), meta.clone())
            .unwrap();
        settle().await;

        let changes = agg.flush_monitored();
        assert_eq!(changes.get("alpha").unwrap().metadata, Some(meta));

        let quiet = agg.flush_monitored();
        assert!(quiet.get("alpha").is_none());
        agg.close().await;
    }

    #[tokio::test]
    async fn full_sink_counts_drops() {
        let fx = fixture(&["a"]);
        let stream = Stream::builder(StreamId(1), slow_props())
            .channel("a")
            .build()
            .unwrap();
        let (agg, _rx) = aggregator(&fx, stream, 1);

        agg.heartbeat();
        agg.heartbeat();
        agg.heartbeat();

        let stats = agg.stats();
        assert_eq!(stats.heartbeats, 3);
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.dropped, 2);
    }

    // ========================================================================
    // Timers
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn timers_drive_heartbeats_and_flushes() {
        let fx = fixture(&["a"]);
        let props = StreamProperties::builder()
            .heartbeat_interval(Duration::from_millis(1000))
            .monitored_flush_interval(Duration::from_millis(100))
            .build()
            .unwrap();
        let stream = Stream::builder(StreamId(3), props)
            .channel("a")
            .build()
            .unwrap();
        let (agg, mut rx) = aggregator(&fx, stream, 64);
        agg.activate().await.unwrap();

        tokio::time::sleep(Duration::from_millis(1050)).await;

        let stats = agg.stats();
        assert_eq!(stats.heartbeats, 1);
        assert!(stats.monitored_flushes >= 9);
        assert_eq!(stats.polled_flushes, 0);

        let mut heartbeats = 0;
        let mut changes = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                StreamEvent::Heartbeat { stream, .. } => {
                    assert_eq!(stream, StreamId(3));
                    heartbeats += 1;
                }
                StreamEvent::Changes(_) => changes += 1,
            }
        }
        assert_eq!(heartbeats, 1);
        assert_eq!(changes, 1);

        agg.close().await;
        let flushes = agg.stats().monitored_flushes;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(agg.stats().monitored_flushes, flushes);
    }

    #[tokio::test(start_paused = true)]
    async fn polled_flush_harvests_poll_results() {
        let fx = fixture(&["p"]);
        let polled = ChannelProperties::builder()
            .mode(AcquisitionMode::Poll)
            .polling_interval(Duration::from_millis(100))
            .build()
            .unwrap();
        let props = StreamProperties::builder()
            .heartbeat_interval(Duration::from_secs(3600))
            .polled_flush_interval(Duration::from_millis(1000))
            .build()
            .unwrap();
        let stream = Stream::builder(StreamId(4), props)
            .channel_with("p", polled)
            .build()
            .unwrap();
        let (agg, mut rx) = aggregator(&fx, stream, 64);
        agg.activate().await.unwrap();

        tokio::time::sleep(Duration::from_millis(1050)).await;

        match rx.try_recv() {
            Ok(StreamEvent::Changes(changes)) => {
                assert_eq!(changes.kind, FlushKind::Polled);
                // Seed placeholder plus one poll per 100ms tick, capped by capacity.
                assert!(changes.get("p").unwrap().values.len() >= 10);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(agg.stats().monitored_flushes, 0);
        agg.close().await;
    }
}
