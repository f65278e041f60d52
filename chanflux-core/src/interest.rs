//! Reference-counted upstream subscriptions.
//!
//! Any number of streams may want the same control-system channel. The
//! [`InterestManager`] keeps one monitor count and one poll count per
//! [`ControlSystemName`] and makes sure exactly one upstream subscription
//! (and at most one poll task) exists while the matching count is above
//! zero.
//!
//! Each name has two locks:
//! - a counter lock (`parking_lot::Mutex`) guarding the counts, held only
//!   for the increment or decrement itself;
//! - a lifecycle lock (`tokio::sync::Mutex`) held while the upstream state is
//!   brought in line with the counts.
//!
//! Upstream calls are only ever made under the lifecycle lock. Every count
//! change is followed by a reconcile pass, so concurrent starts and stops
//! converge without issuing duplicate subscribes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chanflux_types::{ChannelMetadata, ChannelValue, ControlSystemName};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::buffer::ChannelBuffer;
use crate::client::{ChannelEvent, ControlSystemClient, EventSink, SubscriptionHandle};
use crate::error::{Error, Result};

/// Default deadline for upstream reads and writes.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Current interest in one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    pub monitors: usize,
    pub polls: usize,
}

impl Interest {
    pub fn total(&self) -> usize {
        self.monitors + self.polls
    }

    pub fn is_idle(&self) -> bool {
        self.total() == 0
    }
}

#[derive(Debug, Default)]
struct Counts {
    interest: Interest,
    /// Set by the first poll registration, cleared when polls reach zero.
    poll_interval: Option<Duration>,
    /// Buffer capacity requested by the first registration.
    capacity: Option<usize>,
}

#[derive(Debug, Default)]
struct Upstream {
    subscription: Option<SubscriptionHandle>,
    poll_task: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct Entry {
    counts: Mutex<Counts>,
    upstream: tokio::sync::Mutex<Upstream>,
}

#[derive(Clone, Copy, Debug)]
enum Kind {
    Monitor,
    Poll(Duration),
}

struct Inner {
    client: Arc<dyn ControlSystemClient>,
    buffer: Arc<ChannelBuffer>,
    entries: RwLock<HashMap<ControlSystemName, Arc<Entry>>>,
    events: EventSink,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Duration,
    closed: AtomicBool,
}

/// Deduplicates upstream monitoring and polling across streams.
///
/// Must be created inside a tokio runtime: it spawns the task that
/// forwards client events into the buffer.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use chanflux_core::{ChannelBuffer, InterestManager, SimulatedClient};
/// use chanflux_types::{ControlSystemName, Reading};
///
/// # tokio_test::block_on(async {
/// let client = Arc::new(SimulatedClient::new());
/// client.add_channel("sr:current", Reading::Disconnected);
///
/// let buffer = Arc::new(ChannelBuffer::default());
/// let manager = InterestManager::new(client.clone(), buffer.clone());
///
/// let name = ControlSystemName::new("sr:current");
/// manager.start_monitoring(&name, None).await.unwrap();
/// manager.start_monitoring(&name, None).await.unwrap();
/// assert_eq!(client.subscribe_count(), 1);
///
/// manager.stop_monitoring(&name).await.unwrap();
/// manager.stop_monitoring(&name).await.unwrap();
/// assert_eq!(client.unsubscribe_count(), 1);
/// assert!(manager.stop_monitoring(&name).await.is_err());
/// # });
/// ```
#[derive(Clone)]
pub struct InterestManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InterestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterestManager")
            .field("channels", &self.inner.entries.read().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl InterestManager {
    pub fn new(client: Arc<dyn ControlSystemClient>, buffer: Arc<ChannelBuffer>) -> Self {
        Self::with_request_timeout(client, buffer, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a manager whose poll reads give up after `request_timeout`.
    pub fn with_request_timeout(
        client: Arc<dyn ControlSystemClient>,
        buffer: Arc<ChannelBuffer>,
        request_timeout: Duration,
    ) -> Self {
        let (events, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();

        let sink = Arc::clone(&buffer);
        let dispatcher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                dispatch(&sink, event);
            }
        });

        Self {
            inner: Arc::new(Inner {
                client,
                buffer,
                entries: RwLock::new(HashMap::new()),
                events,
                dispatcher: Mutex::new(Some(dispatcher)),
                request_timeout,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn buffer(&self) -> &Arc<ChannelBuffer> {
        &self.inner.buffer
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Register one more monitor of `name`. The first registration of a
    /// channel subscribes upstream and seeds the buffer with a
    /// disconnected value and unknown metadata.
    ///
    /// `capacity` sizes the channel's buffer if this registration creates
    /// it; otherwise it is ignored.
    pub async fn start_monitoring(
        &self,
        name: &ControlSystemName,
        capacity: Option<usize>,
    ) -> Result<()> {
        self.start(name, Kind::Monitor, capacity).await
    }

    /// Register one more poller of `name`. While any poller remains, one
    /// task reads the channel every `interval`; the first registered
    /// interval is kept until polls drop back to zero.
    pub async fn start_polling(
        &self,
        name: &ControlSystemName,
        interval: Duration,
        capacity: Option<usize>,
    ) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::invalid_argument("polling interval must be positive"));
        }
        self.start(name, Kind::Poll(interval), capacity).await
    }

    pub async fn stop_monitoring(&self, name: &ControlSystemName) -> Result<()> {
        self.stop(name, Kind::Monitor).await
    }

    pub async fn stop_polling(&self, name: &ControlSystemName) -> Result<()> {
        self.stop(name, Kind::Poll(Duration::ZERO)).await
    }

    async fn start(
        &self,
        name: &ControlSystemName,
        kind: Kind,
        capacity: Option<usize>,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("channel name must not be empty"));
        }

        let entry = {
            let entries = self.entries_for_update(name)?;
            let entry = match entries.get(name) {
                Some(entry) => Arc::clone(entry),
                None => return Err(Error::invalid_state("interest manager is closed")),
            };
            let mut counts = entry.counts.lock();
            if counts.interest.is_idle() {
                counts.capacity = capacity;
            }
            match kind {
                Kind::Monitor => counts.interest.monitors += 1,
                Kind::Poll(interval) => {
                    if counts.interest.polls == 0 {
                        counts.poll_interval = Some(interval);
                    }
                    counts.interest.polls += 1;
                }
            }
            trace!("interest in {} now {:?}", name, counts.interest);
            drop(counts);
            entry
        };

        self.reconcile(name, &entry).await;
        Ok(())
    }

    async fn stop(&self, name: &ControlSystemName, kind: Kind) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("channel name must not be empty"));
        }

        let entry = {
            let entries = self.inner.entries.read();
            let entry = entries
                .get(name)
                .cloned()
                .ok_or_else(|| Error::invalid_state(format!("{} was never registered", name)))?;
            let mut counts = entry.counts.lock();
            let count = match kind {
                Kind::Monitor => &mut counts.interest.monitors,
                Kind::Poll(_) => &mut counts.interest.polls,
            };
            if *count == 0 {
                return Err(Error::invalid_state(format!(
                    "{} has no {} registered",
                    name,
                    kind.noun()
                )));
            }
            *count -= 1;
            if counts.interest.polls == 0 {
                counts.poll_interval = None;
            }
            trace!("interest in {} now {:?}", name, counts.interest);
            drop(counts);
            entry
        };

        self.reconcile(name, &entry).await;
        Ok(())
    }

    /// Ensure an entry exists for `name` and return the map locked for
    /// reading, so the caller's count change cannot race entry removal.
    fn entries_for_update(
        &self,
        name: &ControlSystemName,
    ) -> Result<parking_lot::RwLockReadGuard<'_, HashMap<ControlSystemName, Arc<Entry>>>> {
        {
            let entries = self.inner.entries.read();
            if self.is_closed() {
                return Err(Error::invalid_state("interest manager is closed"));
            }
            if entries.contains_key(name) {
                return Ok(entries);
            }
        }

        let mut entries = self.inner.entries.write();
        if self.is_closed() {
            return Err(Error::invalid_state("interest manager is closed"));
        }
        entries
            .entry(name.clone())
            .or_insert_with(|| Arc::new(Entry::default()));
        Ok(parking_lot::RwLockWriteGuard::downgrade(entries))
    }

    /// Bring the upstream subscription, poll task and buffer slot for
    /// `name` in line with its current counts.
    async fn reconcile(&self, name: &ControlSystemName, entry: &Arc<Entry>) {
        let inner = &self.inner;
        let mut upstream = entry.upstream.lock().await;

        let (interest, poll_interval, capacity) = {
            let counts = entry.counts.lock();
            if self.is_closed() {
                (Interest::default(), None, None)
            } else {
                (counts.interest, counts.poll_interval, counts.capacity)
            }
        };

        if !interest.is_idle() && inner.buffer.open(name, capacity) {
            inner.buffer.record_value(name, ChannelValue::disconnected());
            inner.buffer.record_metadata(name, ChannelMetadata::Unknown);
        }

        // Monitoring
        if interest.monitors > 0 && upstream.subscription.is_none() {
            debug!("subscribing to {}", name);
            match inner.client.subscribe(name, inner.events.clone()).await {
                Ok(handle) => upstream.subscription = Some(handle),
                Err(e) => {
                    warn!("subscribe to {} failed: {}", name, e);
                    inner.buffer.record_value(name, ChannelValue::disconnected());
                }
            }
        } else if interest.monitors == 0 {
            if let Some(handle) = upstream.subscription.take() {
                debug!("unsubscribing from {}", name);
                if let Err(e) = inner.client.unsubscribe(handle).await {
                    warn!("unsubscribe from {} failed: {}", name, e);
                }
            }
        }

        // Polling
        match (interest.polls > 0, upstream.poll_task.is_some()) {
            (true, false) => {
                let every = poll_interval.unwrap_or(crate::properties::DEFAULT_POLLING_INTERVAL);
                debug!("polling {} every {:?}", name, every);
                upstream.poll_task = Some(tokio::spawn(poll_loop(
                    Arc::clone(&inner.client),
                    Arc::clone(&inner.buffer),
                    name.clone(),
                    every,
                    inner.request_timeout,
                )));
            }
            (false, true) => {
                if let Some(task) = upstream.poll_task.take() {
                    debug!("stopped polling {}", name);
                    task.abort();
                }
            }
            _ => {}
        }

        if interest.is_idle() {
            inner.buffer.remove(name);
            drop(upstream);

            let mut entries = inner.entries.write();
            let still_idle = entry.counts.lock().interest.is_idle() || self.is_closed();
            if still_idle
                && entries
                    .get(name)
                    .is_some_and(|current| Arc::ptr_eq(current, entry))
            {
                entries.remove(name);
            }
        }
    }

    /// Current interest in `name`; zero when never registered.
    pub fn interest(&self, name: &ControlSystemName) -> Interest {
        self.inner
            .entries
            .read()
            .get(name)
            .map(|entry| entry.counts.lock().interest)
            .unwrap_or_default()
    }

    /// Channels with any interest, sorted by name.
    pub fn active_channels(&self) -> Vec<ControlSystemName> {
        let mut names: Vec<_> = self
            .inner
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| !entry.counts.lock().interest.is_idle())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Tear down every remaining interest and stop forwarding events.
    /// Subsequent starts fail; repeated calls are no-ops.
    pub async fn close(&self) {
        let drained: Vec<(ControlSystemName, Arc<Entry>)> = {
            let mut entries = self.inner.entries.write();
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            entries.drain().collect()
        };

        debug!("closing interest manager with {} channels", drained.len());
        for (name, entry) in &drained {
            self.reconcile(name, entry).await;
        }

        if let Some(dispatcher) = self.inner.dispatcher.lock().take() {
            dispatcher.abort();
        }
    }
}

impl Kind {
    fn noun(&self) -> &'static str {
        match self {
            Kind::Monitor => "monitor",
            Kind::Poll(_) => "poller",
        }
    }
}

fn dispatch(buffer: &ChannelBuffer, event: ChannelEvent) {
    match event {
        ChannelEvent::Connection {
            channel,
            connected: false,
        } => {
            debug!("{} disconnected", channel);
            buffer.record_value(&channel, ChannelValue::disconnected());
        }
        ChannelEvent::Connection {
            channel,
            connected: true,
        } => {
            debug!("{} connected", channel);
        }
        ChannelEvent::Value { channel, value } => {
            buffer.record_value(&channel, value);
        }
        ChannelEvent::Metadata { channel, metadata } => {
            buffer.record_metadata(&channel, metadata);
        }
    }
}

async fn poll_loop(
    client: Arc<dyn ControlSystemClient>,
    buffer: Arc<ChannelBuffer>,
    name: ControlSystemName,
    every: Duration,
    timeout: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let value = match tokio::time::timeout(timeout, client.get(&name, timeout)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!("poll of {} failed: {}", name, e);
                ChannelValue::disconnected()
            }
            Err(_) => {
                warn!("poll of {} timed out after {:?}", name, timeout);
                ChannelValue::disconnected()
            }
        };
        buffer.record_value(&name, value);
    }
}
