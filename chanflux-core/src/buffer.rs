//! Bounded, time-indexed value buffer.
//!
//! Each control-system channel owns a slot holding a ring of its most recent
//! values plus its latest metadata. Slots are sharded by name: the map lock
//! is held only long enough to clone the slot's `Arc`, and each slot has its
//! own locks, so a reader on one channel never stalls a writer on another.
//!
//! Receipt timestamps come from a buffer-wide clock that never repeats and
//! never runs backwards. A timestamp is taken while the slot's ring lock is
//! held, so within a channel, ring order equals timestamp order, and a read
//! bounded by a mark taken before the read sees every value stamped at or
//! before the mark.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chanflux_types::{ChannelMetadata, ChannelName, ChannelValue, ControlSystemName, Timestamp};
use parking_lot::RwLock;

use crate::properties::{DEFAULT_BUFFER_CAPACITY, MAX_BUFFER_CAPACITY};

/// Rings grow on demand past this many preallocated entries.
const PREALLOCATE: usize = 64;

/// Strictly increasing receipt clock anchored to wall time.
#[derive(Debug, Default)]
struct ReceiptClock {
    last: AtomicU64,
}

impl ReceiptClock {
    fn tick(&self) -> Timestamp {
        let now = Timestamp::now().as_nanos();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        Timestamp(now.max(prev + 1))
    }
}

#[derive(Debug)]
struct Ring {
    values: VecDeque<ChannelValue>,
    capacity: usize,
    total_written: u64,
}

impl Ring {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity.min(PREALLOCATE)),
            capacity,
            total_written: 0,
        }
    }

    fn push(&mut self, value: ChannelValue) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.total_written += 1;
    }

    /// Values with `since < received_at <= until`, oldest first.
    fn window(&self, since: Timestamp, until: Timestamp) -> Vec<ChannelValue> {
        let start = self.values.partition_point(|v| v.received_at() <= since);
        let end = self.values.partition_point(|v| v.received_at() <= until);
        if start >= end {
            return Vec::new();
        }
        self.values.range(start..end).cloned().collect()
    }
}

#[derive(Debug)]
struct MetadataEntry {
    metadata: ChannelMetadata,
    updated_at: Timestamp,
}

#[derive(Debug)]
struct Slot {
    ring: RwLock<Ring>,
    metadata: RwLock<MetadataEntry>,
}

impl Slot {
    fn new(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(Ring::with_capacity(capacity)),
            metadata: RwLock::new(MetadataEntry {
                metadata: ChannelMetadata::Unknown,
                updated_at: Timestamp::MIN,
            }),
        }
    }
}

/// Per-channel retention of recent values and latest metadata.
///
/// # Example
///
/// ```rust
/// use chanflux_core::ChannelBuffer;
/// use chanflux_types::{ChannelName, ChannelValue, ControlSystemName, Timestamp};
///
/// let buffer = ChannelBuffer::new(3);
/// let name = ControlSystemName::new("sr:current");
/// buffer.open(&name, None);
///
/// for _ in 0..5 {
///     buffer.record_value(&name, ChannelValue::disconnected());
/// }
///
/// let values = buffer.values_newer_than(&[ChannelName::new("sr:current")], Timestamp::MIN);
/// assert_eq!(values[&ChannelName::new("sr:current")].len(), 3);
/// ```
#[derive(Debug)]
pub struct ChannelBuffer {
    slots: RwLock<HashMap<ControlSystemName, Arc<Slot>>>,
    clock: ReceiptClock,
    default_capacity: usize,
}

impl ChannelBuffer {
    /// Create a buffer whose channels hold `default_capacity` values unless
    /// opened with an explicit capacity.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            clock: ReceiptClock::default(),
            default_capacity: default_capacity.clamp(1, MAX_BUFFER_CAPACITY),
        }
    }

    pub fn default_capacity(&self) -> usize {
        self.default_capacity
    }

    fn slot(&self, name: &ControlSystemName) -> Option<Arc<Slot>> {
        self.slots.read().get(name).cloned()
    }

    /// Create the channel's slot if absent. The first opener fixes the
    /// capacity, clamped to `1..=MAX_BUFFER_CAPACITY`. Returns true if the
    /// slot was created.
    pub fn open(&self, name: &ControlSystemName, capacity: Option<usize>) -> bool {
        // Fast path
        if self.slots.read().contains_key(name) {
            return false;
        }

        // Slow path
        let mut slots = self.slots.write();
        if slots.contains_key(name) {
            return false;
        }
        let capacity = capacity
            .unwrap_or(self.default_capacity)
            .clamp(1, MAX_BUFFER_CAPACITY);
        slots.insert(name.clone(), Arc::new(Slot::new(capacity)));
        true
    }

    /// Append a value stamped with a fresh receipt time, evicting the oldest
    /// when full. Writing to a channel that is not open is a no-op and
    /// returns false.
    pub fn record_value(&self, name: &ControlSystemName, value: ChannelValue) -> bool {
        let Some(slot) = self.slot(name) else {
            return false;
        };
        let mut ring = slot.ring.write();
        let stamped = value.received(self.clock.tick());
        ring.push(stamped);
        true
    }

    /// Replace the channel's metadata. No-op for channels that are not open.
    pub fn record_metadata(&self, name: &ControlSystemName, metadata: ChannelMetadata) -> bool {
        let Some(slot) = self.slot(name) else {
            return false;
        };
        let mut entry = slot.metadata.write();
        entry.updated_at = self.clock.tick();
        entry.metadata = metadata;
        true
    }

    /// A receipt-clock reading strictly after every timestamp issued so far.
    /// Flushes use it as the upper bound of their window.
    pub fn mark(&self) -> Timestamp {
        self.clock.tick()
    }

    /// For each channel, the retained values received strictly after
    /// `since`, oldest first. Channels with nothing newer, or not open at
    /// all, map to an empty sequence.
    pub fn values_newer_than(
        &self,
        channels: &[ChannelName],
        since: Timestamp,
    ) -> BTreeMap<ChannelName, Vec<ChannelValue>> {
        self.values_between(channels, since, Timestamp::MAX)
    }

    /// Like [`values_newer_than`](Self::values_newer_than), bounded above by
    /// `until` (inclusive).
    pub fn values_between(
        &self,
        channels: &[ChannelName],
        since: Timestamp,
        until: Timestamp,
    ) -> BTreeMap<ChannelName, Vec<ChannelValue>> {
        channels
            .iter()
            .map(|channel| {
                let values = self
                    .slot(channel.control_system_name())
                    .map(|slot| slot.ring.read().window(since, until))
                    .unwrap_or_default();
                (channel.clone(), values)
            })
            .collect()
    }

    /// The channel's metadata, `Unknown` if never set or not open.
    pub fn latest_metadata(&self, channel: &ChannelName) -> ChannelMetadata {
        self.slot(channel.control_system_name())
            .map(|slot| slot.metadata.read().metadata.clone())
            .unwrap_or_default()
    }

    /// The channel's metadata if it was replaced within `(since, until]`.
    pub fn metadata_changed_between(
        &self,
        channel: &ChannelName,
        since: Timestamp,
        until: Timestamp,
    ) -> Option<ChannelMetadata> {
        let slot = self.slot(channel.control_system_name())?;
        let entry = slot.metadata.read();
        (entry.updated_at > since && entry.updated_at <= until).then(|| entry.metadata.clone())
    }

    /// The most recent retained value.
    pub fn latest_value(&self, name: &ControlSystemName) -> Option<ChannelValue> {
        self.slot(name)?.ring.read().values.back().cloned()
    }

    /// Discard everything retained for the channel.
    pub fn remove(&self, name: &ControlSystemName) -> bool {
        self.slots.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &ControlSystemName) -> bool {
        self.slots.read().contains_key(name)
    }

    /// Number of values currently retained for the channel.
    pub fn len(&self, name: &ControlSystemName) -> usize {
        self.slot(name).map_or(0, |slot| slot.ring.read().values.len())
    }

    /// The channel's fixed capacity.
    pub fn capacity(&self, name: &ControlSystemName) -> Option<usize> {
        self.slot(name).map(|slot| slot.ring.read().capacity)
    }

    /// Values ever written to the channel since it was opened.
    pub fn total_written(&self, name: &ControlSystemName) -> u64 {
        self.slot(name).map_or(0, |slot| slot.ring.read().total_written)
    }

    pub fn channel_count(&self) -> usize {
        self.slots.read().len()
    }
}

impl Default for ChannelBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
