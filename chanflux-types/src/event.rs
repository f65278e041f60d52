//! Events emitted to stream consumers.
//!
//! Every flush of a stream produces a [`ChangeSet`]: for each member channel
//! with activity in the flush window, the filtered values and any metadata
//! change. Heartbeats are emitted on their own schedule so a consumer can
//! tell a quiet stream from a dead transport.

use std::collections::BTreeMap;

use crate::{ChannelMetadata, ChannelValue, FieldSet, SchemaVersion, Timestamp};

/// Identity of a stream, issued monotonically by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct StreamId(pub u64);

impl core::fmt::Display for StreamId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Which flush cycle produced a change-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FlushKind {
    Monitored,
    Polled,
}

/// Activity of one channel within a flush window.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelUpdate {
    /// Fields the consumer asked to see for this channel.
    pub fields: FieldSet,

    /// Metadata, present only when it changed within the window.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub metadata: Option<ChannelMetadata>,

    /// Filtered values, oldest first.
    pub values: Vec<ChannelValue>,
}

impl ChannelUpdate {
    /// An update carrying only values, with the default field set.
    pub fn with_values(values: Vec<ChannelValue>) -> Self {
        Self {
            values,
            ..Default::default()
        }
    }

    /// True when neither values nor metadata changed.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.metadata.is_none()
    }
}

/// The result of one flush of one stream.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChangeSet {
    /// Schema version for forward compatibility.
    pub version: SchemaVersion,

    pub stream: StreamId,

    pub kind: FlushKind,

    /// Upper bound of the flush window.
    pub timestamp: Timestamp,

    /// Updates keyed by the consumer-facing channel key.
    pub channels: BTreeMap<String, ChannelUpdate>,
}

impl ChangeSet {
    /// Create a builder for a change-set.
    pub fn builder(stream: StreamId, kind: FlushKind) -> ChangeSetBuilder {
        ChangeSetBuilder::new(stream, kind)
    }

    /// True when no channel had activity.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Number of channels with activity.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn get(&self, channel: &str) -> Option<&ChannelUpdate> {
        self.channels.get(channel)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ChannelUpdate)> {
        self.channels.iter()
    }

    /// Total values across all channels.
    pub fn total_values(&self) -> usize {
        self.channels.values().map(|u| u.values.len()).sum()
    }
}

/// Builder for [`ChangeSet`].
#[derive(Debug)]
pub struct ChangeSetBuilder {
    stream: StreamId,
    kind: FlushKind,
    timestamp: Option<Timestamp>,
    channels: BTreeMap<String, ChannelUpdate>,
}

impl ChangeSetBuilder {
    pub fn new(stream: StreamId, kind: FlushKind) -> Self {
        Self {
            stream,
            kind,
            timestamp: None,
            channels: BTreeMap::new(),
        }
    }

    /// Set the window upper bound (defaults to now).
    pub fn timestamp(mut self, ts: Timestamp) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Add a channel's update. Empty updates are skipped.
    pub fn channel(mut self, key: impl Into<String>, update: ChannelUpdate) -> Self {
        if !update.is_empty() {
            self.channels.insert(key.into(), update);
        }
        self
    }

    pub fn build(self) -> ChangeSet {
        ChangeSet {
            version: SchemaVersion::current(),
            stream: self.stream,
            kind: self.kind,
            timestamp: self.timestamp.unwrap_or_else(Timestamp::now),
            channels: self.channels,
        }
    }
}

/// An event delivered to a stream consumer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case", tag = "event"))]
pub enum StreamEvent {
    /// Liveness marker, emitted irrespective of channel activity.
    Heartbeat {
        stream: StreamId,
        timestamp: Timestamp,
    },
    Changes(ChangeSet),
}

impl StreamEvent {
    pub fn stream(&self) -> StreamId {
        match self {
            StreamEvent::Heartbeat { stream, .. } => *stream,
            StreamEvent::Changes(changes) => changes.stream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Alarm, Scalar};

    fn value(v: i64) -> ChannelValue {
        ChannelValue::scalar(Scalar::Integer(v), Alarm::NONE, Timestamp(1))
    }

    #[test]
    fn builder_skips_empty_updates() {
        let changes = ChangeSet::builder(StreamId(1), FlushKind::Monitored)
            .timestamp(Timestamp(100))
            .channel("a", ChannelUpdate::with_values(vec![value(1), value(2)]))
            .channel("b", ChannelUpdate::default())
            .channel(
                "c",
                ChannelUpdate {
                    metadata: Some(ChannelMetadata::Unknown),
                    ..Default::default()
                },
            )
            .build();

        assert_eq!(changes.len(), 2);
        assert!(changes.get("b").is_none());
        assert_eq!(changes.total_values(), 2);
        assert_eq!(changes.timestamp, Timestamp(100));
        assert!(changes.version.is_compatible());
    }

    #[test]
    fn event_reports_its_stream() {
        let hb = StreamEvent::Heartbeat {
            stream: StreamId(4),
            timestamp: Timestamp(0),
        };
        let ch = StreamEvent::Changes(ChangeSet::builder(StreamId(5), FlushKind::Polled).build());
        assert_eq!(hb.stream(), StreamId(4));
        assert_eq!(ch.stream(), StreamId(5));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn heartbeat_serializes_with_event_tag() {
        let hb = StreamEvent::Heartbeat {
            stream: StreamId(3),
            timestamp: Timestamp(42),
        };
        let json = serde_json::to_value(&hb).unwrap();
        assert_eq!(json["event"], "heartbeat");
        assert_eq!(json["stream"], 3);
        assert_eq!(json["timestamp"], 42);
    }
}
