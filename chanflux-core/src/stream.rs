//! Stream model: an identity, delivery properties and member channels.

use std::collections::{BTreeMap, HashSet};

use chanflux_types::{ChannelName, StreamId};

use crate::error::{Error, Result};
use crate::properties::{ChannelProperties, StreamProperties};

/// A consumer's bound set of channels. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    id: StreamId,
    properties: StreamProperties,
    channels: BTreeMap<ChannelName, ChannelProperties>,
}

impl Stream {
    /// Create a builder.
    pub fn builder(id: StreamId, properties: StreamProperties) -> StreamBuilder {
        StreamBuilder::new(id, properties)
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn properties(&self) -> &StreamProperties {
        &self.properties
    }

    /// Member channels with their resolved properties.
    pub fn channels(&self) -> impl Iterator<Item = (&ChannelName, &ChannelProperties)> {
        self.channels.iter()
    }

    pub fn channel_properties(&self, channel: &ChannelName) -> Option<&ChannelProperties> {
        self.channels.get(channel)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channels whose mode includes monitoring.
    pub fn monitored_channels(&self) -> Vec<ChannelName> {
        self.channels
            .iter()
            .filter(|(_, props)| props.mode().includes_monitor())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Channels whose mode includes polling.
    pub fn polled_channels(&self) -> Vec<ChannelName> {
        self.channels
            .iter()
            .filter(|(_, props)| props.mode().includes_poll())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Buffer capacity for a member: its own override, else the stream's.
    pub fn capacity_for(&self, channel: &ChannelName) -> usize {
        self.channels
            .get(channel)
            .and_then(ChannelProperties::buffer_capacity)
            .unwrap_or_else(|| self.properties.buffer_capacity())
    }
}

/// Builder for [`Stream`].
///
/// # Example
///
/// ```rust
/// use chanflux_core::{AcquisitionMode, ChannelProperties, Stream, StreamProperties};
/// use chanflux_types::{ChannelName, StreamId};
///
/// let polled = ChannelProperties::builder()
///     .mode(AcquisitionMode::Poll)
///     .build()
///     .unwrap();
///
/// let stream = Stream::builder(StreamId(1), StreamProperties::default())
///     .channel("sr:current")
///     .channel_with("sr:lifetime", polled)
///     .build()
///     .unwrap();
///
/// assert_eq!(stream.monitored_channels(), vec![ChannelName::new("sr:current")]);
/// assert_eq!(stream.polled_channels(), vec![ChannelName::new("sr:lifetime")]);
/// ```
#[derive(Debug)]
pub struct StreamBuilder {
    id: StreamId,
    properties: StreamProperties,
    channels: Vec<(ChannelName, Option<ChannelProperties>)>,
}

impl StreamBuilder {
    pub fn new(id: StreamId, properties: StreamProperties) -> Self {
        Self {
            id,
            properties,
            channels: Vec::new(),
        }
    }

    /// Add a member that uses the stream's channel defaults.
    pub fn channel(mut self, name: impl Into<ChannelName>) -> Self {
        self.channels.push((name.into(), None));
        self
    }

    /// Add a member with its own properties.
    pub fn channel_with(mut self, name: impl Into<ChannelName>, props: ChannelProperties) -> Self {
        self.channels.push((name.into(), Some(props)));
        self
    }

    /// Add several members at once; `None` inherits the stream defaults.
    pub fn channels<I>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = (ChannelName, Option<ChannelProperties>)>,
    {
        self.channels.extend(channels);
        self
    }

    /// Validate and build.
    ///
    /// Fails if no channel is given, a name is empty, or two members share
    /// the same consumer-facing key.
    pub fn build(self) -> Result<Stream> {
        if self.channels.is_empty() {
            return Err(Error::invalid_argument(format!(
                "{} has no channels",
                self.id
            )));
        }

        let mut keys = HashSet::new();
        let mut channels = BTreeMap::new();
        for (name, props) in self.channels {
            if name.control_system_name().is_empty() {
                return Err(Error::invalid_argument("channel name must not be empty"));
            }
            if !keys.insert(name.key().to_string()) {
                return Err(Error::invalid_argument(format!(
                    "channel '{}' appears more than once in {}",
                    name.key(),
                    self.id
                )));
            }
            let props = props.unwrap_or_else(|| self.properties.channel_defaults().clone());
            channels.insert(name, props);
        }

        Ok(Stream {
            id: self.id,
            properties: self.properties,
            channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::AcquisitionMode;

    fn props(mode: AcquisitionMode) -> ChannelProperties {
        ChannelProperties::builder().mode(mode).build().unwrap()
    }

    #[test]
    fn members_inherit_stream_defaults() {
        let defaults = props(AcquisitionMode::PollAndMonitor);
        let stream_props = StreamProperties::builder()
            .channel_defaults(defaults.clone())
            .build()
            .unwrap();

        let stream = Stream::builder(StreamId(1), stream_props)
            .channel("a")
            .channel_with("b", props(AcquisitionMode::Monitor))
            .build()
            .unwrap();

        assert_eq!(stream.channel_properties(&"a".into()), Some(&defaults));
        assert_eq!(stream.monitored_channels().len(), 2);
        assert_eq!(stream.polled_channels(), vec![ChannelName::new("a")]);
    }

    #[test]
    fn capacity_override_wins() {
        let small = ChannelProperties::builder().buffer_capacity(2).build().unwrap();
        let stream = Stream::builder(
            StreamId(1),
            StreamProperties::builder().buffer_capacity(9).build().unwrap(),
        )
        .channel("a")
        .channel_with("b", small)
        .build()
        .unwrap();

        assert_eq!(stream.capacity_for(&"a".into()), 9);
        assert_eq!(stream.capacity_for(&"b".into()), 2);
    }

    #[test]
    fn duplicate_keys_rejected() {
        let err = Stream::builder(StreamId(1), StreamProperties::default())
            .channel("a")
            .channel(ChannelName::aliased("b", "a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn aliases_of_one_channel_allowed() {
        let stream = Stream::builder(StreamId(1), StreamProperties::default())
            .channel(ChannelName::aliased("sr:current", "beam"))
            .channel(ChannelName::aliased("sr:current", "current"))
            .build()
            .unwrap();
        assert_eq!(stream.len(), 2);
    }

    #[test]
    fn empty_stream_rejected() {
        assert!(Stream::builder(StreamId(1), StreamProperties::default())
            .build()
            .is_err());
        assert!(Stream::builder(StreamId(1), StreamProperties::default())
            .channel("")
            .build()
            .is_err());
    }
}
