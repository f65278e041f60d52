//! Acquisition configuration for channels and streams.
//!
//! Both [`ChannelProperties`] and [`StreamProperties`] are immutable once
//! built; builders validate at construction so nothing downstream has to.

use std::time::Duration;

use chanflux_types::FieldSet;

use crate::error::{Error, Result};
use crate::filter::FilterSpec;

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(15_000);

/// Default interval between monitored-value flushes.
pub const DEFAULT_MONITORED_FLUSH: Duration = Duration::from_millis(1_000);

/// Default interval between polled-value flushes.
pub const DEFAULT_POLLED_FLUSH: Duration = Duration::from_millis(1_000);

/// Default upstream polling interval.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(1_000);

/// Default per-channel buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 16;

/// Largest per-channel buffer capacity a stream may request.
pub const MAX_BUFFER_CAPACITY: usize = 65_536;

/// How values are acquired from the control system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AcquisitionMode {
    /// Subscription-based push delivery.
    #[default]
    Monitor,
    /// Scheduled synchronous reads.
    Poll,
    PollAndMonitor,
}

impl AcquisitionMode {
    pub fn includes_monitor(&self) -> bool {
        matches!(self, AcquisitionMode::Monitor | AcquisitionMode::PollAndMonitor)
    }

    pub fn includes_poll(&self) -> bool {
        matches!(self, AcquisitionMode::Poll | AcquisitionMode::PollAndMonitor)
    }

    /// Parse the wire tag: `monitor`, `poll` or `poll-and-monitor`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "monitor" => Some(AcquisitionMode::Monitor),
            "poll" => Some(AcquisitionMode::Poll),
            "poll-and-monitor" => Some(AcquisitionMode::PollAndMonitor),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            AcquisitionMode::Monitor => "monitor",
            AcquisitionMode::Poll => "poll",
            AcquisitionMode::PollAndMonitor => "poll-and-monitor",
        }
    }
}

/// Acquisition configuration of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelProperties {
    mode: AcquisitionMode,
    polling_interval: Option<Duration>,
    fields: FieldSet,
    precision: Option<u32>,
    filter: FilterSpec,
    buffer_capacity: Option<usize>,
}

impl ChannelProperties {
    /// Create a builder.
    pub fn builder() -> ChannelPropertiesBuilder {
        ChannelPropertiesBuilder::new()
    }

    pub fn mode(&self) -> AcquisitionMode {
        self.mode
    }

    /// Polling interval; `None` for monitor-only channels.
    pub fn polling_interval(&self) -> Option<Duration> {
        self.polling_interval
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Decimal digits numeric values are rounded to; `None` is unrestricted.
    pub fn precision(&self) -> Option<u32> {
        self.precision
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    /// Buffer capacity override; `None` inherits the stream's.
    pub fn buffer_capacity(&self) -> Option<usize> {
        self.buffer_capacity
    }

    /// A builder seeded with these properties.
    pub fn to_builder(&self) -> ChannelPropertiesBuilder {
        ChannelPropertiesBuilder {
            mode: self.mode,
            polling_interval: self.polling_interval,
            fields: self.fields.clone(),
            precision: self.precision,
            filter: self.filter.clone(),
            buffer_capacity: self.buffer_capacity,
        }
    }
}

/// Monitor mode, default fields, no filter, inherited capacity.
impl Default for ChannelProperties {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::Monitor,
            polling_interval: None,
            fields: FieldSet::default(),
            precision: None,
            filter: FilterSpec::None,
            buffer_capacity: None,
        }
    }
}

/// Builder for [`ChannelProperties`].
#[derive(Debug, Clone)]
pub struct ChannelPropertiesBuilder {
    mode: AcquisitionMode,
    polling_interval: Option<Duration>,
    fields: FieldSet,
    precision: Option<u32>,
    filter: FilterSpec,
    buffer_capacity: Option<usize>,
}

impl ChannelPropertiesBuilder {
    pub fn new() -> Self {
        Self {
            mode: AcquisitionMode::Monitor,
            polling_interval: None,
            fields: FieldSet::default(),
            precision: None,
            filter: FilterSpec::None,
            buffer_capacity: None,
        }
    }

    pub fn mode(mut self, mode: AcquisitionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = Some(interval);
        self
    }

    pub fn fields(mut self, fields: FieldSet) -> Self {
        self.fields = fields;
        self
    }

    pub fn precision(mut self, digits: u32) -> Self {
        self.precision = Some(digits);
        self
    }

    pub fn filter(mut self, filter: FilterSpec) -> Self {
        self.filter = filter;
        self
    }

    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    /// Validate and build.
    ///
    /// Polling modes require a positive interval, which defaults to
    /// [`DEFAULT_POLLING_INTERVAL`] when unset. Monitor-only channels drop
    /// any interval given.
    pub fn build(self) -> Result<ChannelProperties> {
        let polling_interval = if self.mode.includes_poll() {
            let interval = self.polling_interval.unwrap_or(DEFAULT_POLLING_INTERVAL);
            if interval.is_zero() {
                return Err(Error::invalid_argument(format!(
                    "polling interval must be positive for {} mode",
                    self.mode.tag()
                )));
            }
            Some(interval)
        } else {
            None
        };

        if let Some(capacity) = self.buffer_capacity {
            check_capacity(capacity)?;
        }

        if self.fields.is_empty() {
            return Err(Error::invalid_argument("at least one field is required"));
        }

        self.filter.validate()?;

        Ok(ChannelProperties {
            mode: self.mode,
            polling_interval,
            fields: self.fields,
            precision: self.precision,
            filter: self.filter,
            buffer_capacity: self.buffer_capacity,
        })
    }
}

impl Default for ChannelPropertiesBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Delivery configuration of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamProperties {
    heartbeat: Duration,
    monitored_flush: Duration,
    polled_flush: Duration,
    buffer_capacity: usize,
    channel_defaults: ChannelProperties,
}

impl StreamProperties {
    /// Create a builder.
    pub fn builder() -> StreamPropertiesBuilder {
        StreamPropertiesBuilder::new()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat
    }

    pub fn monitored_flush_interval(&self) -> Duration {
        self.monitored_flush
    }

    pub fn polled_flush_interval(&self) -> Duration {
        self.polled_flush
    }

    /// Buffer capacity for member channels without an override.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Properties applied to member channels unless overridden.
    pub fn channel_defaults(&self) -> &ChannelProperties {
        &self.channel_defaults
    }
}

impl Default for StreamProperties {
    fn default() -> Self {
        Self {
            heartbeat: DEFAULT_HEARTBEAT,
            monitored_flush: DEFAULT_MONITORED_FLUSH,
            polled_flush: DEFAULT_POLLED_FLUSH,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            channel_defaults: ChannelProperties::default(),
        }
    }
}

/// Builder for [`StreamProperties`].
#[derive(Debug, Clone, Default)]
pub struct StreamPropertiesBuilder {
    heartbeat: Option<Duration>,
    monitored_flush: Option<Duration>,
    polled_flush: Option<Duration>,
    buffer_capacity: Option<usize>,
    channel_defaults: Option<ChannelProperties>,
}

impl StreamPropertiesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    pub fn monitored_flush_interval(mut self, interval: Duration) -> Self {
        self.monitored_flush = Some(interval);
        self
    }

    pub fn polled_flush_interval(mut self, interval: Duration) -> Self {
        self.polled_flush = Some(interval);
        self
    }

    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    pub fn channel_defaults(mut self, defaults: ChannelProperties) -> Self {
        self.channel_defaults = Some(defaults);
        self
    }

    pub fn build(self) -> Result<StreamProperties> {
        let heartbeat = self.heartbeat.unwrap_or(DEFAULT_HEARTBEAT);
        let monitored_flush = self.monitored_flush.unwrap_or(DEFAULT_MONITORED_FLUSH);
        let polled_flush = self.polled_flush.unwrap_or(DEFAULT_POLLED_FLUSH);
        let buffer_capacity = self.buffer_capacity.unwrap_or(DEFAULT_BUFFER_CAPACITY);

        for (what, interval) in [
            ("heartbeat", heartbeat),
            ("monitored flush", monitored_flush),
            ("polled flush", polled_flush),
        ] {
            if interval.is_zero() {
                return Err(Error::invalid_argument(format!(
                    "{} interval must be positive",
                    what
                )));
            }
        }
        check_capacity(buffer_capacity)?;

        Ok(StreamProperties {
            heartbeat,
            monitored_flush,
            polled_flush,
            buffer_capacity,
            channel_defaults: self.channel_defaults.unwrap_or_default(),
        })
    }
}

fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 || capacity > MAX_BUFFER_CAPACITY {
        return Err(Error::invalid_argument(format!(
            "buffer capacity {} is outside 1..={}",
            capacity, MAX_BUFFER_CAPACITY
        )));
    }
    Ok(())
}
