//! Static descriptive attributes of a channel.

use crate::ElementType;

/// A closed range of values.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Limits {
    pub low: f64,
    pub high: f64,
}

impl Limits {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

/// Channel metadata. Changes far less often than the value.
///
/// [`ChannelMetadata::Unknown`] stands in until the control system has
/// delivered real metadata.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case", tag = "state"))]
pub enum ChannelMetadata {
    #[default]
    Unknown,
    Known(Descriptor),
}

impl ChannelMetadata {
    pub fn is_unknown(&self) -> bool {
        matches!(self, ChannelMetadata::Unknown)
    }

    pub fn descriptor(&self) -> Option<&Descriptor> {
        match self {
            ChannelMetadata::Unknown => None,
            ChannelMetadata::Known(d) => Some(d),
        }
    }
}

impl From<Descriptor> for ChannelMetadata {
    fn from(d: Descriptor) -> Self {
        ChannelMetadata::Known(d)
    }
}

/// Type, units and limits of a channel.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Descriptor {
    pub element_type: ElementType,
    /// Number of elements; 1 for scalars.
    pub count: usize,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub units: Option<String>,
    /// Display precision advertised by the control system.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub precision: Option<u16>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub display: Option<Limits>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub warning: Option<Limits>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub alarm: Option<Limits>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub control: Option<Limits>,
}

impl Descriptor {
    /// Create a builder for a descriptor of the given element type.
    pub fn builder(element_type: ElementType) -> DescriptorBuilder {
        DescriptorBuilder::new(element_type)
    }
}

/// Builder for [`Descriptor`].
#[derive(Debug)]
pub struct DescriptorBuilder {
    inner: Descriptor,
}

impl DescriptorBuilder {
    pub fn new(element_type: ElementType) -> Self {
        Self {
            inner: Descriptor {
                element_type,
                count: 1,
                units: None,
                precision: None,
                display: None,
                warning: None,
                alarm: None,
                control: None,
            },
        }
    }

    pub fn count(mut self, count: usize) -> Self {
        self.inner.count = count;
        self
    }

    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.inner.units = Some(units.into());
        self
    }

    pub fn precision(mut self, precision: u16) -> Self {
        self.inner.precision = Some(precision);
        self
    }

    pub fn display(mut self, low: f64, high: f64) -> Self {
        self.inner.display = Some(Limits::new(low, high));
        self
    }

    pub fn warning(mut self, low: f64, high: f64) -> Self {
        self.inner.warning = Some(Limits::new(low, high));
        self
    }

    pub fn alarm(mut self, low: f64, high: f64) -> Self {
        self.inner.alarm = Some(Limits::new(low, high));
        self
    }

    pub fn control(mut self, low: f64, high: f64) -> Self {
        self.inner.control = Some(Limits::new(low, high));
        self
    }

    pub fn build(self) -> Descriptor {
        self.inner
    }
}
