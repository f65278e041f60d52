//! Channel values.
//!
//! A [`ChannelValue`] pairs a [`Reading`] with the receipt timestamp the
//! gateway assigned when the value entered its buffer. The reading is a sum
//! type over disconnected, scalar and array states; element types are
//! integer, real or text.

use crate::Timestamp;

/// Alarm severity reported by the control system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Severity {
    #[default]
    NoAlarm,
    Minor,
    Major,
    Invalid,
}

impl Severity {
    /// Lowercase tag used in wire renderings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::NoAlarm => "no_alarm",
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Invalid => "invalid",
        }
    }
}

/// Alarm severity plus the control system's numeric alarm status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Alarm {
    pub severity: Severity,
    pub status: u16,
}

impl Alarm {
    /// No alarm.
    pub const NONE: Alarm = Alarm {
        severity: Severity::NoAlarm,
        status: 0,
    };

    /// The alarm every disconnected value carries.
    pub const DISCONNECTED: Alarm = Alarm {
        severity: Severity::Invalid,
        status: 0,
    };

    pub const fn new(severity: Severity, status: u16) -> Self {
        Self { severity, status }
    }
}

/// Element type of a connected reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ElementType {
    Integer,
    Real,
    Text,
}

/// A single-element payload.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(rename_all = "snake_case", tag = "type", content = "value")
)]
pub enum Scalar {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Scalar {
    pub fn element_type(&self) -> ElementType {
        match self {
            Scalar::Integer(_) => ElementType::Integer,
            Scalar::Real(_) => ElementType::Real,
            Scalar::Text(_) => ElementType::Text,
        }
    }

    /// Numeric view of integer and real payloads.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Integer(v) => Some(*v as f64),
            Scalar::Real(v) => Some(*v),
            Scalar::Text(_) => None,
        }
    }
}

/// A multi-element payload.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(rename_all = "snake_case", tag = "type", content = "value")
)]
pub enum Array {
    Integer(Vec<i64>),
    Real(Vec<f64>),
    Text(Vec<String>),
}

impl Array {
    pub fn element_type(&self) -> ElementType {
        match self {
            Array::Integer(_) => ElementType::Integer,
            Array::Real(_) => ElementType::Real,
            Array::Text(_) => ElementType::Text,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Array::Integer(v) => v.len(),
            Array::Real(v) => v.len(),
            Array::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric view of integer and real payloads.
    pub fn to_f64s(&self) -> Option<Vec<f64>> {
        match self {
            Array::Integer(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Array::Real(v) => Some(v.clone()),
            Array::Text(_) => None,
        }
    }
}

/// The state a channel was observed in.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case", tag = "state"))]
pub enum Reading {
    /// The channel is not connected. Carries no payload.
    Disconnected,
    Scalar {
        value: Scalar,
        alarm: Alarm,
        source_time: Timestamp,
    },
    Array {
        value: Array,
        alarm: Alarm,
        source_time: Timestamp,
    },
}

/// A value observed on a channel, stamped with its receipt time.
///
/// Fields are private: a value is immutable once built. The buffer assigns
/// the receipt timestamp through [`ChannelValue::received`], which produces
/// a new value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelValue {
    received_at: Timestamp,
    #[cfg_attr(feature = "serde", serde(flatten))]
    reading: Reading,
}

impl ChannelValue {
    /// A disconnected placeholder.
    pub fn disconnected() -> Self {
        Self::from_reading(Reading::Disconnected)
    }

    /// A connected single-element value.
    pub fn scalar(value: Scalar, alarm: Alarm, source_time: Timestamp) -> Self {
        Self::from_reading(Reading::Scalar {
            value,
            alarm,
            source_time,
        })
    }

    /// A connected multi-element value.
    pub fn array(value: Array, alarm: Alarm, source_time: Timestamp) -> Self {
        Self::from_reading(Reading::Array {
            value,
            alarm,
            source_time,
        })
    }

    /// Wrap a reading that has not been received yet.
    pub fn from_reading(reading: Reading) -> Self {
        Self {
            received_at: Timestamp::MIN,
            reading,
        }
    }

    /// The same reading stamped with a receipt time.
    pub fn received(self, at: Timestamp) -> Self {
        Self {
            received_at: at,
            reading: self.reading,
        }
    }

    /// The same receipt time carrying a different reading.
    pub fn with_reading(&self, reading: Reading) -> Self {
        Self {
            received_at: self.received_at,
            reading,
        }
    }

    pub fn received_at(&self) -> Timestamp {
        self.received_at
    }

    pub fn reading(&self) -> &Reading {
        &self.reading
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self.reading, Reading::Disconnected)
    }

    /// Alarm of the reading; disconnected values are always `INVALID` / 0.
    pub fn alarm(&self) -> Alarm {
        match &self.reading {
            Reading::Disconnected => Alarm::DISCONNECTED,
            Reading::Scalar { alarm, .. } | Reading::Array { alarm, .. } => *alarm,
        }
    }

    /// Device timestamp, absent while disconnected.
    pub fn source_time(&self) -> Option<Timestamp> {
        match &self.reading {
            Reading::Disconnected => None,
            Reading::Scalar { source_time, .. } | Reading::Array { source_time, .. } => {
                Some(*source_time)
            }
        }
    }

    pub fn element_type(&self) -> Option<ElementType> {
        match &self.reading {
            Reading::Disconnected => None,
            Reading::Scalar { value, .. } => Some(value.element_type()),
            Reading::Array { value, .. } => Some(value.element_type()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_carries_invalid_alarm() {
        let v = ChannelValue::disconnected();
        assert!(!v.is_connected());
        assert_eq!(v.alarm(), Alarm::new(Severity::Invalid, 0));
        assert_eq!(v.source_time(), None);
        assert_eq!(v.element_type(), None);
    }

    #[test]
    fn connected_scalar_accessors() {
        let alarm = Alarm::new(Severity::Minor, 3);
        let v = ChannelValue::scalar(Scalar::Integer(5), alarm, Timestamp(10));
        assert!(v.is_connected());
        assert_eq!(v.alarm(), alarm);
        assert_eq!(v.source_time(), Some(Timestamp(10)));
        assert_eq!(v.element_type(), Some(ElementType::Integer));
    }

    #[test]
    fn received_restamps_without_touching_reading() {
        let v = ChannelValue::scalar(Scalar::Real(1.5), Alarm::NONE, Timestamp(10));
        assert_eq!(v.received_at(), Timestamp::MIN);

        let stamped = v.clone().received(Timestamp(99));
        assert_eq!(stamped.received_at(), Timestamp(99));
        assert_eq!(stamped.reading(), v.reading());
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Scalar::Integer(3).as_f64(), Some(3.0));
        assert_eq!(Scalar::Text("x".into()).as_f64(), None);
        assert_eq!(Array::Integer(vec![1, 2]).to_f64s(), Some(vec![1.0, 2.0]));
        assert_eq!(Array::Text(vec!["a".into()]).to_f64s(), None);
        assert_eq!(Array::Real(vec![1.0, 2.0, 3.0]).len(), 3);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_flat_with_state_tag() {
        let v = ChannelValue::scalar(Scalar::Real(2.5), Alarm::NONE, Timestamp(7)).received(Timestamp(9));
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["state"], "scalar");
        assert_eq!(json["received_at"], 9);
        assert_eq!(json["value"]["type"], "real");
        assert_eq!(json["value"]["value"], 2.5);

        let parsed: ChannelValue = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, v);
    }
}
