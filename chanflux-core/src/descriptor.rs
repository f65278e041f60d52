//! Wire-level property descriptors.
//!
//! Consumers describe a stream (or a single channel) with a flat JSON
//! object, e.g. `{"monflux": 500, "daqmode": "poll-and-monitor", "fields": "value;severity"}`.
//! Omitted keys take the documented defaults. Unknown keys and values
//! outside their enumerated set are rejected with an error that quotes the
//! raw descriptor text.
//!
//! | Key        | Scope   | Value                                             |
//! |------------|---------|---------------------------------------------------|
//! | `heartbeat`| stream  | ms, > 0                                           |
//! | `monflux`  | stream  | ms, > 0                                           |
//! | `pollflux` | stream  | ms, > 0                                           |
//! | `daqmode`  | channel | `monitor` \| `poll` \| `poll-and-monitor`         |
//! | `pollint`  | channel | ms, > 0                                           |
//! | `fields`   | channel | `;`-separated field tags                          |
//! | `prec`     | channel | decimal digits, >= 0                              |
//! | `filter`   | channel | `none`, `lastn:N`, `ratelimit:K`, `deadband:D`, `precision:P` |
//! | `buffer`   | both    | capacity, > 0                                     |

use std::time::Duration;

use chanflux_types::{Field, FieldSet};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::filter::FilterSpec;
use crate::properties::{
    AcquisitionMode, ChannelProperties, ChannelPropertiesBuilder, StreamProperties,
};

impl StreamProperties {
    /// Parse a stream descriptor.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chanflux_core::StreamProperties;
    /// use std::time::Duration;
    ///
    /// let props = StreamProperties::from_descriptor(r#"{"monflux": 250, "daqmode": "poll"}"#).unwrap();
    /// assert_eq!(props.monitored_flush_interval(), Duration::from_millis(250));
    ///
    /// assert!(StreamProperties::from_descriptor(r#"{"daqmode": 99}"#).is_err());
    /// ```
    pub fn from_descriptor(raw: &str) -> Result<StreamProperties> {
        let entries = parse_object(raw)?;
        let mut stream = StreamProperties::builder();
        let mut channel = ChannelProperties::builder();

        for (key, value) in &entries {
            match key.as_str() {
                "heartbeat" => stream = stream.heartbeat_interval(millis(raw, key, value)?),
                "monflux" => stream = stream.monitored_flush_interval(millis(raw, key, value)?),
                "pollflux" => stream = stream.polled_flush_interval(millis(raw, key, value)?),
                "buffer" => stream = stream.buffer_capacity(capacity(raw, key, value)?),
                _ => channel = apply_channel_key(raw, channel, key, value)?,
            }
        }

        let defaults = channel.build().map_err(|e| cite(raw, e))?;
        stream
            .channel_defaults(defaults)
            .build()
            .map_err(|e| cite(raw, e))
    }
}

impl ChannelProperties {
    /// Parse a per-channel descriptor. Only channel-scoped keys are accepted.
    pub fn from_descriptor(raw: &str) -> Result<ChannelProperties> {
        let entries = parse_object(raw)?;
        let mut channel = ChannelProperties::builder();

        for (key, value) in &entries {
            channel = match key.as_str() {
                "buffer" => channel.buffer_capacity(capacity(raw, key, value)?),
                _ => apply_channel_key(raw, channel, key, value)?,
            };
        }

        channel.build().map_err(|e| cite(raw, e))
    }
}

fn apply_channel_key(
    raw: &str,
    builder: ChannelPropertiesBuilder,
    key: &str,
    value: &Value,
) -> Result<ChannelPropertiesBuilder> {
    let builder = match key {
        "daqmode" => {
            let mode = value
                .as_str()
                .and_then(AcquisitionMode::from_tag)
                .ok_or_else(|| {
                    invalid(
                        raw,
                        "'daqmode' must be one of monitor, poll, poll-and-monitor",
                    )
                })?;
            builder.mode(mode)
        }
        "pollint" => builder.polling_interval(millis(raw, key, value)?),
        "fields" => builder.fields(fields(raw, value)?),
        "prec" => {
            let digits = integer(raw, key, value)?;
            let digits = u32::try_from(digits)
                .map_err(|_| invalid(raw, "'prec' is out of range"))?;
            builder.precision(digits)
        }
        "filter" => {
            let text = value
                .as_str()
                .ok_or_else(|| invalid(raw, "'filter' must be a string"))?;
            builder.filter(FilterSpec::parse(text).map_err(|e| cite(raw, e))?)
        }
        other => return Err(invalid(raw, format!("unrecognized key '{}'", other))),
    };
    Ok(builder)
}

fn parse_object(raw: &str) -> Result<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(entries)) => Ok(entries),
        Ok(_) => Err(invalid(raw, "descriptor must be a JSON object")),
        Err(e) => Err(invalid(raw, e.to_string())),
    }
}

fn integer(raw: &str, key: &str, value: &Value) -> Result<u64> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| invalid(raw, format!("'{}' must be a non-negative integer", key)))
}

/// Out-of-range values saturate so the builder's range check rejects them.
fn capacity(raw: &str, key: &str, value: &Value) -> Result<usize> {
    Ok(usize::try_from(integer(raw, key, value)?).unwrap_or(usize::MAX))
}

fn millis(raw: &str, key: &str, value: &Value) -> Result<Duration> {
    let ms = integer(raw, key, value)?;
    if ms == 0 {
        return Err(invalid(raw, format!("'{}' must be positive", key)));
    }
    Ok(Duration::from_millis(ms))
}

fn fields(raw: &str, value: &Value) -> Result<FieldSet> {
    let text = value
        .as_str()
        .ok_or_else(|| invalid(raw, "'fields' must be a ;-separated string"))?;

    let mut set = Vec::new();
    for tag in text.split(';').map(str::trim).filter(|t| !t.is_empty()) {
        let field =
            Field::from_tag(tag).ok_or_else(|| invalid(raw, format!("unknown field '{}'", tag)))?;
        set.push(field);
    }
    if set.is_empty() {
        return Err(invalid(raw, "'fields' names no field"));
    }
    Ok(FieldSet::new(set))
}

fn invalid(raw: &str, reason: impl std::fmt::Display) -> Error {
    Error::invalid_argument(format!("descriptor {}: {}", raw, reason))
}

fn cite(raw: &str, err: Error) -> Error {
    match err {
        Error::InvalidArgument(reason) => invalid(raw, reason),
        other => other,
    }
}
