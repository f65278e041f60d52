//! Value filter pipeline.
//!
//! Filters reduce, sample or round the ordered value sequence a flush pulls
//! from the buffer for one channel. They are pure functions over the
//! sequence: no shared state, no blocking, order preserved.
//!
//! A channel's [`Pipeline`] is its selection filter ([`FilterSpec`])
//! followed by a precision stage when the channel sets a precision.
//!
//! # Filter kinds
//!
//! - `None`: identity
//! - `LastN(n)`: the most recent `n` entries
//! - `RateLimiter { cycle }`: every `cycle`-th entry starting with the first
//! - `Deadband { delta }`: drop numeric entries closer than `delta` to the
//!   last retained entry
//! - `Precision { digits }`: round real values half-up in decimal

use chanflux_types::{Array, ChannelValue, Reading, Scalar};

use crate::error::{Error, Result};
use crate::properties::ChannelProperties;

/// Filter configuration, validated when a channel's properties are built.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FilterSpec {
    #[default]
    None,
    LastN(usize),
    RateLimiter {
        cycle: usize,
    },
    Deadband {
        delta: f64,
    },
    Precision {
        digits: u32,
    },
}

impl FilterSpec {
    /// Reject out-of-range parameters.
    pub fn validate(&self) -> Result<()> {
        match self {
            FilterSpec::LastN(0) => Err(Error::invalid_argument("lastn count must be positive")),
            FilterSpec::RateLimiter { cycle: 0 } => {
                Err(Error::invalid_argument("ratelimit cycle must be positive"))
            }
            FilterSpec::Deadband { delta } if !delta.is_finite() || *delta < 0.0 => Err(
                Error::invalid_argument("deadband delta must be a finite non-negative number"),
            ),
            _ => Ok(()),
        }
    }

    /// Parse `none`, `lastn:N`, `ratelimit:K`, `deadband:D` or `precision:P`.
    pub fn parse(text: &str) -> Result<FilterSpec> {
        let text = text.trim();
        let (kind, arg) = match text.split_once(':') {
            Some((kind, arg)) => (kind.trim(), Some(arg.trim())),
            None => (text, None),
        };

        let spec = match (kind.to_ascii_lowercase().as_str(), arg) {
            ("none", None) => FilterSpec::None,
            ("lastn", Some(arg)) => FilterSpec::LastN(count(kind, arg)?),
            ("ratelimit", Some(arg)) => FilterSpec::RateLimiter {
                cycle: count(kind, arg)?,
            },
            ("deadband", Some(arg)) => FilterSpec::Deadband {
                delta: arg.parse::<f64>().map_err(|_| {
                    Error::invalid_argument(format!("deadband delta '{}' is not a number", arg))
                })?,
            },
            ("precision", Some(arg)) => FilterSpec::Precision {
                digits: arg.parse::<u32>().map_err(|_| {
                    Error::invalid_argument(format!(
                        "precision '{}' must be a non-negative integer",
                        arg
                    ))
                })?,
            },
            _ => {
                return Err(Error::invalid_argument(format!(
                    "unrecognized filter '{}'",
                    text
                )))
            }
        };

        spec.validate()?;
        Ok(spec)
    }
}

fn count(kind: &str, arg: &str) -> Result<usize> {
    match arg.parse::<i64>() {
        Ok(n) if n > 0 => Ok(n as usize),
        _ => Err(Error::invalid_argument(format!(
            "{} parameter '{}' must be a positive integer",
            kind, arg
        ))),
    }
}

/// The filter stages applied to one channel's values.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    selection: FilterSpec,
    precision: Option<u32>,
}

impl Pipeline {
    /// Build a pipeline, validating the selection filter.
    pub fn new(selection: FilterSpec, precision: Option<u32>) -> Result<Self> {
        selection.validate()?;
        Ok(Self {
            selection,
            precision,
        })
    }

    /// The pipeline configured by a channel's properties.
    pub fn for_channel(props: &ChannelProperties) -> Self {
        Self {
            selection: props.filter().clone(),
            precision: props.precision(),
        }
    }

    /// Run the values (oldest first) through every stage.
    pub fn apply(&self, values: Vec<ChannelValue>) -> Vec<ChannelValue> {
        let selected = match &self.selection {
            FilterSpec::None => values,
            FilterSpec::LastN(n) => last_n(values, *n),
            FilterSpec::RateLimiter { cycle } => rate_limit(values, *cycle),
            FilterSpec::Deadband { delta } => deadband(values, *delta),
            FilterSpec::Precision { digits } => limit_precision(values, *digits),
        };

        match self.precision {
            Some(digits) => limit_precision(selected, digits),
            None => selected,
        }
    }
}

/// Keep the most recent `n` entries.
pub fn last_n(mut values: Vec<ChannelValue>, n: usize) -> Vec<ChannelValue> {
    if values.len() > n {
        values.drain(..values.len() - n);
    }
    values
}

/// Keep entries at positions `0, cycle, 2 * cycle, ...`.
pub fn rate_limit(values: Vec<ChannelValue>, cycle: usize) -> Vec<ChannelValue> {
    let cycle = cycle.max(1);
    values
        .into_iter()
        .enumerate()
        .filter(|(i, _)| i % cycle == 0)
        .map(|(_, v)| v)
        .collect()
}

/// Drop numeric entries whose distance from the last retained entry is
/// strictly less than `delta`. The first entry is always retained, as is
/// anything non-numeric or of a different shape than the last retained.
pub fn deadband(values: Vec<ChannelValue>, delta: f64) -> Vec<ChannelValue> {
    let mut retained: Vec<ChannelValue> = Vec::with_capacity(values.len());
    for value in values {
        let keep = match retained.last() {
            None => true,
            Some(last) => match numeric_distance(last.reading(), value.reading()) {
                Some(distance) => distance >= delta,
                None => true,
            },
        };
        if keep {
            retained.push(value);
        }
    }
    retained
}

fn numeric_distance(a: &Reading, b: &Reading) -> Option<f64> {
    match (a, b) {
        (Reading::Scalar { value: x, .. }, Reading::Scalar { value: y, .. }) => {
            Some((x.as_f64()? - y.as_f64()?).abs())
        }
        (Reading::Array { value: x, .. }, Reading::Array { value: y, .. }) => {
            let (x, y) = (x.to_f64s()?, y.to_f64s()?);
            if x.len() != y.len() {
                return None;
            }
            Some(
                x.iter()
                    .zip(&y)
                    .map(|(a, b)| (a - b).abs())
                    .fold(0.0, f64::max),
            )
        }
        _ => None,
    }
}

/// Round real scalars and real arrays to `digits` decimals, half-up.
/// Integer and text values pass through unchanged.
pub fn limit_precision(values: Vec<ChannelValue>, digits: u32) -> Vec<ChannelValue> {
    values
        .into_iter()
        .map(|value| match value.reading() {
            Reading::Scalar {
                value: Scalar::Real(x),
                alarm,
                source_time,
            } => value.with_reading(Reading::Scalar {
                value: Scalar::Real(round_half_up(*x, digits)),
                alarm: *alarm,
                source_time: *source_time,
            }),
            Reading::Array {
                value: Array::Real(xs),
                alarm,
                source_time,
            } => value.with_reading(Reading::Array {
                value: Array::Real(xs.iter().map(|x| round_half_up(*x, digits)).collect()),
                alarm: *alarm,
                source_time: *source_time,
            }),
            _ => value,
        })
        .collect()
}

/// Round to `digits` decimals, half away from zero, on the shortest decimal
/// representation of `value` rather than its binary expansion.
pub fn round_half_up(value: f64, digits: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }

    // f64's Display never uses exponent notation.
    let text = value.abs().to_string();
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let digits = digits as usize;
    if frac_part.len() <= digits {
        return value;
    }

    let round_up = frac_part.as_bytes()[digits] >= b'5';
    let mut kept: Vec<u8> = int_part
        .bytes()
        .chain(frac_part[..digits].bytes())
        .map(|b| b - b'0')
        .collect();
    let mut int_len = int_part.len();

    if round_up {
        let mut i = kept.len();
        loop {
            if i == 0 {
                kept.insert(0, 1);
                int_len += 1;
                break;
            }
            i -= 1;
            if kept[i] == 9 {
                kept[i] = 0;
            } else {
                kept[i] += 1;
                break;
            }
        }
    }

    let mut rounded = String::with_capacity(kept.len() + 1);
    for (i, d) in kept.iter().enumerate() {
        if i == int_len {
            rounded.push('.');
        }
        rounded.push((b'0' + d) as char);
    }

    let magnitude = rounded.parse::<f64>().unwrap_or(value.abs());
    if value.is_sign_negative() {
        -magnitude
    } else {
        magnitude
    }
}
