//! Gateway settings.
//!
//! Settings come from an optional TOML file, overlaid by environment
//! variables prefixed `CHANFLUX_` (nested keys joined with `__`, e.g.
//! `CHANFLUX_SIMULATION__PERIOD_MS=100`). Command-line flags are applied
//! on top by the binary.
//!
//! ```toml
//! log_level = "info"
//! buffer_capacity = 16
//! request_timeout_ms = 5000
//! sink_capacity = 256
//!
//! [simulation]
//! channels = ["sr:current", "sr:lifetime"]
//! flaky = ["sr:lifetime"]
//! period_ms = 250
//!
//! [[streams]]
//! descriptor = '{"monflux": 500, "prec": 2}'
//! channels = ["sr:current", "life=sr:lifetime"]
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use chanflux_core::{
    GatewayConfig, DEFAULT_BUFFER_CAPACITY, DEFAULT_SINK_CAPACITY, MAX_BUFFER_CAPACITY,
};
use chanflux_types::ChannelName;
use config::{Config, Environment, File};
use serde::Deserialize;

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Log filter used when neither `--log-level` nor `RUST_LOG` is set.
    pub log_level: String,
    pub buffer_capacity: usize,
    pub request_timeout_ms: u64,
    pub sink_capacity: usize,
    pub simulation: SimulationSettings,
    pub streams: Vec<StreamSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            request_timeout_ms: 5_000,
            sink_capacity: DEFAULT_SINK_CAPACITY,
            simulation: SimulationSettings::default(),
            streams: Vec::new(),
        }
    }
}

/// The simulated control system the binary serves.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub channels: Vec<String>,
    /// Channels that periodically drop their connection.
    pub flaky: Vec<String>,
    pub period_ms: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            channels: vec![
                "sim:sine".to_string(),
                "sim:ramp".to_string(),
                "sim:counter".to_string(),
            ],
            flaky: Vec::new(),
            period_ms: 500,
        }
    }
}

impl SimulationSettings {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// A stream created at start-up.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Wire descriptor, a JSON object.
    pub descriptor: String,
    /// Member channels, `name` or `alias=name`.
    pub channels: Vec<String>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            descriptor: "{}".to_string(),
            channels: Vec::new(),
        }
    }
}

impl StreamSettings {
    pub fn channel_names(&self) -> Vec<ChannelName> {
        self.channels.iter().map(|spec| parse_channel(spec)).collect()
    }
}

/// Parse `name` or `alias=name`.
pub fn parse_channel(spec: &str) -> ChannelName {
    match spec.split_once('=') {
        Some((alias, name)) if !alias.trim().is_empty() => {
            ChannelName::aliased(name.trim(), alias.trim())
        }
        Some((_, name)) => ChannelName::new(name.trim()),
        None => ChannelName::new(spec.trim()),
    }
}

impl Settings {
    /// Load settings from an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("CHANFLUX")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 || self.buffer_capacity > MAX_BUFFER_CAPACITY {
            bail!("buffer_capacity must be within 1..={}", MAX_BUFFER_CAPACITY);
        }
        if self.sink_capacity == 0 {
            bail!("sink_capacity must be positive");
        }
        if self.request_timeout_ms == 0 {
            bail!("request_timeout_ms must be positive");
        }
        if self.simulation.period_ms == 0 {
            bail!("simulation.period_ms must be positive");
        }
        for (i, stream) in self.streams.iter().enumerate() {
            if stream.channels.is_empty() {
                bail!("streams[{}] names no channels", i);
            }
        }
        Ok(())
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            buffer_capacity: self.buffer_capacity,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            sink_capacity: self.sink_capacity,
        }
    }

    /// Streams to create; one default stream over every simulated channel
    /// when none are configured.
    pub fn effective_streams(&self) -> Vec<StreamSettings> {
        if !self.streams.is_empty() {
            return self.streams.clone();
        }
        vec![StreamSettings {
            descriptor: "{}".to_string(),
            channels: self.simulation.channels.clone(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_file() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
        assert_eq!(settings.simulation.channels.len(), 3);
        assert_eq!(settings.effective_streams().len(), 1);
    }

    #[test]
    fn file_overrides_defaults() {
        let file = write_config(
            r#"
log_level = "debug"
buffer_capacity = 4

[simulation]
channels = ["a", "b"]
period_ms = 100

[[streams]]
descriptor = '{"monflux": 250}'
channels = ["a", "beam=b"]
"#,
        );

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.buffer_capacity, 4);
        assert_eq!(settings.sink_capacity, DEFAULT_SINK_CAPACITY);
        assert_eq!(settings.simulation.period(), Duration::from_millis(100));

        let streams = settings.effective_streams();
        assert_eq!(streams.len(), 1);
        assert_eq!(
            streams[0].channel_names(),
            vec![ChannelName::new("a"), ChannelName::aliased("b", "beam")]
        );
    }

    #[test]
    fn zero_capacity_rejected() {
        let file = write_config("buffer_capacity = 0\n");
        assert!(Settings::load(Some(file.path())).is_err());
    }

    #[test]
    fn oversized_capacity_rejected() {
        let file = write_config("buffer_capacity = 1000000000\n");
        assert!(Settings::load(Some(file.path())).is_err());
    }

    #[test]
    fn stream_without_channels_rejected() {
        let file = write_config("[[streams]]\ndescriptor = '{}'\n");
        assert!(Settings::load(Some(file.path())).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Settings::load(Some(Path::new("/nonexistent/chanflux.toml"))).is_err());
    }

    #[test]
    fn gateway_config_maps_fields() {
        let settings = Settings {
            request_timeout_ms: 750,
            sink_capacity: 8,
            ..Default::default()
        };
        let config = settings.gateway_config();
        assert_eq!(config.request_timeout, Duration::from_millis(750));
        assert_eq!(config.sink_capacity, 8);
    }

    #[test]
    fn channel_specs() {
        assert_eq!(parse_channel(" a "), ChannelName::new("a"));
        assert_eq!(parse_channel("x=a"), ChannelName::aliased("a", "x"));
        assert_eq!(parse_channel("=a"), ChannelName::new("a"));
    }
}
