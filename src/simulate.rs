//! Deterministic signals for the simulated control system.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chanflux_core::SimulatedClient;
use chanflux_types::{
    Alarm, ChannelMetadata, ControlSystemName, Descriptor, ElementType, Reading, Scalar, Severity,
    Timestamp,
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::settings::SimulationSettings;

/// Ticks a flaky channel spends connected out of every cycle.
const FLAKY_UP: u64 = 8;
const FLAKY_CYCLE: u64 = 10;

/// Shape of a simulated channel's signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Sine of the given amplitude completing one cycle every `period` ticks.
    Sine { amplitude: f64, period: u64 },
    /// Sawtooth rising by `step` per tick and wrapping at `wrap`.
    Ramp { step: f64, wrap: f64 },
    /// Integer tick count.
    Counter,
}

impl Waveform {
    /// Waveforms are assigned round-robin by channel position.
    pub fn for_index(index: usize) -> Waveform {
        match index % 3 {
            0 => Waveform::Sine {
                amplitude: 10.0,
                period: 40,
            },
            1 => Waveform::Ramp {
                step: 0.25,
                wrap: 100.0,
            },
            _ => Waveform::Counter,
        }
    }

    pub fn sample(&self, tick: u64) -> Scalar {
        match *self {
            Waveform::Sine { amplitude, period } => {
                let phase = (tick % period.max(1)) as f64 / period.max(1) as f64;
                Scalar::Real(amplitude * (phase * std::f64::consts::TAU).sin())
            }
            Waveform::Ramp { step, wrap } => Scalar::Real((tick as f64 * step) % wrap),
            Waveform::Counter => Scalar::Integer(tick as i64),
        }
    }

    fn metadata(&self) -> ChannelMetadata {
        let descriptor = match *self {
            Waveform::Sine { amplitude, .. } => Descriptor::builder(ElementType::Real)
                .units("V")
                .precision(3)
                .display(-amplitude, amplitude)
                .alarm(-0.9 * amplitude, 0.9 * amplitude),
            Waveform::Ramp { wrap, .. } => Descriptor::builder(ElementType::Real)
                .units("mm")
                .precision(2)
                .display(0.0, wrap),
            Waveform::Counter => Descriptor::builder(ElementType::Integer).units("counts"),
        };
        ChannelMetadata::from(descriptor.build())
    }

    /// Alarm for a sample, raised when it leaves the alarm limits.
    fn alarm(&self, value: &Scalar) -> Alarm {
        match (self, value.as_f64()) {
            (Waveform::Sine { amplitude, .. }, Some(v)) if v.abs() > 0.9 * amplitude => {
                Alarm::new(Severity::Major, 3)
            }
            _ => Alarm::NONE,
        }
    }
}

#[derive(Debug)]
struct SimulatedChannel {
    name: ControlSystemName,
    waveform: Waveform,
    flaky: bool,
}

/// Feeds waveform samples into a [`SimulatedClient`].
#[derive(Debug)]
pub struct Driver {
    client: Arc<SimulatedClient>,
    channels: Vec<SimulatedChannel>,
    tick: AtomicU64,
}

impl Driver {
    /// Register every configured channel with the client.
    pub fn new(client: Arc<SimulatedClient>, settings: &SimulationSettings) -> Self {
        let channels: Vec<_> = settings
            .channels
            .iter()
            .enumerate()
            .map(|(i, name)| SimulatedChannel {
                name: ControlSystemName::new(name.as_str()),
                waveform: Waveform::for_index(i),
                flaky: settings.flaky.contains(name),
            })
            .collect();

        for channel in &channels {
            client.add_channel(channel.name.clone(), reading(&channel.waveform, 0));
            if let Err(e) = client.set_metadata(&channel.name, channel.waveform.metadata()) {
                warn!("metadata for {}: {}", channel.name, e);
            }
        }

        Self {
            client,
            channels,
            tick: AtomicU64::new(1),
        }
    }

    pub fn channel_names(&self) -> Vec<ControlSystemName> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    /// Publish one sample on every channel. Returns the tick published.
    pub fn step(&self) -> u64 {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        for channel in &self.channels {
            if channel.flaky {
                let up = tick % FLAKY_CYCLE < FLAKY_UP;
                if let Err(e) = self.client.set_connected(&channel.name, up) {
                    warn!("toggling {}: {}", channel.name, e);
                }
            }
            if let Err(e) = self
                .client
                .set_value(&channel.name, reading(&channel.waveform, tick))
            {
                warn!("publishing {}: {}", channel.name, e);
            }
        }
        tick
    }

    /// Step every `period` until the returned task is aborted.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let tick = self.step();
                debug!("simulation tick {}", tick);
            }
        })
    }
}

fn reading(waveform: &Waveform, tick: u64) -> Reading {
    let value = waveform.sample(tick);
    Reading::Scalar {
        alarm: waveform.alarm(&value),
        value,
        source_time: Timestamp::now(),
    }
}
