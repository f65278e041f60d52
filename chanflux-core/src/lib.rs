//! # chanflux-core
//!
//! Gateway core for streaming control-system channels to many consumers.
//!
//! Any number of streams may reference the same control-system channel; the
//! gateway holds exactly one upstream subscription (or poll task) per
//! channel, buffers the most recent values per channel, and periodically
//! flushes each stream's share of the buffer through its filter pipeline
//! into the stream's consumer queue.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chanflux_core::{Gateway, GatewayConfig, SimulatedClient};
//! use chanflux_types::{ChannelName, Reading};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Arc::new(SimulatedClient::new());
//!     client.add_channel("sr:current", Reading::Disconnected);
//!
//!     let gateway = Gateway::new(client, GatewayConfig::default());
//!
//!     // Monitor sr:current, flush every 500ms, keep two decimals
//!     let id = gateway
//!         .create_stream_from_descriptor(
//!             r#"{"monflux": 500, "prec": 2}"#,
//!             [ChannelName::new("sr:current")],
//!         )
//!         .await
//!         .unwrap();
//!
//!     let mut events = gateway.take_receiver(id).unwrap();
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! }
//! ```
//!
//! ## Components
//!
//! - [`InterestManager`]: reference-counted upstream subscriptions and polls
//! - [`ChannelBuffer`]: bounded, time-indexed, per-channel sharded store
//! - [`Pipeline`]: last-N, rate-limit, deadband and precision filters
//! - [`StreamAggregator`]: per-stream monitored/polled flushes and heartbeats
//! - [`Gateway`]: stream creation and teardown for outward transports

mod aggregator;
mod buffer;
mod client;
mod descriptor;
mod error;
pub mod filter;
mod gateway;
mod interest;
mod properties;
mod simulated;
mod sink;
mod stream;

pub use aggregator::{AggregatorStats, StreamAggregator, StreamState};
pub use buffer::ChannelBuffer;
pub use client::{ChannelEvent, ControlSystemClient, EventSink, SubscriptionHandle};
pub use error::{Error, Result};
pub use filter::{FilterSpec, Pipeline};
pub use gateway::{Gateway, GatewayConfig, PolledChanges};
pub use interest::{Interest, InterestManager, DEFAULT_REQUEST_TIMEOUT};
pub use properties::{
    AcquisitionMode, ChannelProperties, ChannelPropertiesBuilder, StreamProperties,
    StreamPropertiesBuilder, DEFAULT_BUFFER_CAPACITY, DEFAULT_HEARTBEAT, DEFAULT_MONITORED_FLUSH,
    DEFAULT_POLLED_FLUSH, DEFAULT_POLLING_INTERVAL, MAX_BUFFER_CAPACITY,
};
pub use simulated::SimulatedClient;
pub use sink::{StreamSink, DEFAULT_SINK_CAPACITY};
pub use stream::{Stream, StreamBuilder};
