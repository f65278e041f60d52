//! # chanflux
//!
//! Gateway binary support: settings, the simulated signal driver and
//! event rendering.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  events   ┌──────────────┐  values   ┌──────────────┐
//! │  simulated   │──────────▶│   interest   │──────────▶│   channel    │
//! │   client     │◀──────────│   manager    │           │   buffer     │
//! └──────▲───────┘ subscribe └──────▲───────┘           └──────┬───────┘
//!        │ samples                  │ start/stop               │ flush
//! ┌──────┴───────┐           ┌──────┴───────┐           ┌──────▼───────┐
//! │    driver    │           │   gateway    │──────────▶│  aggregator  │──▶ stdout
//! └──────────────┘           └──────────────┘           └──────────────┘
//! ```
//!
//! - **[`settings`]**: TOML + environment configuration
//! - **[`simulate`]**: deterministic waveforms feeding the simulated client
//! - **[`output`]**: JSON-lines rendering of stream events
//! - **[`duration`]**: human-readable durations for the command line
//!
//! ## Usage
//!
//! ```bash
//! # Three simulated channels, one default stream
//! chanflux
//!
//! # Custom stream over two channels for ten seconds
//! chanflux -C sr:current -C sr:lifetime -d '{"monflux": 250, "prec": 2}' --run-for 10s
//!
//! # Configuration file
//! chanflux --config chanflux.toml
//! ```

pub mod duration;
pub mod output;
pub mod settings;
pub mod simulate;

pub use settings::Settings;
