//! # chanflux-types
//!
//! Core data model for streaming control-system channels. This crate defines
//! the values, metadata and change-set types exchanged between the upstream
//! control-system client, the gateway's buffer, and downstream consumers.
//!
//! ## Design Goals
//!
//! - **Sum types over hierarchies**: a [`ChannelValue`] is a tagged variant
//!   (disconnected / scalar / array), never a downcast
//! - **Immutable values**: connected readings are frozen once built
//! - **Optional serialization**: enable the `serde` feature for JSON and friends
//! - **Versioned change-sets**: emitted change-sets carry a schema version
//!
//! ## Example
//!
//! ```rust
//! use chanflux_types::{Alarm, ChangeSet, ChannelUpdate, ChannelValue, FlushKind, Scalar, StreamId, Timestamp};
//!
//! let value = ChannelValue::scalar(Scalar::Real(21.5), Alarm::NONE, Timestamp::from_millis(1_700_000_000_000));
//!
//! let changes = ChangeSet::builder(StreamId(7), FlushKind::Monitored)
//!     .channel("sector1:temperature", ChannelUpdate::with_values(vec![value]))
//!     .build();
//!
//! assert_eq!(changes.total_values(), 1);
//! ```
//!
//! ## Schema Version
//!
//! The current schema version is **1**.

mod event;
mod field;
mod metadata;
mod name;
mod time;
mod value;
mod version;

pub use event::*;
pub use field::*;
pub use metadata::*;
pub use name::*;
pub use time::*;
pub use value::*;
pub use version::*;

/// Current schema version.
///
/// Increment this when making breaking changes to the change-set format.
pub const SCHEMA_VERSION: u32 = 1;
