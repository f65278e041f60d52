//! Error types for the gateway core.

use std::time::Duration;

use chanflux_types::ControlSystemName;
use thiserror::Error;

/// Errors surfaced by gateway operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Empty names, malformed descriptors, out-of-range filter parameters.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Double-stop, operating on a closed manager, re-activating a closed stream.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An upstream get/put/connect exceeded its deadline.
    #[error("request to {channel} timed out after {after:?}")]
    Timeout {
        channel: ControlSystemName,
        after: Duration,
    },

    /// Upstream channel access failed for a reason other than a timeout.
    #[error("transport failure on {channel}: {message}")]
    Transport {
        channel: ControlSystemName,
        message: String,
    },

    /// A query referenced something never registered.
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// True for upstream connectivity failures, which are recovered locally
    /// by degrading the channel to disconnected.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Transport { .. })
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;
