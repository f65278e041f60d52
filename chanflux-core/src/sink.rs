//! Bounded delivery of stream events to a consumer.

use std::sync::atomic::{AtomicU64, Ordering};

use chanflux_types::StreamEvent;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;

/// Default depth of a consumer's event queue.
pub const DEFAULT_SINK_CAPACITY: usize = 256;

/// Producer side of a consumer's event queue.
///
/// Emission never waits: when the consumer falls behind and the queue is
/// full, the event is dropped and counted. A slow consumer only ever loses
/// its own events.
///
/// # Example
///
/// ```rust
/// use chanflux_core::StreamSink;
/// use chanflux_types::{StreamEvent, StreamId, Timestamp};
///
/// let (sink, mut rx) = StreamSink::channel(1);
/// let beat = StreamEvent::Heartbeat { stream: StreamId(1), timestamp: Timestamp(0) };
///
/// assert!(sink.emit(beat.clone()));
/// assert!(!sink.emit(beat));
/// assert_eq!(sink.dropped(), 1);
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Debug)]
pub struct StreamSink {
    tx: mpsc::Sender<StreamEvent>,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl StreamSink {
    /// Create a sink and the receiver its consumer reads from.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx,
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        };
        (sink, rx)
    }

    /// Queue an event. Returns false if it was dropped.
    pub fn emit(&self, event: StreamEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(event)) => {
                trace!("consumer of {} is behind, dropping event", event.stream());
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// True once the consumer has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
