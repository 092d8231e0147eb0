//! Core traits - seams between the channel core and its collaborators

use crate::core::{Error, Result};

/// Outbound byte channel to the venue (a WebSocket in production)
pub trait Transport: Send + Sync {
    /// Hand one text frame to the transport. Must not block on network I/O.
    fn send(&self, frame: String) -> Result<()>;
}

/// Consumer of inbound text frames, invoked in arrival order
pub trait MessageHandler: Send + Sync {
    /// Authenticate, decode and dispatch one frame.
    fn process_data(&self, data: &str) -> Result<()>;
}

/// Receives live and replayed values of one entity type.
///
/// Called while the owning cache is locked: implementations must not call
/// back into subscribe/unsubscribe of the same cache.
pub trait UpdateListener<V>: Send + Sync {
    fn on_update(&self, value: &V);
}

impl<V, F> UpdateListener<V> for F
where
    F: Fn(&V) + Send + Sync,
{
    fn on_update(&self, value: &V) {
        self(value)
    }
}

/// Told about per-message failures that did not stop the stream
pub trait StreamFailureListener: Send + Sync {
    fn on_stream_failure(&self, error: &Error);
}

impl<F> StreamFailureListener for F
where
    F: Fn(&Error) + Send + Sync,
{
    fn on_stream_failure(&self, error: &Error) {
        self(error)
    }
}
