//! Error types for the transport layer.

use groupcast_core::WireError;

/// Errors surfaced by transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    #[error("payload of {size} bytes exceeds the transport MTU of {max}")]
    MessageTooLarge { size: usize, max: usize },
    #[error("message needs {needed} fragments, limit is {max}")]
    TooManyFragments { needed: usize, max: usize },
    #[error("short write: sent {sent} of {expected} bytes")]
    ShortWrite { sent: usize, expected: usize },
    #[error("timed out waiting for a message")]
    Timeout,
    #[error("invalid transport url: {0}")]
    InvalidUrl(String),
    #[error("no route to multicast group: {0}")]
    NoMulticastRoute(std::io::Error),
}

impl TransportError {
    /// Whether this error is the receive timeout (the would-block case).
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}
