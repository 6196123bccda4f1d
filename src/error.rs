//! Error types for sodibus-client.

use thiserror::Error;

/// Main error type for all SODIBus client operations.
#[derive(Debug, Error)]
pub enum SodibusError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame stream lost alignment; the next byte was not the sync marker.
    ///
    /// Recoverable: decode again starting at the following byte.
    #[error("frame stream desynchronized")]
    Desync,

    /// Handshake did not produce a valid Ready message.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (unknown frame type, oversized payload, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No response arrived for an invocation within the timeout window.
    #[error("invocation timed out")]
    InvocationTimeout,

    /// The client has been closed.
    #[error("client closed")]
    Closed,
}

/// Result type alias using SodibusError.
pub type Result<T> = std::result::Result<T, SodibusError>;
