/// Error types for the reliable messaging layer
///
/// Transient loss, duplicates and capacity exhaustion are not errors at all;
/// they are handled inside the connection. What remains here is I/O,
/// malformed datagrams, misuse of the API and bad configuration.
use std::io;

use thiserror::Error;

/// Result type alias for rudp operations
pub type Result<T> = std::result::Result<T, RudpError>;

/// Error enumeration for the messaging layer
#[derive(Error, Debug)]
pub enum RudpError {
    /// I/O error (socket send/receive failure)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Datagram could not be parsed as a packet
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Packet trailer CRC32 does not match its contents
    #[error("Checksum mismatch: expected CRC32 {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Message frame cannot fit in an empty packet
    #[error("Message too large: {size} bytes, packet body holds {capacity}")]
    MessageTooLarge { size: usize, capacity: usize },

    /// Channel index outside the configured channel table
    #[error("Invalid channel index: {0}")]
    InvalidChannel(u8),

    /// Configuration value out of range
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Message kind reserved for connection-internal traffic
    #[error("Message kind {0:#x} is reserved")]
    ReservedKind(u8),

    /// Operation requires a connection bound to a peer slot
    #[error("Connection is not bound to a peer")]
    NotBound,
}

impl RudpError {
    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
