//! Error types for the BLIP engine.

use thiserror::Error;

/// Main error type for all BLIP operations.
///
/// Protocol-level errors (`TruncatedVarint` through `ChecksumMismatch`)
/// are fatal for the connection: the receive loop closes the transport
/// when it encounters one. Handler and dispatch failures never surface
/// here; they are reported to the peer as ERR responses instead.
#[derive(Debug, Error)]
pub enum BlipError {
    /// Varint ended early or ran past its maximum width.
    #[error("truncated varint")]
    TruncatedVarint,

    /// Frame too short or carrying an unknown message type.
    #[error("malformed frame: {0}")]
    BadFrame(&'static str),

    /// Message number that is duplicate, out of order, or unknown.
    #[error("bad message number {number}: {reason}")]
    BadMessageNumber {
        /// Number carried by the offending frame.
        number: u64,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// A frame's type differs from earlier frames of the same message
    /// (and is not the ERR replacement case).
    #[error("inconsistent message type mid-message")]
    InconsistentMessageType,

    /// Final frame arrived before the property block was complete.
    #[error("message ended with incomplete properties")]
    IncompleteProperties,

    /// Compression or decompression failure other than a short buffer.
    #[error("codec error: {0}")]
    Codec(String),

    /// CRC32 trailer did not match the accumulated plaintext checksum.
    #[error("frame checksum mismatch")]
    ChecksumMismatch,

    /// I/O error from the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection is closed; no further messages can be sent.
    #[error("disconnected")]
    Disconnected,

    /// Local API misuse that is detectable at the call site.
    #[error("bad request: {0}")]
    BadRequest(&'static str),
}

impl BlipError {
    /// Whether this error must terminate the connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BlipError::Disconnected | BlipError::BadRequest(_))
    }
}

/// Result type alias using [`BlipError`].
pub type Result<T> = std::result::Result<T, BlipError>;
