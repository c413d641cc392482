//! Frame flag byte layout and the message-type enum.
//!
//! Each frame carries one flag byte after the message-number varint:
//! bits 0–2 hold the message type, the rest are boolean flags. Bit 7 is
//! reserved and must be zero.

use crate::error::{BlipError, Result};

/// Flag bit constants for the per-frame flag byte.
pub mod flags {
    /// Bits 0–2: message type.
    pub const TYPE_MASK: u8 = 0b0000_0111;
    /// Bit 3: frame payload is deflate-compressed.
    pub const COMPRESSED: u8 = 0b0000_1000;
    /// Bit 4: message is urgent (scheduling hint).
    pub const URGENT: u8 = 0b0001_0000;
    /// Bit 5: request does not want a response.
    pub const NO_REPLY: u8 = 0b0010_0000;
    /// Bit 6: more frames of this message follow.
    pub const MORE_COMING: u8 = 0b0100_0000;
    /// Bit 7: reserved, must be zero.
    pub const RESERVED: u8 = 0b1000_0000;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(byte: u8, flag: u8) -> bool {
        byte & flag != 0
    }
}

/// The five BLIP message types carried in flag bits 0–2.
///
/// ACK types are internal housekeeping frames: they report received byte
/// counts for an in-flight message and are never surfaced as messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// A request, expecting a response unless the no-reply flag is set.
    Request = 0,
    /// A successful response; reuses the request's number.
    Response = 1,
    /// An error response; reuses the request's number.
    Error = 2,
    /// Acknowledges received bytes of an incoming request.
    AckRequest = 4,
    /// Acknowledges received bytes of an incoming response.
    AckResponse = 5,
}

impl MessageType {
    /// Extract the message type from a flag byte.
    ///
    /// Values 3, 6 and 7 are unassigned in BLIP 3 and rejected.
    pub fn from_flags(byte: u8) -> Result<Self> {
        match byte & flags::TYPE_MASK {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Response),
            2 => Ok(MessageType::Error),
            4 => Ok(MessageType::AckRequest),
            5 => Ok(MessageType::AckResponse),
            _ => Err(BlipError::BadFrame("unknown message type")),
        }
    }

    /// Whether this is one of the two ACK housekeeping types.
    #[inline]
    pub fn is_ack(self) -> bool {
        matches!(self, MessageType::AckRequest | MessageType::AckResponse)
    }

    /// The ACK type that acknowledges a message of this type.
    pub fn ack_type(self) -> MessageType {
        match self {
            MessageType::Request => MessageType::AckRequest,
            _ => MessageType::AckResponse,
        }
    }

    /// The data message type an ACK of this type refers to.
    pub fn acked_type(self) -> MessageType {
        match self {
            MessageType::AckRequest => MessageType::Request,
            _ => MessageType::Response,
        }
    }

    /// Short uppercase name used in frame logs.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Request => "REQ",
            MessageType::Response => "RES",
            MessageType::Error => "ERR",
            MessageType::AckRequest => "ACK_REQ",
            MessageType::AckResponse => "ACK_RES",
        }
    }
}
