//! Protocol constants, flag layout, and message types.
//!
//! The wire format itself is tiny: every frame is
//! `varint message-number ∥ u8 flags ∥ payload`. Everything else —
//! payload structure, CRC trailers, ACK bodies — is defined by the
//! message model and codecs layered on top.

mod constants;
mod wire_format;

pub use constants::{
    subprotocol_token, MessageNo, BIG_FRAME_PAYLOAD, CODE_DISCONNECTED, CODE_HANDLER_FAILED,
    CODE_NO_HANDLER, DEFAULT_FRAME_PAYLOAD, DOMAIN_BLIP, DOMAIN_HTTP, ERROR_CODE_PROPERTY,
    ERROR_DOMAIN_PROPERTY, INCOMING_ACK_THRESHOLD, OUTGOING_ACK_THRESHOLD, PROFILE_PROPERTY,
    SUBPROTOCOL,
};
pub use wire_format::{flags, MessageType};
