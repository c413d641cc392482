//! Protocol thresholds, frame sizing, and well-known names.

/// Sequential per-direction message identifier. Requests pick the next
/// number; responses reuse the request's number.
pub type MessageNo = u64;

/// A receiver sends an ACK once this many bytes of a single message have
/// arrived without one.
pub const INCOMING_ACK_THRESHOLD: u64 = 50_000;

/// A sender freezes a message (moves it to the icebox) once this many of
/// its sent bytes are unacknowledged.
pub const OUTGOING_ACK_THRESHOLD: u64 = 100_000;

/// Frame payload budget for regular messages when others are queued.
pub const DEFAULT_FRAME_PAYLOAD: usize = 4096;

/// Frame payload budget for urgent messages, or when the outbox is
/// otherwise empty and the message has the pipe to itself.
pub const BIG_FRAME_PAYLOAD: usize = 32_768;

/// WebSocket subprotocol name for BLIP version 3.
pub const SUBPROTOCOL: &str = "BLIP_3";

/// The `Profile` property names the request handler.
pub const PROFILE_PROPERTY: &str = "Profile";

/// Property carrying an error response's domain.
pub const ERROR_DOMAIN_PROPERTY: &str = "Error-Domain";

/// Property carrying an error response's numeric code.
pub const ERROR_CODE_PROPERTY: &str = "Error-Code";

/// Error domain for engine-generated errors.
pub const DOMAIN_BLIP: &str = "BLIP";

/// Reserved error domain for HTTP status passthrough.
pub const DOMAIN_HTTP: &str = "HTTP";

/// Error code: no handler registered for the request's profile.
pub const CODE_NO_HANDLER: i64 = 404;

/// Error code: a handler failed while processing the request.
pub const CODE_HANDLER_FAILED: i64 = 501;

/// Error code: the connection closed with the response outstanding.
pub const CODE_DISCONNECTED: i64 = 502;

/// The subprotocol token to negotiate during the transport handshake:
/// `BLIP_3`, or `BLIP_3+<app>` when an application subprotocol is in use.
pub fn subprotocol_token(app_protocol: Option<&str>) -> String {
    match app_protocol {
        Some(app) => format!("{SUBPROTOCOL}+{app}"),
        None => SUBPROTOCOL.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subprotocol_token() {
        assert_eq!(subprotocol_token(None), "BLIP_3");
        assert_eq!(subprotocol_token(Some("sync")), "BLIP_3+sync");
    }

    #[test]
    fn test_thresholds_ordered() {
        // The sender tolerance must exceed the receiver's ACK cadence or
        // transfers would stall waiting for ACKs that never come.
        assert!(OUTGOING_ACK_THRESHOLD > INCOMING_ACK_THRESHOLD);
    }
}
