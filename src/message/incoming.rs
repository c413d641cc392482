//! Incoming message assembly.
//!
//! A [`MessageIn`] accumulates decoded frame payloads through a small
//! state machine: the property-block length varint, then the property
//! block, then the body. Expected responses are created at request-send
//! time with a completion notifier; requests are created when their
//! first frame arrives.

use bytes::Bytes;
use tokio::sync::oneshot;

use super::properties::{find_property, PropertiesIter};
use crate::codec::{Inflater, WriteMode};
use crate::error::{BlipError, Result};
use crate::message::MessageOut;
use crate::protocol::{
    flags, MessageNo, MessageType, CODE_DISCONNECTED, ERROR_CODE_PROPERTY, ERROR_DOMAIN_PROPERTY,
    DOMAIN_BLIP, INCOMING_ACK_THRESHOLD, PROFILE_PROPERTY,
};
use crate::varint;

/// Assembly progress of an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum State {
    /// Waiting for the property-block length varint.
    Start,
    /// Copying property-block bytes.
    ReadingProps,
    /// Everything else is body.
    ReadingBody,
    /// Final frame processed.
    Complete,
}

/// A message being received, tracked by the engine until its last frame.
#[derive(Debug)]
pub struct MessageIn {
    number: MessageNo,
    flags: u8,
    state: State,
    /// In `Start`, stashes the length-varint bytes; afterwards holds the
    /// property block itself.
    properties: Vec<u8>,
    properties_remaining: usize,
    body: Vec<u8>,
    raw_bytes_received: u64,
    unacked_bytes: u64,
    notifier: Option<oneshot::Sender<MessageIn>>,
}

impl MessageIn {
    /// Track a message whose first frame just arrived.
    pub fn incoming(number: MessageNo, frame_flags: u8) -> Self {
        Self {
            number,
            flags: frame_flags & !flags::MORE_COMING,
            state: State::Start,
            properties: Vec::new(),
            properties_remaining: 0,
            body: Vec::new(),
            raw_bytes_received: 0,
            unacked_bytes: 0,
            notifier: None,
        }
    }

    /// Pre-register the response expected for an outgoing request.
    pub fn pending_response(number: MessageNo, notifier: oneshot::Sender<MessageIn>) -> Self {
        let mut msg = Self::incoming(number, MessageType::Response as u8);
        msg.notifier = Some(notifier);
        msg
    }

    /// A synthetic ERR BLIP/502 delivered to awaiters when the
    /// connection dies with their response outstanding.
    pub fn disconnected(number: MessageNo) -> Self {
        let mut msg = Self::incoming(number, MessageType::Error as u8);
        let mut props = Vec::new();
        super::properties::append_property(
            &mut props,
            ERROR_CODE_PROPERTY,
            &CODE_DISCONNECTED.to_string(),
        );
        msg.properties = props;
        msg.body = b"Disconnected".to_vec();
        msg.state = State::Complete;
        msg
    }

    /// Message number.
    pub fn number(&self) -> MessageNo {
        self.number
    }

    /// Message type; may switch to [`MessageType::Error`] mid-message.
    pub fn message_type(&self) -> MessageType {
        MessageType::from_flags(self.flags).expect("tracked message has a valid type")
    }

    /// Whether the request asked for no response.
    pub fn no_reply(&self) -> bool {
        flags::has_flag(self.flags, flags::NO_REPLY)
    }

    /// Whether this message is an error response.
    pub fn is_error(&self) -> bool {
        self.message_type() == MessageType::Error
    }

    /// Whether the final frame has been processed.
    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    /// Total frame-payload bytes received for this message.
    pub fn raw_bytes_received(&self) -> u64 {
        self.raw_bytes_received
    }

    /// Iterate the properties in wire order.
    pub fn properties(&self) -> PropertiesIter<'_> {
        PropertiesIter::new(&self.properties)
    }

    /// Look up a property.
    pub fn property(&self, key: &str) -> Option<&str> {
        find_property(&self.properties, key)
    }

    /// Look up a property, with a fallback value.
    pub fn property_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.property(key).unwrap_or(default)
    }

    /// Look up an integer property, with a fallback value.
    pub fn int_property(&self, key: &str, default: i64) -> i64 {
        self.property(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// The `Profile` property naming the request handler.
    pub fn profile(&self) -> Option<&str> {
        self.property(PROFILE_PROPERTY)
    }

    /// Error domain of an error response (default `BLIP`).
    pub fn error_domain(&self) -> &str {
        self.property_or(ERROR_DOMAIN_PROPERTY, DOMAIN_BLIP)
    }

    /// Error code of an error response (0 when absent).
    pub fn error_code(&self) -> i64 {
        self.int_property(ERROR_CODE_PROPERTY, 0)
    }

    /// The message body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The message body as UTF-8, lossily.
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Detach the completion notifier, if any.
    pub fn take_notifier(&mut self) -> Option<oneshot::Sender<MessageIn>> {
        self.notifier.take()
    }

    /// Feed one frame's payload through the codec into the assembly
    /// state machine. Returns an ACK message to enqueue when enough
    /// unacknowledged bytes have piled up.
    pub fn add_frame(
        &mut self,
        frame_flags: u8,
        payload: Bytes,
        decode_buf: &mut Vec<u8>,
        codec: &mut Inflater,
    ) -> Result<Option<MessageOut>> {
        self.raw_bytes_received += payload.len() as u64;
        self.unacked_bytes += payload.len() as u64;

        let frame_type = MessageType::from_flags(frame_flags)?;
        if frame_type != self.message_type() {
            if frame_type == MessageType::Error {
                // An ERR frame replaces whatever was accumulated.
                self.flags = (self.flags & !flags::TYPE_MASK) | MessageType::Error as u8;
                self.state = State::Start;
                self.properties.clear();
                self.properties_remaining = 0;
                self.body.clear();
            } else {
                return Err(BlipError::InconsistentMessageType);
            }
        }

        let mode = if flags::has_flag(frame_flags, flags::COMPRESSED) {
            WriteMode::SyncFlush
        } else {
            WriteMode::Raw
        };

        let mut input = payload;
        let budget = decode_buf.capacity().max(4096);
        while !input.is_empty() {
            let before = input.len();
            decode_buf.clear();
            codec.write(&mut input, decode_buf, budget, mode)?;
            self.add_bytes(decode_buf)?;
            if input.len() == before && decode_buf.is_empty() {
                return Err(BlipError::Codec("decoder made no progress".into()));
            }
        }

        if !flags::has_flag(frame_flags, flags::MORE_COMING) {
            if self.state < State::ReadingBody {
                return Err(BlipError::IncompleteProperties);
            }
            self.state = State::Complete;
            return Ok(None);
        }

        if self.unacked_bytes >= INCOMING_ACK_THRESHOLD {
            self.unacked_bytes = 0;
            return Ok(Some(MessageOut::ack(
                self.message_type(),
                self.number,
                self.raw_bytes_received,
            )));
        }
        Ok(None)
    }

    /// Route decoded plaintext through the assembly states.
    fn add_bytes(&mut self, mut chunk: &[u8]) -> Result<()> {
        while self.state == State::Start && !chunk.is_empty() {
            // The length varint can straddle frame boundaries; stash its
            // bytes in the (still empty) property buffer until it ends.
            let byte = chunk[0];
            chunk = &chunk[1..];
            self.properties.push(byte);
            if byte & 0x80 == 0 {
                let mut stash = &self.properties[..];
                let len = varint::try_get(&mut stash)? as usize;
                self.properties.clear();
                self.properties.reserve(len);
                self.properties_remaining = len;
                self.state = if len == 0 {
                    State::ReadingBody
                } else {
                    State::ReadingProps
                };
            } else if self.properties.len() >= varint::MAX_WIDTH {
                return Err(BlipError::TruncatedVarint);
            }
        }

        if self.state == State::ReadingProps {
            let take = chunk.len().min(self.properties_remaining);
            self.properties.extend_from_slice(&chunk[..take]);
            self.properties_remaining -= take;
            chunk = &chunk[take..];
            if self.properties_remaining == 0 {
                self.state = State::ReadingBody;
            }
        }

        if self.state == State::ReadingBody && !chunk.is_empty() {
            self.body.extend_from_slice(chunk);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Deflater;
    use crate::message::MessageBuf;

    fn pump(msg: &mut MessageOut, target: &mut MessageIn, frame_size: usize) -> Vec<MessageOut> {
        let mut deflater = Deflater::new(6);
        let mut inflater = Inflater::new();
        let mut decode_buf = Vec::with_capacity(32 * 1024);
        let mut frame = Vec::new();
        let mut acks = Vec::new();

        while !msg.finished() {
            msg.next_frame(&mut frame, &mut deflater, frame_size).unwrap();
            let mut view = Bytes::copy_from_slice(&frame);
            let _number = varint::try_get(&mut view).unwrap();
            let frame_flags = view[0];
            let payload = view.slice(1..);
            if let Some(ack) = target
                .add_frame(frame_flags, payload, &mut decode_buf, &mut inflater)
                .unwrap()
            {
                acks.push(ack);
            }
        }
        acks
    }

    #[test]
    fn test_roundtrip_small_request() {
        let mut out = MessageOut::new(
            1,
            MessageBuf::request()
                .profile("Insult")
                .property("Language", "French")
                .body_string("Your mother was a hamster"),
        );
        let mut inc = MessageIn::incoming(1, flags::MORE_COMING);
        pump(&mut out, &mut inc, 42);

        assert!(inc.is_complete());
        assert_eq!(inc.profile(), Some("Insult"));
        assert_eq!(inc.property("Language"), Some("French"));
        assert_eq!(inc.property("Horse"), None);
        assert_eq!(inc.property_or("Horse", "coconuts"), "coconuts");
        assert_eq!(inc.int_property("Language", -1), -1);
        assert_eq!(inc.body(), b"Your mother was a hamster");
    }

    #[test]
    fn test_roundtrip_empty_message() {
        let mut out = MessageOut::new(1, MessageBuf::request());
        let mut inc = MessageIn::incoming(1, 0);
        pump(&mut out, &mut inc, 4096);

        assert!(inc.is_complete());
        assert_eq!(inc.properties().count(), 0);
        assert!(inc.body().is_empty());
    }

    #[test]
    fn test_roundtrip_compressed_body() {
        let phrase = "compression pays off for repetitive phrases. ";
        let body = phrase.repeat(64);
        let mut out = MessageOut::new(
            2,
            MessageBuf::request()
                .profile("Bulk")
                .compressed(true)
                .body_string(&body),
        );
        let mut inc = MessageIn::incoming(2, flags::COMPRESSED);
        pump(&mut out, &mut inc, 512);

        assert!(inc.is_complete());
        assert_eq!(inc.body(), body.as_bytes());
    }

    #[test]
    fn test_ack_emitted_past_threshold() {
        let body = "z".repeat(2 * INCOMING_ACK_THRESHOLD as usize);
        let mut out = MessageOut::new(3, MessageBuf::request().body_string(&body));
        let mut inc = MessageIn::incoming(3, flags::MORE_COMING);
        let acks = pump(&mut out, &mut inc, 4096);

        assert!(!acks.is_empty());
        let ack = &acks[0];
        assert_eq!(ack.message_type(), MessageType::AckRequest);
        assert_eq!(ack.number(), 3);
        assert!(ack.urgent());
        assert!(inc.is_complete());
        assert_eq!(inc.body(), body.as_bytes());
    }

    #[test]
    fn test_error_replaces_partial_message() {
        let mut out = MessageOut::new(4, MessageBuf::response().body_string(&"r".repeat(200)));
        let mut deflater = Deflater::new(6);
        let mut inflater = Inflater::new();
        let mut decode_buf = Vec::with_capacity(1024);
        let mut frame = Vec::new();

        let mut inc = MessageIn::incoming(4, MessageType::Response as u8);

        // First response frame arrives...
        out.next_frame(&mut frame, &mut deflater, 64).unwrap();
        let mut view = Bytes::copy_from_slice(&frame);
        varint::try_get(&mut view).unwrap();
        let frame_flags = view[0];
        inc.add_frame(frame_flags, view.slice(1..), &mut decode_buf, &mut inflater)
            .unwrap();
        assert!(!inc.is_complete());

        // ...then the responder switches to an error.
        let mut err = MessageOut::new(
            4,
            MessageBuf::error_response(DOMAIN_BLIP, 500, "changed my mind"),
        );
        err.next_frame(&mut frame, &mut deflater, 4096).unwrap();
        let mut view = Bytes::copy_from_slice(&frame);
        varint::try_get(&mut view).unwrap();
        let frame_flags = view[0];
        inc.add_frame(frame_flags, view.slice(1..), &mut decode_buf, &mut inflater)
            .unwrap();

        assert!(inc.is_complete());
        assert!(inc.is_error());
        assert_eq!(inc.error_domain(), DOMAIN_BLIP);
        assert_eq!(inc.error_code(), 500);
        assert_eq!(inc.body_string(), "changed my mind");
    }

    #[test]
    fn test_type_flip_to_non_error_rejected() {
        let mut inc = MessageIn::incoming(5, MessageType::Request as u8);
        let mut inflater = Inflater::new();
        let mut decode_buf = Vec::with_capacity(1024);

        // A RES frame for a message tracked as REQ is a protocol error.
        let payload = Bytes::copy_from_slice(&crc32fast::hash(b"").to_be_bytes());
        let result = inc.add_frame(
            MessageType::Response as u8,
            payload,
            &mut decode_buf,
            &mut inflater,
        );
        assert!(matches!(result, Err(BlipError::InconsistentMessageType)));
    }

    #[test]
    fn test_final_frame_mid_properties_rejected() {
        let mut inc = MessageIn::incoming(6, 0);
        let mut inflater = Inflater::new();
        let mut decode_buf = Vec::with_capacity(1024);

        // Plaintext claims 100 property bytes but provides only 3.
        let mut plain = Vec::new();
        varint::put(&mut plain, 100u64);
        plain.extend_from_slice(b"abc");
        let mut crc = crate::checksum::Crc32::new();
        crc.update(&plain);
        plain.extend_from_slice(&crc.value().to_be_bytes());

        let result = inc.add_frame(0, Bytes::from(plain), &mut decode_buf, &mut inflater);
        assert!(matches!(result, Err(BlipError::IncompleteProperties)));
    }

    #[test]
    fn test_disconnected_synthetic_error() {
        let msg = MessageIn::disconnected(9);
        assert!(msg.is_complete());
        assert!(msg.is_error());
        assert_eq!(msg.error_domain(), DOMAIN_BLIP);
        assert_eq!(msg.error_code(), CODE_DISCONNECTED);
        assert_eq!(msg.body_string(), "Disconnected");
    }
}
