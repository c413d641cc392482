//! Outgoing message state: frame production and ACK accounting.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{Deflater, WriteMode};
use crate::error::Result;
use crate::message::MessageBuf;
use crate::protocol::{flags, MessageNo, MessageType, OUTGOING_ACK_THRESHOLD};
use crate::varint;

/// A message being sent, owned by the outbox, icebox, or send loop.
///
/// The payload is pre-encoded at construction (property-block length
/// varint, property block, body); [`next_frame`](Self::next_frame)
/// peels successive chunks off it until it is drained.
#[derive(Debug)]
pub struct MessageOut {
    number: MessageNo,
    flags: u8,
    /// Encoded payload; the cursor advances as frames are produced.
    payload: Bytes,
    bytes_sent: u64,
    unacked_bytes: u64,
}

impl MessageOut {
    /// Wrap a finished builder for sending under the given number.
    pub fn new(number: MessageNo, buf: MessageBuf) -> Self {
        debug_assert!(number > 0);
        let mut flags_byte = buf.message_type as u8;
        if buf.compressed {
            flags_byte |= flags::COMPRESSED;
        }
        if buf.priority == super::Priority::Urgent {
            flags_byte |= flags::URGENT;
        }
        if buf.no_reply {
            flags_byte |= flags::NO_REPLY;
        }

        let mut payload = BytesMut::with_capacity(
            varint::size_of(buf.properties.len() as u64) + buf.properties.len() + buf.body.len(),
        );
        varint::put(&mut payload, buf.properties.len() as u64);
        payload.put_slice(&buf.properties);
        payload.put_slice(&buf.body);

        Self {
            number,
            flags: flags_byte,
            payload: payload.freeze(),
            bytes_sent: 0,
            unacked_bytes: 0,
        }
    }

    /// Build an ACK housekeeping message reporting `received` bytes of
    /// the peer's message `number`. ACK payloads are a bare varint: no
    /// property block and no checksum trailer.
    pub fn ack(acked_type: MessageType, number: MessageNo, received: u64) -> Self {
        let ack_type = acked_type.ack_type();
        let mut payload = BytesMut::with_capacity(varint::size_of(received));
        varint::put(&mut payload, received);
        Self {
            number,
            flags: ack_type as u8 | flags::URGENT | flags::NO_REPLY,
            payload: payload.freeze(),
            bytes_sent: 0,
            unacked_bytes: 0,
        }
    }

    /// Message number.
    pub fn number(&self) -> MessageNo {
        self.number
    }

    /// Message type from the flag bits.
    pub fn message_type(&self) -> MessageType {
        MessageType::from_flags(self.flags).expect("constructed with a valid type")
    }

    /// Whether this is an ACK housekeeping message.
    pub fn is_ack(&self) -> bool {
        self.message_type().is_ack()
    }

    /// Whether the message asked for urgent scheduling.
    pub fn urgent(&self) -> bool {
        flags::has_flag(self.flags, flags::URGENT)
    }

    /// Whether every payload byte has been framed.
    pub fn finished(&self) -> bool {
        self.payload.is_empty()
    }

    /// Total payload bytes produced into frames so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Payload bytes sent but not yet acknowledged by the peer.
    pub fn unacked_bytes(&self) -> u64 {
        self.unacked_bytes
    }

    /// Whether the message must freeze until the peer acknowledges.
    pub fn needs_ack(&self) -> bool {
        self.unacked_bytes >= OUTGOING_ACK_THRESHOLD
    }

    /// Produce the next frame into `dst` (cleared first), consulting the
    /// codec for payload encoding. `max_payload` bounds the encoded
    /// payload including the checksum trailer; the number/flags header
    /// is on top.
    pub fn next_frame(
        &mut self,
        dst: &mut Vec<u8>,
        codec: &mut Deflater,
        max_payload: usize,
    ) -> Result<()> {
        dst.clear();
        varint::put(dst, self.number);
        let flags_pos = dst.len();
        dst.push(0);

        if self.is_ack() {
            // ACKs go out whole and skip the codec entirely.
            dst.extend_from_slice(&self.payload);
            self.payload.advance(self.payload.len());
            dst[flags_pos] = self.flags;
            return Ok(());
        }

        let before = dst.len();
        let mode = if flags::has_flag(self.flags, flags::COMPRESSED) {
            WriteMode::SyncFlush
        } else {
            WriteMode::Raw
        };
        codec.write(&mut self.payload, dst, max_payload, mode)?;

        let mut frame_flags = self.flags;
        if !self.payload.is_empty() {
            frame_flags |= flags::MORE_COMING;
        }
        dst[flags_pos] = frame_flags;

        let produced = (dst.len() - before) as u64;
        self.bytes_sent += produced;
        self.unacked_bytes += produced;
        Ok(())
    }

    /// Apply a received ACK body (varint byte count). Counts larger than
    /// what was sent clamp to zero rather than underflow.
    pub fn handle_ack(&mut self, mut body: &[u8]) -> Result<()> {
        let acked = varint::try_get(&mut body)?;
        self.unacked_bytes = self
            .unacked_bytes
            .min(self.bytes_sent.saturating_sub(acked));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBuf;

    fn plain_request(body: &str) -> MessageOut {
        MessageOut::new(1, MessageBuf::request().profile("Test").body_string(body))
    }

    #[test]
    fn test_single_frame_layout() {
        let mut msg = plain_request("hi");
        let mut codec = Deflater::new(6);
        let mut frame = Vec::new();
        msg.next_frame(&mut frame, &mut codec, 4096).unwrap();

        assert!(msg.finished());
        assert_eq!(frame[0], 1, "number varint");
        assert_eq!(frame[1], 0, "REQ, no more-coming");
        // varint(prop len) follows the header.
        assert_eq!(frame[2] as usize, "Test\0".len() + "Profile\0".len());
    }

    #[test]
    fn test_more_coming_set_until_drained() {
        let mut msg = plain_request(&"x".repeat(100));
        let mut codec = Deflater::new(6);
        let mut frame = Vec::new();

        msg.next_frame(&mut frame, &mut codec, 32).unwrap();
        assert!(!msg.finished());
        assert_eq!(frame[1] & flags::MORE_COMING, flags::MORE_COMING);

        while !msg.finished() {
            msg.next_frame(&mut frame, &mut codec, 32).unwrap();
        }
        assert_eq!(frame[1] & flags::MORE_COMING, 0);
    }

    #[test]
    fn test_bytes_sent_accumulates_payload_only() {
        let mut msg = plain_request("abcdef");
        let mut codec = Deflater::new(6);
        let mut frame = Vec::new();
        msg.next_frame(&mut frame, &mut codec, 4096).unwrap();

        let header_len = 2; // varint(1) + flags
        assert_eq!(msg.bytes_sent(), (frame.len() - header_len) as u64);
        assert_eq!(msg.unacked_bytes(), msg.bytes_sent());
    }

    #[test]
    fn test_ack_frame_is_verbatim_varint() {
        let mut ack = MessageOut::ack(MessageType::Request, 3, 50_000);
        assert!(ack.is_ack());
        assert!(ack.urgent());
        assert_eq!(ack.message_type(), MessageType::AckRequest);

        let mut codec = Deflater::new(6);
        let mut frame = Vec::new();
        ack.next_frame(&mut frame, &mut codec, 4096).unwrap();
        assert!(ack.finished());

        // varint(3), flags, varint(50_000) and nothing else: no trailer.
        assert_eq!(frame[0], 3);
        assert_eq!(
            frame[1] & flags::TYPE_MASK,
            MessageType::AckRequest as u8
        );
        let mut body = &frame[2..];
        assert_eq!(varint::try_get(&mut body).unwrap(), 50_000);
        assert!(body.is_empty());
    }

    #[test]
    fn test_ack_accounting() {
        let mut msg = plain_request(&"y".repeat(200_000));
        let mut codec = Deflater::new(6);
        let mut frame = Vec::new();

        while !msg.finished() && !msg.needs_ack() {
            msg.next_frame(&mut frame, &mut codec, 4096).unwrap();
        }
        assert!(msg.needs_ack());
        let sent = msg.bytes_sent();

        let mut ack_body = Vec::new();
        varint::put(&mut ack_body, sent - 1000);
        msg.handle_ack(&ack_body).unwrap();
        assert_eq!(msg.unacked_bytes(), 1000);
        assert!(!msg.needs_ack());
    }

    #[test]
    fn test_ack_never_underflows() {
        let mut msg = plain_request("short");
        let mut codec = Deflater::new(6);
        let mut frame = Vec::new();
        msg.next_frame(&mut frame, &mut codec, 4096).unwrap();

        let mut ack_body = Vec::new();
        varint::put(&mut ack_body, u64::MAX);
        msg.handle_ack(&ack_body).unwrap();
        assert_eq!(msg.unacked_bytes(), 0);
    }

    #[test]
    fn test_malformed_ack_body() {
        let mut msg = plain_request("short");
        assert!(msg.handle_ack(&[0x80]).is_err());
    }
}
