//! Builder for outgoing messages.
//!
//! A [`MessageBuf`] collects the type, flags, properties and body of a
//! message before it is handed to the engine. The handle consumes the
//! builder when sending, so a message can never be sent twice.
//!
//! # Example
//!
//! ```
//! use blip::MessageBuf;
//!
//! let request = MessageBuf::request()
//!     .profile("Insult")
//!     .property("Language", "French")
//!     .body_string("Your mother was a hamster");
//! assert_eq!(request.profile_name(), Some("Insult"));
//! ```

use bytes::Bytes;

use super::properties::{append_property, find_property};
use crate::protocol::{
    MessageNo, MessageType, CODE_HANDLER_FAILED, DOMAIN_BLIP, ERROR_CODE_PROPERTY,
    ERROR_DOMAIN_PROPERTY, PROFILE_PROPERTY,
};

/// Scheduling priority of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Normal interleaved delivery.
    #[default]
    Normal,
    /// Urgent messages get larger frames so they drain sooner.
    Urgent,
}

/// An outgoing message under construction.
#[derive(Debug, Clone)]
pub struct MessageBuf {
    pub(crate) message_type: MessageType,
    pub(crate) properties: Vec<u8>,
    pub(crate) body: Bytes,
    pub(crate) priority: Priority,
    pub(crate) compressed: bool,
    pub(crate) no_reply: bool,
    /// For responses: the number of the request being answered. Filled
    /// in by the engine when a handler returns the response directly.
    pub(crate) response_to: MessageNo,
}

impl MessageBuf {
    fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            properties: Vec::new(),
            body: Bytes::new(),
            priority: Priority::Normal,
            compressed: false,
            no_reply: false,
            response_to: 0,
        }
    }

    /// Start building a request.
    pub fn request() -> Self {
        Self::new(MessageType::Request)
    }

    /// Start building a successful response.
    pub fn response() -> Self {
        Self::new(MessageType::Response)
    }

    /// Build an error response with the given domain, code and message
    /// text. The `Error-Domain` property is omitted for the default
    /// `BLIP` domain.
    pub fn error_response(domain: &str, code: i64, message: &str) -> Self {
        let mut buf = Self::new(MessageType::Error);
        buf = buf.property(ERROR_CODE_PROPERTY, &code.to_string());
        if domain != DOMAIN_BLIP {
            buf = buf.property(ERROR_DOMAIN_PROPERTY, domain);
        }
        buf.body_string(message)
    }

    /// Error response a handler failure turns into (`BLIP`/501).
    pub(crate) fn handler_failure(message: &str) -> Self {
        Self::error_response(DOMAIN_BLIP, CODE_HANDLER_FAILED, message)
    }

    /// Set the `Profile` property, naming the request handler.
    pub fn profile(self, profile: &str) -> Self {
        self.property(PROFILE_PROPERTY, profile)
    }

    /// Add a string property.
    ///
    /// # Panics
    ///
    /// Panics if the key or value contains a NUL byte.
    pub fn property(mut self, key: &str, value: &str) -> Self {
        append_property(&mut self.properties, key, value);
        self
    }

    /// Set the message body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the message body from a string.
    pub fn body_string(self, body: &str) -> Self {
        self.body(Bytes::copy_from_slice(body.as_bytes()))
    }

    /// Mark the message urgent.
    pub fn urgent(mut self, urgent: bool) -> Self {
        self.priority = if urgent { Priority::Urgent } else { Priority::Normal };
        self
    }

    /// Request per-message deflate compression.
    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Mark a request as not wanting a response.
    pub fn no_reply(mut self, no_reply: bool) -> Self {
        self.no_reply = no_reply;
        self
    }

    /// Tie a response to the request it answers. Not needed when a
    /// handler returns the response; the engine fills the number in.
    pub fn response_to(mut self, number: MessageNo) -> Self {
        self.response_to = number;
        self
    }

    /// The message type this builder will produce.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The `Profile` property, if set.
    pub fn profile_name(&self) -> Option<&str> {
        find_property(&self.properties, PROFILE_PROPERTY)
    }
}
