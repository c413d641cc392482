//! Request dispatch by profile name.
//!
//! Handlers are registered on the engine builder under the value of the
//! request's `Profile` property, with an optional default for requests
//! whose profile matches nothing. They run inline on the receive loop,
//! so they must return quickly; work that needs I/O should be scheduled
//! elsewhere and the reply sent later through the engine handle.

use std::collections::HashMap;

use crate::error::Result;
use crate::message::{MessageBuf, MessageIn};

/// A request handler.
///
/// Returning `Ok(Some(response))` sends the response immediately (the
/// engine ties it to the request number). `Ok(None)` means the
/// application will respond later — or not at all, for no-reply
/// requests. Errors become `BLIP`/501 error responses.
pub trait Handler: Send + Sync + 'static {
    /// Handle one complete incoming request.
    fn handle(&self, request: &MessageIn) -> Result<Option<MessageBuf>>;
}

impl<F> Handler for F
where
    F: Fn(&MessageIn) -> Result<Option<MessageBuf>> + Send + Sync + 'static,
{
    fn handle(&self, request: &MessageIn) -> Result<Option<MessageBuf>> {
        self(request)
    }
}

/// Registry mapping profile names to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn Handler>>,
    default: Option<Box<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a profile, replacing any previous one.
    pub fn register(&mut self, profile: &str, handler: impl Handler) {
        self.handlers.insert(profile.to_string(), Box::new(handler));
    }

    /// Register the fallback handler for unmatched profiles.
    pub fn register_default(&mut self, handler: impl Handler) {
        self.default = Some(Box::new(handler));
    }

    /// Find the handler for a request's profile.
    pub fn resolve(&self, profile: Option<&str>) -> Option<&dyn Handler> {
        profile
            .and_then(|p| self.handlers.get(p))
            .or(self.default.as_ref())
            .map(|h| h.as_ref())
    }
}
