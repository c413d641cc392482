//! Outgoing message queues: the outbox and the icebox.
//!
//! The outbox is the send loop's work queue. ACK messages jump to the
//! front so flow-control feedback never queues behind bulk data; data
//! messages are appended and requeued after each frame, which is what
//! interleaves concurrent messages one frame at a time. The icebox
//! holds messages frozen by ACK debt until the peer catches up.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::{BlipError, Result};
use crate::message::MessageOut;
use crate::protocol::{MessageNo, MessageType};

// TODO: urgent non-ACK messages currently only get the bigger frame
// size; inserting them ahead of normal messages (but behind queued ACKs)
// is an open scheduling question.

#[derive(Debug, Default)]
struct OutboxInner {
    queue: VecDeque<MessageOut>,
    closed: bool,
    /// A popped message is still the sender's responsibility until it is
    /// requeued, frozen, or fully sent; idle checks must see it.
    in_flight: bool,
}

/// Ordered queue of messages with frames left to send.
#[derive(Debug, Default)]
pub struct Outbox {
    inner: Mutex<OutboxInner>,
    notify: Notify,
}

impl Outbox {
    /// Create an empty, open outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message: ACKs at the front, everything else at the back.
    /// Fails once the outbox is closed.
    pub fn push(&self, msg: MessageOut) -> Result<()> {
        let mut inner = self.inner.lock().expect("outbox lock");
        if inner.closed {
            return Err(BlipError::Disconnected);
        }
        if msg.is_ack() {
            inner.queue.push_front(msg);
        } else {
            inner.queue.push_back(msg);
        }
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    /// Dequeue the next message, parking until one arrives. Resolves to
    /// `None` once the outbox is closed. The popped message counts as
    /// in flight until [`done_sending`](Self::done_sending).
    pub async fn pop(&self) -> Option<MessageOut> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().expect("outbox lock");
                if let Some(msg) = inner.queue.pop_front() {
                    inner.in_flight = true;
                    return Some(msg);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// The popped message has been requeued, frozen, or fully framed.
    /// Must be called after any successor queue insertion so emptiness
    /// never flickers under a concurrent idle check.
    pub fn done_sending(&self) {
        self.inner.lock().expect("outbox lock").in_flight = false;
    }

    /// Find a queued message by type and number and apply `f` to it.
    /// Used to route incoming ACKs to a message still waiting to send.
    pub fn update<R>(
        &self,
        message_type: MessageType,
        number: MessageNo,
        f: impl FnOnce(&mut MessageOut) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock().expect("outbox lock");
        inner
            .queue
            .iter_mut()
            .find(|m| m.message_type() == message_type && m.number() == number)
            .map(f)
    }

    /// Whether no messages are queued or in flight.
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().expect("outbox lock");
        inner.queue.is_empty() && !inner.in_flight
    }

    /// Number of messages waiting in the queue (the in-flight message,
    /// if any, is not counted).
    pub fn queued(&self) -> usize {
        self.inner.lock().expect("outbox lock").queue.len()
    }

    /// Whether the outbox has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("outbox lock").closed
    }

    /// Close the outbox: drop queued messages and wake the parked popper.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("outbox lock");
        inner.closed = true;
        inner.queue.clear();
        drop(inner);
        self.notify.notify_one();
    }
}

/// Unordered set of messages frozen until the peer acknowledges enough
/// of their sent bytes.
#[derive(Debug, Default)]
pub struct Icebox {
    frozen: Mutex<Vec<MessageOut>>,
}

impl Icebox {
    /// Create an empty icebox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Freeze a message.
    pub fn add(&self, msg: MessageOut) {
        self.frozen.lock().expect("icebox lock").push(msg);
    }

    /// Remove and return the frozen message with this type and number.
    pub fn take(&self, message_type: MessageType, number: MessageNo) -> Option<MessageOut> {
        let mut frozen = self.frozen.lock().expect("icebox lock");
        let index = frozen
            .iter()
            .position(|m| m.message_type() == message_type && m.number() == number)?;
        Some(frozen.swap_remove(index))
    }

    /// Whether nothing is frozen.
    pub fn is_empty(&self) -> bool {
        self.frozen.lock().expect("icebox lock").is_empty()
    }
}
