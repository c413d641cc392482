//! The protocol engine: send/receive loops, frame routing, and dispatch.
//!
//! [`EngineBuilder`] configures handlers and compression and produces an
//! [`Engine`] plus an [`EngineHandle`]. The engine's [`run`](Engine::run)
//! future drives both loops concurrently on one task; the handle is the
//! application's way in — sending requests and responses, and asking for
//! an idle shutdown.
//!
//! # Example
//!
//! ```
//! use blip::{EngineBuilder, MessageBuf, MessageIn, transport};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> blip::Result<()> {
//! let (client_end, server_end) = transport::pair(16);
//!
//! let (server, server_handle) = EngineBuilder::new()
//!     .on_request("Echo", |req: &MessageIn| {
//!         Ok(Some(MessageBuf::response().body(req.body().to_vec())))
//!     })
//!     .build(server_end);
//!
//! let (client, client_handle) = EngineBuilder::new().build(client_end);
//!
//! let server_task = tokio::spawn(server.run());
//! let client_task = tokio::spawn(client.run());
//!
//! let pending = client_handle
//!     .send_request(MessageBuf::request().profile("Echo").body_string("hi"))?
//!     .expect("reply expected");
//! let reply = pending.response().await?;
//! assert_eq!(reply.body(), b"hi");
//!
//! client_handle.close_when_idle();
//! server_handle.close_when_idle();
//! client_task.await.unwrap()?;
//! server_task.await.unwrap()?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes};
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::codec::{Deflater, Inflater};
use crate::error::{BlipError, Result};
use crate::handler::{Handler, HandlerRegistry};
use crate::message::{MessageBuf, MessageIn, MessageOut};
use crate::outbox::{Icebox, Outbox};
use crate::protocol::{
    flags, MessageNo, MessageType, BIG_FRAME_PAYLOAD, CODE_NO_HANDLER, DEFAULT_FRAME_PAYLOAD,
    DOMAIN_BLIP,
};
use crate::transport::{Transport, TransportRx, TransportTx};
use crate::varint;

/// Default zlib level for compressed messages.
const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Incoming messages tracked between frames, plus the request-number
/// watermark. Mutated only by the receive loop; read by idle checks and
/// written once per request send (response pre-registration).
#[derive(Default)]
struct Tracking {
    in_number: MessageNo,
    requests: HashMap<MessageNo, MessageIn>,
    responses: HashMap<MessageNo, MessageIn>,
}

/// State shared between the two loops and the application handle.
struct Shared {
    outbox: Outbox,
    icebox: Icebox,
    out_number: Mutex<MessageNo>,
    tracking: Mutex<Tracking>,
    close_when_idle: AtomicBool,
    compression_enabled: bool,
    handlers: HandlerRegistry,
}

impl Shared {
    fn send_request(&self, mut buf: MessageBuf) -> Result<Option<ResponseFuture>> {
        if buf.message_type() != MessageType::Request {
            return Err(BlipError::BadRequest("send_request takes a request"));
        }
        if !self.compression_enabled {
            buf.compressed = false;
        }
        let no_reply = buf.no_reply;

        let number = {
            let mut n = self.out_number.lock().expect("out number lock");
            *n += 1;
            *n
        };

        // Register the expected response before the message can hit the
        // wire, so its first frame always finds a home.
        let receiver = if no_reply {
            None
        } else {
            let (done_tx, done_rx) = oneshot::channel();
            self.tracking
                .lock()
                .expect("tracking lock")
                .responses
                .insert(number, MessageIn::pending_response(number, done_tx));
            Some(done_rx)
        };

        if let Err(e) = self.outbox.push(MessageOut::new(number, buf)) {
            if !no_reply {
                self.tracking
                    .lock()
                    .expect("tracking lock")
                    .responses
                    .remove(&number);
            }
            return Err(e);
        }
        Ok(receiver.map(|rx| ResponseFuture { rx }))
    }

    fn send_response(&self, mut buf: MessageBuf) -> Result<()> {
        if buf.message_type() == MessageType::Request {
            return Err(BlipError::BadRequest("send_response takes a response"));
        }
        if buf.response_to == 0 {
            return Err(BlipError::BadRequest("response not tied to a request"));
        }
        if !self.compression_enabled {
            buf.compressed = false;
        }
        let number = buf.response_to;
        self.outbox.push(MessageOut::new(number, buf))
    }

    fn is_idle(&self) -> bool {
        let tracking = self.tracking.lock().expect("tracking lock");
        tracking.requests.is_empty()
            && tracking.responses.is_empty()
            && self.outbox.is_empty()
            && self.icebox.is_empty()
    }

    /// When an idle shutdown was requested and nothing is in flight,
    /// close the outbox (waking the send loop) and report true.
    fn check_idle_close(&self) -> bool {
        if self.close_when_idle.load(Ordering::Acquire) && self.is_idle() {
            self.outbox.close();
            true
        } else {
            false
        }
    }

    /// Deliver the synthetic ERR BLIP/502 to every outstanding awaiter.
    fn fail_pending_responses(&self) {
        let mut tracking = self.tracking.lock().expect("tracking lock");
        for (number, mut pending) in tracking.responses.drain() {
            if let Some(notifier) = pending.take_notifier() {
                let _ = notifier.send(MessageIn::disconnected(number));
            }
        }
        tracking.requests.clear();
    }
}

/// Completion of an expected response.
pub struct ResponseFuture {
    rx: oneshot::Receiver<MessageIn>,
}

impl ResponseFuture {
    /// Wait for the response. A connection loss yields the synthetic
    /// ERR BLIP/502 message rather than an error here.
    pub async fn response(self) -> Result<MessageIn> {
        self.rx.await.map_err(|_| BlipError::Disconnected)
    }
}

/// Builder for configuring and creating a BLIP engine.
pub struct EngineBuilder {
    handlers: HandlerRegistry,
    compression_level: u32,
}

impl EngineBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            handlers: HandlerRegistry::new(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Register a handler for requests whose `Profile` property matches.
    pub fn on_request(mut self, profile: &str, handler: impl Handler) -> Self {
        self.handlers.register(profile, handler);
        self
    }

    /// Register the fallback handler for unmatched profiles.
    pub fn default_handler(mut self, handler: impl Handler) -> Self {
        self.handlers.register_default(handler);
        self
    }

    /// Set the zlib level for compressed messages; 0 disables
    /// compression entirely (the `compressed` flag is cleared on every
    /// outgoing message).
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Bind to a transport, producing the engine and its handle.
    pub fn build<T: Transport>(self, transport: T) -> (Engine<T>, EngineHandle) {
        let shared = Arc::new(Shared {
            outbox: Outbox::new(),
            icebox: Icebox::new(),
            out_number: Mutex::new(0),
            tracking: Mutex::new(Tracking::default()),
            close_when_idle: AtomicBool::new(false),
            compression_enabled: self.compression_level > 0,
            handlers: self.handlers,
        });
        let (tx, rx) = transport.into_split();
        let engine = Engine {
            tx,
            rx,
            shared: shared.clone(),
            out_codec: Deflater::new(self.compression_level),
            in_codec: Inflater::new(),
            frame_buf: Vec::with_capacity(BIG_FRAME_PAYLOAD + varint::MAX_WIDTH + 1),
            decode_buf: Vec::with_capacity(BIG_FRAME_PAYLOAD),
        };
        (engine, EngineHandle { shared })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Application-side handle to a running engine. Cheap to clone.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Send a request. Returns the response future, or `None` for a
    /// no-reply request.
    pub fn send_request(&self, buf: MessageBuf) -> Result<Option<ResponseFuture>> {
        self.shared.send_request(buf)
    }

    /// Send a response built with [`MessageBuf::response_to`]. Handlers
    /// that return their response directly do not need this; it exists
    /// for replies completed after the handler already returned.
    pub fn send_response(&self, buf: MessageBuf) -> Result<()> {
        self.shared.send_response(buf)
    }

    /// Ask the engine to shut down once nothing is in flight. In-flight
    /// requests and responses still complete first.
    pub fn close_when_idle(&self) {
        self.shared.close_when_idle.store(true, Ordering::Release);
        self.shared.check_idle_close();
    }

    /// Whether nothing is queued, frozen, or awaited.
    pub fn is_idle(&self) -> bool {
        self.shared.is_idle()
    }
}

/// A BLIP protocol engine bound to a transport.
pub struct Engine<T: Transport> {
    tx: T::Tx,
    rx: T::Rx,
    shared: Arc<Shared>,
    out_codec: Deflater,
    in_codec: Inflater,
    frame_buf: Vec<u8>,
    decode_buf: Vec<u8>,
}

impl<T: Transport> Engine<T> {
    /// Drive the send and receive loops until the connection ends.
    ///
    /// Completes `Ok` on a clean close (either side finishing an idle
    /// shutdown); protocol, codec, and transport failures surface here
    /// after teardown.
    pub async fn run(self) -> Result<()> {
        let Engine {
            tx,
            rx,
            shared,
            out_codec,
            in_codec,
            frame_buf,
            decode_buf,
        } = self;

        let (send_result, receive_result) = tokio::join!(
            send_loop(tx, shared.clone(), out_codec, frame_buf),
            receive_loop(rx, shared, in_codec, decode_buf),
        );
        receive_result.and(send_result)
    }
}

/// Pop messages, frame them, and write frames to the transport.
async fn send_loop<Tx: TransportTx>(
    mut tx: Tx,
    shared: Arc<Shared>,
    mut codec: Deflater,
    mut frame: Vec<u8>,
) -> Result<()> {
    loop {
        if shared.check_idle_close() {
            debug!("engine idle, closing transport");
            tx.close().await?;
            return Ok(());
        }

        let Some(mut msg) = shared.outbox.pop().await else {
            // Closed: idle shutdown or the receive loop tearing down.
            tx.close().await?;
            return Ok(());
        };

        let frame_size = if msg.urgent() || shared.outbox.queued() == 0 {
            BIG_FRAME_PAYLOAD
        } else {
            DEFAULT_FRAME_PAYLOAD
        };

        if let Err(e) = msg.next_frame(&mut frame, &mut codec, frame_size) {
            error!("frame encoding failed: {}", e);
            shared.outbox.close();
            shared.outbox.done_sending();
            let _ = tx.close().await;
            return Err(e);
        }
        trace!(
            "send frame #{} {} len={} finished={}",
            msg.number(),
            msg.message_type().name(),
            frame.len(),
            msg.finished()
        );

        if !msg.finished() {
            if msg.needs_ack() {
                debug!(
                    "freezing message #{} ({} bytes unacked)",
                    msg.number(),
                    msg.unacked_bytes()
                );
                shared.icebox.add(msg);
            } else {
                // Requeue behind other senders; a failure here just
                // means the outbox closed while we were framing.
                let _ = shared.outbox.push(msg);
            }
        }
        shared.outbox.done_sending();

        if let Err(e) = tx.send(Bytes::copy_from_slice(&frame)).await {
            error!("transport send failed: {}", e);
            shared.outbox.close();
            return Err(e.into());
        }
    }
}

/// Read frames from the transport and route them.
async fn receive_loop<Rx: TransportRx>(
    mut rx: Rx,
    shared: Arc<Shared>,
    mut codec: Inflater,
    mut decode_buf: Vec<u8>,
) -> Result<()> {
    let result = loop {
        let frame = match rx.receive().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!("transport receive failed: {}", e);
                break Err(BlipError::Io(e));
            }
        };
        if frame.is_empty() {
            debug!("transport closed by peer");
            break Ok(());
        }
        if let Err(e) = handle_frame(&shared, frame, &mut decode_buf, &mut codec) {
            error!("fatal protocol error: {}", e);
            break Err(e);
        }
        if shared.check_idle_close() {
            break Ok(());
        }
    };

    // Wake the send loop (which closes the transport) and fail anyone
    // still waiting on a response.
    shared.outbox.close();
    shared.fail_pending_responses();
    result
}

/// Parse and route one frame.
fn handle_frame(
    shared: &Arc<Shared>,
    frame: Bytes,
    decode_buf: &mut Vec<u8>,
    codec: &mut Inflater,
) -> Result<()> {
    let mut buf = frame;
    let number = varint::try_get(&mut buf)?;
    if buf.is_empty() {
        return Err(BlipError::BadFrame("missing flags byte"));
    }
    let frame_flags = buf.get_u8();
    if flags::has_flag(frame_flags, flags::RESERVED) {
        return Err(BlipError::BadFrame("reserved flag bit set"));
    }
    let payload = buf;
    let msg_type = MessageType::from_flags(frame_flags)?;
    trace!(
        "recv frame #{} {} len={}",
        number,
        msg_type.name(),
        payload.len()
    );

    match msg_type {
        MessageType::Request | MessageType::Response | MessageType::Error => {
            receive_data_frame(shared, msg_type, number, frame_flags, payload, decode_buf, codec)
        }
        MessageType::AckRequest | MessageType::AckResponse => {
            receive_ack_frame(shared, msg_type, number, &payload);
            Ok(())
        }
    }
}

/// Route a REQ/RES/ERR frame into its tracked message, feeding the
/// payload through the assembler and finishing or requeueing the result.
#[allow(clippy::too_many_arguments)]
fn receive_data_frame(
    shared: &Arc<Shared>,
    msg_type: MessageType,
    number: MessageNo,
    frame_flags: u8,
    payload: Bytes,
    decode_buf: &mut Vec<u8>,
    codec: &mut Inflater,
) -> Result<()> {
    let more_coming = flags::has_flag(frame_flags, flags::MORE_COMING);
    let is_request = msg_type == MessageType::Request;

    let mut msg = {
        let mut tracking = shared.tracking.lock().expect("tracking lock");
        if is_request {
            if number == tracking.in_number + 1 {
                tracking.in_number = number;
                MessageIn::incoming(number, frame_flags)
            } else if number <= tracking.in_number {
                tracking
                    .requests
                    .remove(&number)
                    .ok_or(BlipError::BadMessageNumber {
                        number,
                        reason: "duplicate request number",
                    })?
            } else {
                return Err(BlipError::BadMessageNumber {
                    number,
                    reason: "request number out of order",
                });
            }
        } else {
            tracking
                .responses
                .remove(&number)
                .ok_or(BlipError::BadMessageNumber {
                    number,
                    reason: "unknown response number",
                })?
        }
    };

    let ack = msg.add_frame(frame_flags, payload, decode_buf, codec)?;
    if let Some(ack) = ack {
        trace!("queueing {} for #{}", ack.message_type().name(), number);
        let _ = shared.outbox.push(ack);
    }

    if more_coming {
        let mut tracking = shared.tracking.lock().expect("tracking lock");
        if is_request {
            tracking.requests.insert(number, msg);
        } else {
            tracking.responses.insert(number, msg);
        }
        return Ok(());
    }

    // Final frame: complete the response awaiter or dispatch the request.
    if let Some(notifier) = msg.take_notifier() {
        let _ = notifier.send(msg);
    } else if is_request {
        dispatch(shared, msg);
    } else {
        debug!("completed response #{} had no awaiter", number);
    }
    Ok(())
}

/// Invoke the handler for a completed request and send its reply.
fn dispatch(shared: &Arc<Shared>, request: MessageIn) {
    let Some(handler) = shared.handlers.resolve(request.profile()) else {
        debug!(
            "no handler for profile {:?} (request #{})",
            request.profile(),
            request.number()
        );
        if !request.no_reply() {
            let reply = MessageBuf::error_response(DOMAIN_BLIP, CODE_NO_HANDLER, "No handler")
                .response_to(request.number());
            let _ = shared.send_response(reply);
        }
        return;
    };

    match handler.handle(&request) {
        Ok(Some(response)) => {
            if request.no_reply() {
                warn!(
                    "handler returned a response to no-reply request #{}",
                    request.number()
                );
                return;
            }
            let response = response.response_to(request.number());
            if let Err(e) = shared.send_response(response) {
                debug!("response to #{} dropped: {}", request.number(), e);
            }
        }
        Ok(None) => {}
        Err(e) => {
            warn!("handler for request #{} failed: {}", request.number(), e);
            if !request.no_reply() {
                let reply =
                    MessageBuf::handler_failure(&e.to_string()).response_to(request.number());
                let _ = shared.send_response(reply);
            }
        }
    }
}

/// Route an incoming ACK to the in-flight message it refers to, thawing
/// it out of the icebox if the peer has caught up enough.
fn receive_ack_frame(shared: &Arc<Shared>, ack_type: MessageType, number: MessageNo, body: &[u8]) {
    let target = ack_type.acked_type();

    if let Some(result) = shared.outbox.update(target, number, |m| m.handle_ack(body)) {
        if let Err(e) = result {
            warn!("bad ACK body for #{}: {}", number, e);
        }
        return;
    }

    if let Some(mut msg) = shared.icebox.take(target, number) {
        if let Err(e) = msg.handle_ack(body) {
            warn!("bad ACK body for #{}: {}", number, e);
        }
        if msg.needs_ack() {
            shared.icebox.add(msg);
        } else {
            debug!("thawing message #{}", number);
            let _ = shared.outbox.push(msg);
        }
        return;
    }

    // Benign: the message may have finished sending before the ACK
    // crossed the wire.
    warn!("ACK for {} #{} not in flight", target.name(), number);
}
