//! The framed binary transport the engine runs over.
//!
//! The engine is transport-agnostic: anything that can carry opaque
//! binary frames in order, both ways, will do — in practice a WebSocket
//! in binary mode negotiating the `BLIP_3` subprotocol. The handshake,
//! TLS, and reconnection all belong to the transport, not to the engine.
//!
//! A transport splits into independent send and receive halves, one per
//! engine loop. Back-pressure is the transport's job too: `send` should
//! simply not resolve while too many bytes are in flight.

use std::future::Future;
use std::io;

use bytes::Bytes;

mod pair;

pub use pair::{pair, PairTransport, PairTx, PairRx};

/// A connected bidirectional framed transport.
pub trait Transport: Send + 'static {
    /// The sending half.
    type Tx: TransportTx;
    /// The receiving half.
    type Rx: TransportRx;

    /// Split into independent halves, one per engine loop.
    fn into_split(self) -> (Self::Tx, Self::Rx);
}

/// The sending half of a transport.
pub trait TransportTx: Send + 'static {
    /// Whether frames can still be sent.
    fn can_send(&self) -> bool;

    /// Send one frame. Resolving may be delayed for back-pressure.
    fn send(&mut self, frame: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Close gracefully. The peer's `receive` yields an empty frame, and
    /// so does the local receiving half once the closing exchange ends.
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Tear down immediately without a closing exchange.
    fn disconnect(&mut self);
}

/// The receiving half of a transport.
pub trait TransportRx: Send + 'static {
    /// Whether frames can still arrive.
    fn can_receive(&self) -> bool;

    /// Receive one frame. An empty frame means the connection closed
    /// cleanly; errors mean it did not.
    fn receive(&mut self) -> impl Future<Output = io::Result<Bytes>> + Send;
}
