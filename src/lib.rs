//! # blip
//!
//! A [BLIP](https://github.com/couchbaselabs/BLIP-Cpp/blob/master/docs/BLIP%20Protocol.md)-style
//! message-multiplexing engine over a bidirectional binary-frame
//! transport (typically a WebSocket negotiating the `BLIP_3`
//! subprotocol).
//!
//! BLIP layers request/response semantics onto a plain frame pipe:
//! messages carry ordered string properties and a binary body, large
//! messages stream as interleaved frames, bodies can be deflated with a
//! per-frame checksum splice, and receivers pace senders with byte-count
//! acknowledgments that freeze and thaw in-flight messages.
//!
//! ## Architecture
//!
//! - **Engine** ([`EngineBuilder`], [`Engine`], [`EngineHandle`]): the
//!   send and receive loops, frame routing, and handler dispatch.
//! - **Messages** ([`MessageBuf`], [`MessageIn`]): builder for outgoing
//!   messages, assembler for incoming ones.
//! - **Transport** ([`transport::Transport`]): the frame pipe contract,
//!   plus an in-memory [`transport::pair`] for tests and demos.
//!
//! ## Example
//!
//! ```
//! use blip::{EngineBuilder, MessageBuf, MessageIn};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> blip::Result<()> {
//! let (here, there) = blip::transport::pair(16);
//!
//! let (peer, peer_handle) = EngineBuilder::new()
//!     .on_request("Greet", |req: &MessageIn| {
//!         let name = req.property_or("Name", "stranger");
//!         Ok(Some(MessageBuf::response().body_string(&format!("hello, {name}"))))
//!     })
//!     .build(there);
//! let (local, local_handle) = EngineBuilder::new().build(here);
//! let peer_task = tokio::spawn(peer.run());
//! let local_task = tokio::spawn(local.run());
//!
//! let reply = local_handle
//!     .send_request(MessageBuf::request().profile("Greet").property("Name", "ada"))?
//!     .expect("reply expected")
//!     .response()
//!     .await?;
//! assert_eq!(reply.body_string(), "hello, ada");
//!
//! local_handle.close_when_idle();
//! peer_handle.close_when_idle();
//! local_task.await.unwrap()?;
//! peer_task.await.unwrap()?;
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod codec;
pub mod error;
pub mod handler;
pub mod message;
pub mod outbox;
pub mod protocol;
pub mod transport;
pub mod varint;

mod engine;

pub use engine::{Engine, EngineBuilder, EngineHandle, ResponseFuture};
pub use error::{BlipError, Result};
pub use handler::Handler;
pub use message::{MessageBuf, MessageIn, PropertiesIter};
pub use protocol::{subprotocol_token, MessageNo, MessageType};
