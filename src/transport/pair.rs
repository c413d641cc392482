//! In-memory connected transport pair.
//!
//! Two endpoints joined by bounded channels, used by the test suite and
//! by applications that want to run two engines in one process. The
//! bounded channel doubles as the byte-in-flight cap a real transport
//! would enforce: `send` parks once the peer falls behind.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::Notify;

use super::{Transport, TransportRx, TransportTx};

/// Shared local-close signal between the two halves of one endpoint.
#[derive(Debug, Default)]
struct CloseFlag {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseFlag {
    fn set(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_set(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// One endpoint of an in-memory transport pair.
#[derive(Debug)]
pub struct PairTransport {
    tx: PairTx,
    rx: PairRx,
}

/// Sending half of a [`PairTransport`].
#[derive(Debug)]
pub struct PairTx {
    sender: Option<mpsc::Sender<Bytes>>,
    local: Arc<CloseFlag>,
}

/// Receiving half of a [`PairTransport`].
#[derive(Debug)]
pub struct PairRx {
    receiver: mpsc::Receiver<Bytes>,
    local: Arc<CloseFlag>,
}

/// Create two connected endpoints with the given per-direction frame
/// capacity. With 32 KiB frames, a capacity of 16 approximates a 512 KiB
/// in-flight byte cap.
pub fn pair(capacity: usize) -> (PairTransport, PairTransport) {
    let (a_to_b, from_a) = mpsc::channel(capacity);
    let (b_to_a, from_b) = mpsc::channel(capacity);
    let a_flag = Arc::new(CloseFlag::default());
    let b_flag = Arc::new(CloseFlag::default());

    let a = PairTransport {
        tx: PairTx {
            sender: Some(a_to_b),
            local: a_flag.clone(),
        },
        rx: PairRx {
            receiver: from_b,
            local: a_flag,
        },
    };
    let b = PairTransport {
        tx: PairTx {
            sender: Some(b_to_a),
            local: b_flag.clone(),
        },
        rx: PairRx {
            receiver: from_a,
            local: b_flag,
        },
    };
    (a, b)
}

impl Transport for PairTransport {
    type Tx = PairTx;
    type Rx = PairRx;

    fn into_split(self) -> (PairTx, PairRx) {
        (self.tx, self.rx)
    }
}

impl TransportTx for PairTx {
    fn can_send(&self) -> bool {
        !self.local.is_set()
            && self
                .sender
                .as_ref()
                .map(|s| !s.is_closed())
                .unwrap_or(false)
    }

    async fn send(&mut self, frame: Bytes) -> io::Result<()> {
        if self.local.is_set() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        sender
            .send(frame)
            .await
            .map_err(|_| io::ErrorKind::BrokenPipe.into())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.disconnect();
        Ok(())
    }

    fn disconnect(&mut self) {
        // Dropping the sender is the close frame: the peer's receive
        // drains the channel and then yields an empty frame.
        self.sender = None;
        self.local.set();
    }
}

impl TransportRx for PairRx {
    fn can_receive(&self) -> bool {
        !self.local.is_set()
    }

    async fn receive(&mut self) -> io::Result<Bytes> {
        loop {
            if self.local.is_set() {
                return Ok(Bytes::new());
            }
            let notified = self.local.notify.notified();
            tokio::select! {
                frame = self.receiver.recv() => {
                    return Ok(frame.unwrap_or_default());
                }
                _ = notified => {}
            }
        }
    }
}
