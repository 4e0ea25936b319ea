//! Server-side handle on one client WebSocket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cable_core::Signal;
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound half of a client WebSocket.
///
/// Frames are queued to the session's writer task. Closing completes the
/// [`closed`](Self::closed) signal, which stops both the reader loop and
/// the writer once the queue has been flushed.
pub struct ClientSocket {
    tx: mpsc::Sender<Arc<String>>,
    alive: AtomicBool,
    closed: Signal,
    /// Count of frames dropped because the queue was full or gone.
    pub dropped_messages: AtomicU64,
}

impl ClientSocket {
    /// Wrap the sender feeding the session writer.
    pub fn new(tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            tx,
            alive: AtomicBool::new(true),
            closed: Signal::new(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// A socket and the receiver its writer task drains.
    pub fn pair(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self::new(tx)), rx)
    }

    /// Queue a text frame.
    ///
    /// Returns `false` if the socket is closed or the queue is full.
    pub fn transmit(&self, text: String) -> bool {
        if !self.is_alive() {
            return false;
        }
        if self.tx.try_send(Arc::new(text)).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            debug!("outbound frame dropped");
            false
        }
    }

    /// Close the socket. Idempotent.
    pub fn close(&self) {
        self.alive.store(false, Ordering::Release);
        let _ = self.closed.complete();
    }

    /// Whether frames are still accepted.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Completes once the socket is closed from either side.
    pub fn closed(&self) -> &Signal {
        &self.closed
    }

    /// Total frames dropped for this socket.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}
