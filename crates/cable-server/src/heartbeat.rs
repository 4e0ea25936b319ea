//! Heartbeat pings.
//!
//! The loop sleeps one interval, checks the `beating` flag, pings, and only
//! then schedules the next sleep. Clearing the flag therefore stops it
//! without preempting a ping that is already on its way.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cable_core::protocol::ping_frame;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::socket::ClientSocket;

/// Why the heartbeat loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The `beating` flag was cleared.
    Stopped,
    /// The token was cancelled while sleeping.
    Cancelled,
    /// The socket stopped accepting frames.
    SocketClosed,
}

/// Ping `socket` every `interval` while `beating` stays set.
pub async fn run_heartbeat(
    socket: Arc<ClientSocket>,
    interval: Duration,
    beating: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> HeartbeatResult {
    loop {
        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
        if !beating.load(Ordering::Acquire) {
            return HeartbeatResult::Stopped;
        }
        if !socket.is_alive() {
            return HeartbeatResult::SocketClosed;
        }
        trace!("beat");
        let _ = socket.transmit(ping_frame(Utc::now()));
    }
}
