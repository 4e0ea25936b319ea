//! One-shot completion latch.
//!
//! A [`Signal`] starts pending and can be completed exactly once. Any number
//! of tasks may [`wait`](Signal::wait) on it; waiters registered before or
//! after completion both resolve. Connections use one for "opened" and one
//! for "closed".

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Clonable one-shot latch.
#[derive(Clone, Debug)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    /// A pending signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Complete the signal, waking every waiter.
    ///
    /// Returns `false` if it was already completed.
    pub fn complete(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Whether [`complete`](Self::complete) has been called.
    pub fn is_completed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Suspend until the signal completes.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Suspend until the signal completes or `timeout` elapses.
    ///
    /// Returns whether the signal completed.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_pending() {
        let s = Signal::new();
        assert!(!s.is_completed());
    }

    #[test]
    fn complete_once() {
        let s = Signal::new();
        assert!(s.complete());
        assert!(!s.complete());
        assert!(s.is_completed());
    }

    #[tokio::test]
    async fn wait_after_completion_returns() {
        let s = Signal::new();
        let _ = s.complete();
        s.wait().await;
    }

    #[tokio::test]
    async fn waiters_wake_on_complete() {
        let s = Signal::new();
        let s2 = s.clone();
        let handle = tokio::spawn(async move {
            s2.wait().await;
            true
        });
        tokio::task::yield_now().await;
        let _ = s.complete();
        assert!(handle.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_expires() {
        let s = Signal::new();
        assert!(!s.wait_timeout(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn wait_timeout_completes() {
        let s = Signal::new();
        let _ = s.complete();
        assert!(s.wait_timeout(Duration::from_millis(100)).await);
    }

    #[test]
    fn clones_share_state() {
        let s = Signal::default();
        let s2 = s.clone();
        let _ = s2.complete();
        assert!(s.is_completed());
    }
}
