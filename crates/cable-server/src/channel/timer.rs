//! Periodic timers.
//!
//! Each timer is a loop that sleeps one interval, submits one occurrence to
//! the connection's lane, and waits for it to finish before sleeping again.
//! At most one occurrence per timer is ever in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::worker::Lane;

/// One occurrence of a timer. Errors are routed to the channel by the caller.
pub(crate) type Occurrence = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub(crate) struct PeriodicTimer {
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    running: Arc<Mutex<()>>,
}

impl PeriodicTimer {
    pub(crate) fn start(every: Duration, lane: Lane, occurrence: Occurrence) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let running = Arc::new(Mutex::new(()));

        let _ = tokio::spawn(schedule(
            every,
            lane,
            occurrence,
            active.clone(),
            cancel.clone(),
            running.clone(),
        ));

        Self {
            active,
            cancel,
            running,
        }
    }

    /// Stop scheduling and wait out an occurrence that is already running.
    pub(crate) async fn stop(&self) {
        self.active.store(false, Ordering::Release);
        self.cancel.cancel();
        let _running = self.running.lock().await;
    }
}

async fn schedule(
    every: Duration,
    lane: Lane,
    occurrence: Occurrence,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    running: Arc<Mutex<()>>,
) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(every) => {}
            () = cancel.cancelled() => break,
        }
        if !active.load(Ordering::Acquire) {
            break;
        }

        let active = active.clone();
        let running = running.clone();
        let occurrence = occurrence.clone();
        let handle = lane.submit(None, async move {
            let _guard = running.lock().await;
            if active.load(Ordering::Acquire) {
                occurrence().await;
            }
            Ok(())
        });
        if !handle.wait().await {
            break;
        }
    }
    trace!("periodic timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerPool;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting(count: &Arc<AtomicUsize>) -> Occurrence {
        let count = count.clone();
        Arc::new(move || {
            let count = count.clone();
            async move {
                let _ = count.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fires_each_interval() {
        let lane = WorkerPool::new(1).lane("timer");
        let count = Arc::new(AtomicUsize::new(0));
        let timer = PeriodicTimer::start(Duration::from_secs(1), lane, counting(&count));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        timer.stop().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_fires_after_stop() {
        let lane = WorkerPool::new(1).lane("timer");
        let count = Arc::new(AtomicUsize::new(0));
        let timer = PeriodicTimer::start(Duration::from_secs(1), lane, counting(&count));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        timer.stop().await;
        let seen = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_running_occurrence() {
        let lane = WorkerPool::new(1).lane("timer");
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let occurrence: Occurrence = Arc::new(move || {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                flag.store(true, Ordering::SeqCst);
            }
            .boxed()
        });
        let timer = PeriodicTimer::start(Duration::from_secs(1), lane, occurrence);

        // First occurrence starts at 1s and is mid-sleep at 1.5s.
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        timer.stop().await;
        assert!(finished.load(Ordering::SeqCst));
    }
}
