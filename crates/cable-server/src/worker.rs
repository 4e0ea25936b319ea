//! Worker pool for user callbacks.
//!
//! Every connection owns a [`Lane`]. Jobs submitted to one lane run strictly
//! one at a time in submission order; jobs on different lanes run
//! concurrently, bounded by the pool's permit count. A failing or panicking
//! job never escapes the lane: the error goes to the submitter's
//! [`ExceptionHandler`] when there is one, otherwise it is logged.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cable_core::{CableError, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{Instrument, error, trace};

use crate::metrics::WORKER_ERRORS_TOTAL;

/// Receives errors raised by jobs submitted on its behalf.
pub trait ExceptionHandler: Send + Sync {
    /// Called once per failed job, on the lane that ran it.
    fn handle_exception(&self, error: &CableError);
}

struct Envelope {
    ready: Option<BoxFuture<'static, ()>>,
    job: BoxFuture<'static, Result<()>>,
    handler: Option<Arc<dyn ExceptionHandler>>,
    done: oneshot::Sender<()>,
}

/// Bounded pool of execution permits shared by all lanes.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Pool allowing `size` jobs to run at once (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Configured concurrency.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Open a new serial lane. Must be called inside a Tokio runtime.
    ///
    /// The lane's drain task exits once every clone of the lane is dropped
    /// and its queue is empty.
    pub fn lane(&self, label: impl Into<String>) -> Lane {
        let label: Arc<str> = Arc::from(label.into());
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tokio::spawn(drain(label.clone(), self.permits.clone(), rx));
        Lane { tx, label }
    }
}

/// Serial execution queue for one connection.
#[derive(Clone)]
pub struct Lane {
    tx: mpsc::UnboundedSender<Envelope>,
    label: Arc<str>,
}

impl Lane {
    /// Queue `job` behind everything already submitted to this lane.
    pub fn submit<F>(&self, handler: Option<Arc<dyn ExceptionHandler>>, job: F) -> JobHandle
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.enqueue(None, handler, job)
    }

    /// Queue `job`, holding the lane but no pool permit until `ready` resolves.
    ///
    /// Later jobs on this lane still wait behind it; other lanes do not.
    pub fn submit_when<R, F>(
        &self,
        ready: R,
        handler: Option<Arc<dyn ExceptionHandler>>,
        job: F,
    ) -> JobHandle
    where
        R: Future<Output = ()> + Send + 'static,
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.enqueue(Some(ready.boxed()), handler, job)
    }

    fn enqueue<F>(
        &self,
        ready: Option<BoxFuture<'static, ()>>,
        handler: Option<Arc<dyn ExceptionHandler>>,
        job: F,
    ) -> JobHandle
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let (done, rx) = oneshot::channel();
        let envelope = Envelope {
            ready,
            job: job.in_current_span().boxed(),
            handler,
            done,
        };
        if self.tx.send(envelope).is_err() {
            error!(lane = %self.label, "lane closed, job dropped");
        }
        JobHandle { rx }
    }
}

/// Completion handle for a submitted job.
pub struct JobHandle {
    rx: oneshot::Receiver<()>,
}

impl JobHandle {
    /// Wait for the job to finish. Returns `false` if it never ran.
    pub async fn wait(self) -> bool {
        self.rx.await.is_ok()
    }
}

async fn drain(label: Arc<str>, permits: Arc<Semaphore>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        if let Some(ready) = envelope.ready {
            ready.await;
        }
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        trace!(lane = %label, "job started");
        let result = catch_panic(envelope.job).await;
        drop(permit);

        if let Err(e) = result {
            counter!(WORKER_ERRORS_TOTAL).increment(1);
            match envelope.handler {
                Some(handler) => handler.handle_exception(&e),
                None => error!(
                    lane = %label,
                    category = %e.category(),
                    error = %e,
                    "There was an exception - {e}"
                ),
            }
        }
        let _ = envelope.done.send(());
    }
    trace!(lane = %label, "lane drained");
}

/// Run `fut`, turning a panic into [`CableError::Panicked`].
pub(crate) async fn catch_panic<T, F>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(CableError::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use cable_core::logging::capture_logs;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        errors: Mutex<Vec<String>>,
    }

    impl ExceptionHandler for Recorder {
        fn handle_exception(&self, error: &CableError) {
            self.errors.lock().push(error.to_string());
        }
    }

    fn explode() -> Result<()> {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn lane_runs_jobs_in_submission_order() {
        let pool = WorkerPool::new(4);
        let lane = pool.lane("conn-1");
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5u64 {
            let order = order.clone();
            handles.push(lane.submit(None, async move {
                // Later jobs sleep less; ordering must still hold.
                tokio::time::sleep(Duration::from_millis(10 * (5 - i))).await;
                order.lock().push(i);
                Ok(())
            }));
        }
        for h in handles {
            assert!(h.wait().await);
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn lane_never_overlaps_jobs() {
        let pool = WorkerPool::new(4);
        let lane = pool.lane("conn-1");
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(lane.submit(None, async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                let _ = in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        for h in handles {
            let _ = h.wait().await;
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_lanes_run_concurrently() {
        let pool = WorkerPool::new(2);
        let a = pool.lane("a");
        let b = pool.lane("b");
        let (tx, rx) = oneshot::channel::<()>();

        // Lane a blocks until lane b signals; deadlocks if lanes were serialized together.
        let first = a.submit(None, async move {
            let _ = rx.await;
            Ok(())
        });
        let second = b.submit(None, async move {
            let _ = tx.send(());
            Ok(())
        });

        let both = async { (first.wait().await, second.wait().await) };
        let (x, y) = tokio::time::timeout(Duration::from_secs(5), both)
            .await
            .unwrap();
        assert!(x && y);
    }

    #[tokio::test]
    async fn gated_job_holds_no_permit_while_waiting() {
        let pool = WorkerPool::new(1);
        let stuck = pool.lane("stuck");
        let other = pool.lane("other");
        let (open, gate) = oneshot::channel::<()>();

        let gated = stuck.submit_when(
            async move {
                let _ = gate.await;
            },
            None,
            async { Ok(()) },
        );
        let behind = stuck.submit(None, async { Ok(()) });
        let unrelated = other.submit(None, async { Ok(()) });

        let ran = tokio::time::timeout(Duration::from_secs(5), unrelated.wait())
            .await
            .unwrap();
        assert!(ran);
        assert_eq!(pool.available(), 1);

        let _ = open.send(());
        assert!(gated.wait().await);
        assert!(behind.wait().await);
    }

    #[tokio::test]
    async fn catch_panic_converts_to_error() {
        let result = catch_panic(async { explode() }).await;
        assert!(matches!(result, Err(CableError::Panicked(ref msg)) if msg == "kaboom"));
        assert_eq!(catch_panic(async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn pool_size_bounds_concurrency() {
        let pool = WorkerPool::new(1);
        let a = pool.lane("a");
        let b = pool.lane("b");
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for lane in [&a, &b, &a, &b] {
            let running = running.clone();
            let max_seen = max_seen.clone();
            handles.push(lane.submit(None, async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        for h in handles {
            let _ = h.wait().await;
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn errors_go_to_exception_handler() {
        let pool = WorkerPool::new(1);
        let lane = pool.lane("conn");
        let recorder = Arc::new(Recorder::default());

        let handle = lane.submit(Some(recorder.clone()), async {
            Err(CableError::callback("boom"))
        });
        assert!(handle.wait().await);
        assert_eq!(*recorder.errors.lock(), vec!["callback failed: boom"]);
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let pool = WorkerPool::new(1);
        let lane = pool.lane("conn");
        let recorder = Arc::new(Recorder::default());

        let handle = lane.submit(Some(recorder.clone()), async { explode() });
        assert!(handle.wait().await);
        assert_eq!(*recorder.errors.lock(), vec!["callback panicked: kaboom"]);

        // The lane keeps working after a panic.
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        let next = lane.submit(None, async move {
            let _ = flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(next.wait().await);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_without_handler_are_logged() {
        let (logs, _guard) = capture_logs();
        let pool = WorkerPool::new(1);
        let lane = pool.lane("conn-9");

        let handle = lane.submit(None, async { Err(CableError::callback("lost")) });
        assert!(handle.wait().await);
        assert!(logs.has_event(tracing::Level::ERROR, "There was an exception"));
        assert!(logs.has_field("lane", "conn-9"));
    }

    #[test]
    fn pool_size_is_at_least_one() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }
}
