//! One-shot timers used to wake the event log when a future event falls due

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Cancel token for a scheduled callback.
///
/// Dropping the handle detaches the timer, it still fires. Call [`TimerHandle::cancel`]
/// to stop it.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Something that can run a callback after a delay
pub trait Scheduler: Send + Sync {
    fn schedule(&self, after: Duration, callback: TimerCallback) -> TimerHandle;
}

/// Scheduler backed by the tokio runtime
#[derive(Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime we are currently running inside
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, after: Duration, callback: TimerCallback) -> TimerHandle {
        let task = self.handle.spawn(async move {
            tokio::time::sleep(after).await;
            // The callback takes a blocking lock on the event log
            if let Err(e) = tokio::task::spawn_blocking(callback).await {
                tracing::error!(error = %e, "Timer callback panicked");
            }
        });
        let abort = task.abort_handle();
        TimerHandle::new(move || abort.abort())
    }
}

struct PendingTimer {
    id: u64,
    after: Duration,
    callback: TimerCallback,
}

#[derive(Default)]
struct ManualInner {
    next_id: u64,
    pending: Vec<PendingTimer>,
    requested: Vec<Duration>,
    cancelled: usize,
}

/// Scheduler whose timers only fire when the owner says so.
///
/// Records every requested delay so callers can assert on what was armed.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ManualInner>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay ever requested, in request order
    pub fn requested(&self) -> Vec<f64> {
        self.inner
            .lock()
            .requested
            .iter()
            .map(Duration::as_secs_f64)
            .collect()
    }

    /// Delays of timers which are still armed
    pub fn pending(&self) -> Vec<f64> {
        self.inner
            .lock()
            .pending
            .iter()
            .map(|t| t.after.as_secs_f64())
            .collect()
    }

    pub fn cancelled(&self) -> usize {
        self.inner.lock().cancelled
    }

    pub fn clear_history(&self) {
        let mut inner = self.inner.lock();
        inner.requested.clear();
        inner.cancelled = 0;
    }

    /// Fire every armed timer. Returns how many fired.
    pub fn fire_all(&self) -> usize {
        let due = std::mem::take(&mut self.inner.lock().pending);
        let count = due.len();
        // Run outside the lock, callbacks usually re-arm.
        for timer in due {
            (timer.callback)();
        }
        count
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, after: Duration, callback: TimerCallback) -> TimerHandle {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.requested.push(after);
            inner.pending.push(PendingTimer {
                id,
                after,
                callback,
            });
            id
        };
        debug!(timer = id, after = ?after, "Manual timer armed");

        let inner = Arc::clone(&self.inner);
        TimerHandle::new(move || {
            let mut inner = inner.lock();
            let before = inner.pending.len();
            inner.pending.retain(|t| t.id != id);
            if inner.pending.len() != before {
                inner.cancelled += 1;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn manual_timer_fires_on_demand() {
        let scheduler = ManualScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _handle = scheduler.schedule(
            Duration::from_secs(5),
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(scheduler.pending(), vec![5.0]);
        assert_eq!(scheduler.fire_all(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(scheduler.pending().is_empty());
    }

    #[test]
    fn cancelled_manual_timer_never_fires() {
        let scheduler = ManualScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let handle = scheduler.schedule(
            Duration::from_secs(1),
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        handle.cancel();

        assert_eq!(scheduler.fire_all(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.cancelled(), 1);
        assert_eq!(scheduler.requested(), vec![1.0]);
    }

    #[tokio::test]
    async fn tokio_timer_can_be_cancelled() {
        let scheduler = TokioScheduler::current();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let keep = scheduler.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let h = Arc::clone(&hits);
        let dropped = scheduler.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                h.fetch_add(10, Ordering::SeqCst);
            }),
        );
        dropped.cancel();
        drop(keep);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
