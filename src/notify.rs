//! Notification batching.
//!
//! A burst of child-observer callbacks inside one logical tick must reach
//! the downstream listener as a single call that observes the final state of
//! the burst. The batcher is an explicitly constructed scheduler instance
//! owned by the client, not ambient global state, so tests can exercise it
//! in isolation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

type Job = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct BatchQueue {
    /// Open `batch` scopes. While non-zero, scheduled jobs are deferred.
    transactions: usize,
    queue: Vec<Job>,
}

/// Coalesces notifications fired within one logical tick.
///
/// A tick is opened with [`NotifyBatcher::batch`]. Work scheduled while a
/// tick is open runs when the outermost scope closes; outside any tick it
/// runs immediately. [`NotifyBatcher::batch_calls`] additionally dedupes a
/// callback so one tick fires it at most once.
#[derive(Default)]
pub struct NotifyBatcher {
    inner: Mutex<BatchQueue>,
}

impl NotifyBatcher {
    /// Create a new batcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` inside a logical tick. Jobs scheduled during `f` are flushed
    /// after `f` returns (and after the lock is released, so flushed jobs
    /// may schedule and lock freely).
    pub fn batch<T>(&self, f: impl FnOnce() -> T) -> T {
        self.inner.lock().transactions += 1;
        // The tick must close even if `f` unwinds; a stuck-open tick would
        // defer every later notification forever.
        let _tick = TickGuard { batcher: self };
        f()
    }

    fn close_tick(&self) {
        let jobs = {
            let mut inner = self.inner.lock();
            inner.transactions -= 1;
            if inner.transactions == 0 {
                std::mem::take(&mut inner.queue)
            } else {
                Vec::new()
            }
        };
        for job in jobs {
            job();
        }
    }

    /// Schedule a job: deferred to the end of the current tick, or run
    /// immediately when no tick is open.
    pub fn schedule(&self, job: Job) {
        let deferred = {
            let mut inner = self.inner.lock();
            if inner.transactions > 0 {
                inner.queue.push(job);
                None
            } else {
                Some(job)
            }
        };
        if let Some(job) = deferred {
            job();
        }
    }

    /// Wrap a callback so that any number of invocations within one tick
    /// collapse into a single call at the end of the tick. The deferred call
    /// runs after the burst, so it observes the latest state, never an
    /// intermediate one.
    pub fn batch_calls(
        self: &Arc<Self>,
        callback: Arc<dyn Fn() + Send + Sync>,
    ) -> Arc<dyn Fn() + Send + Sync> {
        let batcher = Arc::clone(self);
        let scheduled = Arc::new(AtomicBool::new(false));
        Arc::new(move || {
            if scheduled.swap(true, Ordering::AcqRel) {
                // Already queued for this tick.
                return;
            }
            let scheduled = Arc::clone(&scheduled);
            let callback = Arc::clone(&callback);
            batcher.schedule(Box::new(move || {
                scheduled.store(false, Ordering::Release);
                callback();
            }));
        })
    }
}

struct TickGuard<'a> {
    batcher: &'a NotifyBatcher,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.batcher.close_tick();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn schedule_outside_batch_runs_immediately() {
        let batcher = Arc::new(NotifyBatcher::new());
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        batcher.schedule(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn batch_defers_until_scope_closes() {
        let batcher = Arc::new(NotifyBatcher::new());
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        batcher.batch(|| {
            batcher.schedule(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
            assert_eq!(count.load(Ordering::SeqCst), 0);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn batch_calls_coalesces_a_burst_into_one_call() {
        let batcher = Arc::new(NotifyBatcher::new());
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let wrapped = batcher.batch_calls(Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        batcher.batch(|| {
            wrapped();
            wrapped();
            wrapped();
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // The wrapper is reusable for the next tick.
        batcher.batch(|| {
            wrapped();
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn batch_calls_fires_immediately_outside_a_tick() {
        let batcher = Arc::new(NotifyBatcher::new());
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let wrapped = batcher.batch_calls(Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        wrapped();
        wrapped();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn a_panicking_scope_still_closes_its_tick() {
        let batcher = Arc::new(NotifyBatcher::new());
        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            batcher.batch(|| panic!("scope failed"));
        }));
        assert!(panicked.is_err());

        // The tick closed during unwinding, so scheduling is immediate again.
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        batcher.schedule(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_batches_flush_once_at_the_outermost_scope() {
        let batcher = Arc::new(NotifyBatcher::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&order);
        batcher.batch(|| {
            batcher.batch(|| {
                let o = Arc::clone(&o);
                batcher.schedule(Box::new(move || o.lock().push("job")));
            });
            // Inner scope closed, but the outer one is still open.
            o.lock().push("body");
        });
        assert_eq!(*order.lock(), vec!["body", "job"]);
    }
}
