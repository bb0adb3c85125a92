//! The data-parallel execution primitive the renderer's three per-frame
//! join points (vertex shading, triangle setup, tile filling — spec §5) are
//! built on, plus a simple rendezvous barrier for callers that need a
//! fixed-size cohort of workers to reach the same point before continuing.
//!
//! The renderer never synchronizes mid-call: every suspension point in
//! `nyuzi_render` is a `parallel_execute` boundary, so there's no need for a
//! persistent worker pool with a job queue. Each call spawns scoped threads
//! that drain a shared atomic cursor over `0..n` and joins them before
//! returning — the pool "boundary" the spec describes falls naturally out
//! of `std::thread::scope`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;

use nyuzi_common::{log_debug, LogCategory};

fn category() -> LogCategory {
    LogCategory::new("jobs")
}

/// Runs `f(i)` once for every `i` in `0..n`, across worker threads, and
/// returns only once every call has completed. Matches the hardware's
/// `parallel_execute(fn, ctx, n)` (spec §5): the caller supplies its own
/// context by capturing it in the closure rather than threading a `ctx`
/// pointer through, which is the idiomatic Rust shape for the same contract.
pub fn parallel_execute(n: usize, worker_count: usize, f: impl Fn(usize) + Sync) {
    if n == 0 {
        return;
    }
    let worker_count = worker_count.max(1).min(n);
    if worker_count == 1 {
        for i in 0..n {
            f(i);
        }
        return;
    }

    log_debug!(category(), "parallel_execute: n={n} workers={worker_count}");
    let cursor = AtomicUsize::new(0);
    let f = &f;
    let cursor = &cursor;
    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            scope.spawn(move || loop {
                let i = cursor.fetch_add(1, Ordering::Relaxed);
                if i >= n {
                    break;
                }
                f(i);
            });
        }
    });
}

/// The number of worker threads [`parallel_execute`] should use absent an
/// explicit override: the host's available parallelism, or 1 if that can't
/// be determined.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// A rendezvous point for a fixed-size cohort of threads: every caller of
/// [`Rendezvous::wait`] blocks until `count` callers have all arrived, then
/// all are released together. Grounded directly on the original firmware's
/// spin-counting `Barrier::wait()`, but built on `std::sync::Barrier` rather
/// than a busy-wait loop since these threads are OS threads, not bare
/// hardware strands with nothing better to do while they wait.
pub struct Rendezvous {
    inner: Barrier,
}

impl Rendezvous {
    pub fn new(count: usize) -> Self {
        Self { inner: Barrier::new(count.max(1)) }
    }

    pub fn wait(&self) {
        self.inner.wait();
    }
}

/// A multi-use `parallel_execute` driver: holds the worker count so callers
/// that invoke it every frame (the render context does, at each of its
/// three join points) don't have to recompute or pass it at each call site.
pub struct JobSystem {
    worker_count: usize,
}

impl JobSystem {
    pub fn new(worker_count: usize) -> Self {
        Self { worker_count: worker_count.max(1) }
    }

    pub fn with_default_workers() -> Self {
        Self::new(default_worker_count())
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn parallel_execute(&self, n: usize, f: impl Fn(usize) + Sync) {
        parallel_execute(n, self.worker_count, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn parallel_execute_visits_every_index_exactly_once() {
        let hits: Vec<AtomicUsize> = (0..64).map(|_| AtomicUsize::new(0)).collect();
        parallel_execute(64, 8, |i| {
            hits[i].fetch_add(1, Ordering::SeqCst);
        });
        for h in &hits {
            assert_eq!(h.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn parallel_execute_handles_more_workers_than_items() {
        let sum = AtomicU64::new(0);
        parallel_execute(3, 16, |i| {
            sum.fetch_add(i as u64, Ordering::SeqCst);
        });
        assert_eq!(sum.load(Ordering::SeqCst), 0 + 1 + 2);
    }

    #[test]
    fn parallel_execute_zero_is_a_no_op() {
        parallel_execute(0, 4, |_| panic!("should not be called"));
    }

    #[test]
    fn job_system_reports_configured_worker_count() {
        let js = JobSystem::new(4);
        assert_eq!(js.worker_count(), 4);
    }

    #[test]
    fn rendezvous_releases_all_waiters() {
        let barrier = std::sync::Arc::new(Rendezvous::new(4));
        let counter = std::sync::Arc::new(AtomicUsize::new(0));
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let barrier = barrier.clone();
                let counter = counter.clone();
                scope.spawn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    barrier.wait();
                    assert_eq!(counter.load(Ordering::SeqCst), 4);
                });
            }
        });
    }
}
