//! Run-wide counters and the status line.
//!
//! Counters are lock-free atomics so workers never contend. A record
//! moves through `Queued → InProgress → (Succeeded | Failed | Aborted)`
//! exactly once; records rejected before dispatch (skips, render
//! failures, malformed rows) go straight to their terminal counter so
//! that `succeeded + failed + aborted + skipped == total` holds at
//! termination.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use volley_types::friendly_duration;

use crate::etc::EtcEstimator;

pub struct Stats {
    queued: AtomicI64,
    skipped: AtomicI64,
    in_progress: AtomicI64,
    succeeded: AtomicI64,
    failed: AtomicI64,
    aborted: AtomicI64,
    total: AtomicI64,

    dirty: AtomicBool,
    /// When the queued counter last fell to zero. Written only on zero
    /// transitions; read by the estimator. The brief window where it
    /// disagrees with the counter is harmless and never relied on.
    queue_empty_time: Mutex<Option<Instant>>,

    since: Instant,
    etc: EtcEstimator,
}

impl Stats {
    pub fn new(concurrency: usize, minimum_duration: Duration) -> Self {
        Self {
            queued: AtomicI64::new(0),
            skipped: AtomicI64::new(0),
            in_progress: AtomicI64::new(0),
            succeeded: AtomicI64::new(0),
            failed: AtomicI64::new(0),
            aborted: AtomicI64::new(0),
            total: AtomicI64::new(0),
            dirty: AtomicBool::new(false),
            queue_empty_time: Mutex::new(None),
            since: Instant::now(),
            etc: EtcEstimator::new(concurrency, minimum_duration),
        }
    }

    /// A record was accepted for dispatch.
    pub fn add_queued(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if self.queued.fetch_add(1, Ordering::Relaxed) == 0 {
            *self.queue_empty_time.lock().unwrap() = None;
        }
        self.set_dirty();
    }

    /// A worker took a record off the queue.
    pub fn start_job(&self) {
        self.in_progress.fetch_add(1, Ordering::Relaxed);
        if self.queued.fetch_sub(1, Ordering::Relaxed) == 1 {
            *self.queue_empty_time.lock().unwrap() = Some(Instant::now());
        }
        self.set_dirty();
    }

    /// Discard everything still queued (stage-1 shutdown). Returns the
    /// old queued count so the caller can remove it from the total.
    pub fn zero_queued(&self) -> i64 {
        let old = self.queued.swap(0, Ordering::Relaxed);
        if old != 0 {
            *self.queue_empty_time.lock().unwrap() = Some(Instant::now());
        }
        self.set_dirty();
        old
    }

    pub fn sub_total(&self, n: i64) {
        self.total.fetch_sub(n, Ordering::Relaxed);
        self.set_dirty();
    }

    /// A record was satisfied from the cache and never dispatched.
    pub fn add_skipped(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.set_dirty();
    }

    /// A record failed before it could be dispatched (malformed row,
    /// template render error). Zero elapsed, never in progress.
    pub fn add_failed_undispatched(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.etc.add_failure(Duration::ZERO);
        self.set_dirty();
    }

    pub fn add_succeeded(&self, elapsed: Duration) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.in_progress.fetch_sub(1, Ordering::Relaxed);
        self.etc.add_success(elapsed);
        self.set_dirty();
    }

    pub fn add_failed(&self, elapsed: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.in_progress.fetch_sub(1, Ordering::Relaxed);
        self.etc.add_failure(elapsed);
        self.set_dirty();
    }

    pub fn add_aborted(&self, elapsed: Duration) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
        self.in_progress.fetch_sub(1, Ordering::Relaxed);
        self.etc.add_failure(elapsed);
        self.set_dirty();
    }

    pub fn set_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Take the dirty flag, returning whether it was set.
    pub fn clear_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }

    pub fn queued(&self) -> i64 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> i64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn in_progress(&self) -> i64 {
        self.in_progress.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> i64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> i64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn aborted(&self) -> i64 {
        self.aborted.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> i64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Remaining-time projection for the current queue state.
    pub fn estimate(&self) -> Duration {
        let queue_empty_for = self
            .queue_empty_time
            .lock()
            .unwrap()
            .map(|at| at.elapsed());
        self.etc
            .estimate(self.queued(), self.in_progress(), queue_empty_for)
    }

    /// The operator-facing status line.
    pub fn render(&self) -> String {
        let estimate = self.estimate();
        let eta_part = if estimate > Duration::from_secs(1) {
            format!("Estimated time remaining: {}", friendly_duration(estimate))
        } else {
            format!("Elapsed time: {}", friendly_duration(self.since.elapsed()))
        };
        let skipped_part = match self.skipped() {
            0 => String::new(),
            k => format!(" (+{k} skipped)"),
        };
        format!(
            "Queued: {}; In progress: {}; Succeeded: {}; Failed: {}; Aborted: {}; Total: {}{}; {}",
            self.queued(),
            self.in_progress(),
            self.succeeded(),
            self.failed(),
            self.aborted(),
            self.total(),
            skipped_part,
            eta_part,
        )
    }
}
