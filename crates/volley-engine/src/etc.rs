//! Estimated time to completion.
//!
//! The estimator keeps every observed job duration, split by outcome,
//! and projects how long the queue will take to drain: a weighted mean
//! duration covers the bulk of the queue, and a weighted maximum covers
//! the straggler that will still be running when everything else is
//! done.

use std::sync::RwLock;
use std::time::Duration;

#[derive(Default)]
struct Outcomes {
    successes: Vec<Duration>,
    failures: Vec<Duration>,
}

/// Append-only duration model. Writers record completions; the status
/// reporter reads estimates.
pub struct EtcEstimator {
    concurrency: usize,
    /// Floor on per-job spacing when a rate limit is configured.
    minimum_duration: Duration,
    outcomes: RwLock<Outcomes>,
}

impl EtcEstimator {
    pub fn new(concurrency: usize, minimum_duration: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            minimum_duration,
            outcomes: RwLock::new(Outcomes::default()),
        }
    }

    pub fn add_success(&self, elapsed: Duration) {
        self.outcomes.write().unwrap().successes.push(elapsed);
    }

    pub fn add_failure(&self, elapsed: Duration) {
        self.outcomes.write().unwrap().failures.push(elapsed);
    }

    /// Project the remaining run time.
    ///
    /// `queue_empty_for` is `None` while jobs are still queued;
    /// otherwise it is the time since the queue drained, and only the
    /// weighted-maximum tail remains. Returns zero when no job has
    /// completed yet.
    pub fn estimate(
        &self,
        queued: i64,
        in_progress: i64,
        queue_empty_for: Option<Duration>,
    ) -> Duration {
        let outcomes = self.outcomes.read().unwrap();
        let n_success = outcomes.successes.len();
        let n_failure = outcomes.failures.len();
        let samples = n_success + n_failure;
        if samples == 0 {
            return Duration::ZERO;
        }
        let p_success = n_success as f64 / samples as f64;

        let (mean_success, max_success) = mean_and_max(&outcomes.successes);
        let (mean_failure, max_failure) = mean_and_max(&outcomes.failures);

        // Weighted mean job duration, inflated when more jobs are in
        // flight than have finished: the finished ones are biased
        // toward the quick ones.
        let mut mean = p_success * mean_success + (1.0 - p_success) * mean_failure;
        if in_progress > samples as i64 {
            mean *= in_progress as f64 / samples as f64;
        }

        let weighted_max = p_success * max_success + (1.0 - p_success) * max_failure;

        match queue_empty_for {
            None => {
                let mut drain = mean * queued.max(0) as f64 / self.concurrency as f64;
                let floor = self.minimum_duration.as_secs_f64() * queued.max(0) as f64;
                if floor > drain {
                    drain = floor;
                }
                Duration::from_secs_f64(drain + weighted_max)
            }
            Some(since_empty) => {
                Duration::from_secs_f64((weighted_max - since_empty.as_secs_f64()).max(0.0))
            }
        }
    }
}

/// Mean and max in seconds; (0, 0) for an empty list.
fn mean_and_max(durations: &[Duration]) -> (f64, f64) {
    if durations.is_empty() {
        return (0.0, 0.0);
    }
    let mut total = 0.0;
    let mut max = 0.0f64;
    for d in durations {
        let secs = d.as_secs_f64();
        total += secs;
        max = max.max(secs);
    }
    (total / durations.len() as f64, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    #[test]
    fn no_samples_means_no_estimate() {
        let etc = EtcEstimator::new(4, Duration::ZERO);
        assert_eq!(etc.estimate(100, 0, None), Duration::ZERO);
    }

    #[test]
    fn all_successes_scale_by_queue_and_concurrency() {
        let etc = EtcEstimator::new(2, Duration::ZERO);
        etc.add_success(2 * SEC);
        etc.add_success(4 * SEC);
        // mean 3s, max 4s: 10 queued over 2 workers = 15s drain + 4s tail
        assert_eq!(etc.estimate(10, 2, None), Duration::from_secs(19));
    }

    #[test]
    fn failures_weight_the_mean() {
        let etc = EtcEstimator::new(1, Duration::ZERO);
        etc.add_success(2 * SEC);
        etc.add_failure(6 * SEC);
        // p=0.5: mean = 0.5*2 + 0.5*6 = 4s; max = 0.5*2 + 0.5*6 = 4s
        assert_eq!(etc.estimate(1, 1, None), Duration::from_secs(8));
    }

    #[test]
    fn survivor_bias_inflates_small_sample_counts() {
        let etc = EtcEstimator::new(4, Duration::ZERO);
        etc.add_success(2 * SEC);
        // one 2s sample but 4 in flight: mean inflates 4x to 8s
        // drain = 8s * 4 queued / 4 workers = 8s, plus 2s tail
        assert_eq!(etc.estimate(4, 4, None), Duration::from_secs(10));
    }

    #[test]
    fn rate_limit_floors_the_drain_time() {
        let etc = EtcEstimator::new(10, SEC);
        etc.add_success(Duration::from_millis(100));
        // raw drain would be 0.1s * 10 / 10 = 0.1s, but the rate limit
        // spaces jobs at one per second: floor is 10s
        assert_eq!(etc.estimate(10, 1, None), Duration::from_secs(10) + Duration::from_millis(100));
    }

    #[test]
    fn empty_queue_counts_down_the_tail() {
        let etc = EtcEstimator::new(2, Duration::ZERO);
        etc.add_success(10 * SEC);
        assert_eq!(
            etc.estimate(0, 1, Some(4 * SEC)),
            Duration::from_secs(6)
        );
    }

    #[test]
    fn tail_never_goes_negative() {
        let etc = EtcEstimator::new(2, Duration::ZERO);
        etc.add_success(SEC);
        assert_eq!(etc.estimate(0, 0, Some(60 * SEC)), Duration::ZERO);
    }
}
