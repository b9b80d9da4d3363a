//! A fixed-capacity ring of timestamped samples with linear ETA
//! extrapolation.
//!
//! Feed it a monotone quantity (jobs completed, objects listed) via
//! [`RateWindow::insert`] or [`RateWindow::increment`] and ask when the
//! trend will reach a target value. The window holds `capacity - 1`
//! samples; the oldest is replaced once full, so the projection always
//! reflects the recent rate rather than the whole run.

use std::sync::RwLock;

use thiserror::Error;
use tokio::time::{Duration, Instant};

/// Why no ETA could be projected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateError {
    #[error("minimum samples must be at least 2")]
    MinimumTooSmall,
    #[error("no sample data")]
    NoSamples,
    #[error("only have {have} of the required {need} samples")]
    NotEnoughSamples { have: usize, need: usize },
    #[error("no difference in sample values")]
    NoChange,
    #[error("change is {change} at {newest} but target is {target}")]
    WrongDirection {
        change: f64,
        newest: f64,
        target: f64,
    },
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f64,
    timestamp: Instant,
}

struct Ring {
    samples: Vec<Option<Sample>>,
    oldest: usize,
    next: usize,
}

/// Ring buffer of (value, timestamp) pairs.
pub struct RateWindow {
    capacity: usize,
    ring: RwLock<Ring>,
}

impl RateWindow {
    /// Create a window that retains up to `capacity - 1` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ring: RwLock::new(Ring {
                samples: vec![None; capacity],
                oldest: 0,
                next: 0,
            }),
        }
    }

    /// Record an absolute value at the current time, replacing the
    /// oldest sample when the window is full.
    pub fn insert(&self, value: f64) {
        self.push(value, false);
    }

    /// Record `value` added to the newest sample (a running sum).
    pub fn increment(&self, value: f64) {
        self.push(value, true);
    }

    fn push(&self, value: f64, relative: bool) {
        let mut ring = self.ring.write().unwrap();
        let value = if relative {
            let newest = (ring.next + self.capacity - 1) % self.capacity;
            ring.samples[newest].map(|s| s.value).unwrap_or(0.0) + value
        } else {
            value
        };
        let next = ring.next;
        ring.samples[next] = Some(Sample {
            value,
            timestamp: Instant::now(),
        });
        if ring.oldest == (next + 1) % self.capacity {
            ring.oldest = (ring.oldest + 1) % self.capacity;
        }
        ring.next = (next + 1) % self.capacity;
    }

    /// Project the time at which the trend reaches `target` by linear
    /// extrapolation between the oldest and newest samples.
    pub fn eta(&self, minimum_samples: usize, target: f64) -> Result<Instant, RateError> {
        if minimum_samples < 2 {
            return Err(RateError::MinimumTooSmall);
        }
        let ring = self.ring.read().unwrap();
        if ring.oldest == ring.next {
            return Err(RateError::NoSamples);
        }
        let have = (ring.next + self.capacity - ring.oldest) % self.capacity;
        if have < minimum_samples {
            return Err(RateError::NotEnoughSamples {
                have,
                need: minimum_samples,
            });
        }
        let newest_idx = (ring.next + self.capacity - 1) % self.capacity;
        let newest = ring.samples[newest_idx].expect("newest sample populated");
        let oldest = ring.samples[ring.oldest].expect("oldest sample populated");

        let change = newest.value - oldest.value;
        if change == 0.0 {
            return Err(RateError::NoChange);
        }
        if target == newest.value {
            return Ok(newest.timestamp);
        }
        if (change > 0.0) != (target > newest.value) {
            return Err(RateError::WrongDirection {
                change,
                newest: newest.value,
                target,
            });
        }
        let period = newest.timestamp - oldest.timestamp;
        let scale = (target - newest.value) / change;
        Ok(newest.timestamp + Duration::from_secs_f64(period.as_secs_f64() * scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn eta_extrapolates_linearly() {
        let r = RateWindow::new(4);
        r.insert(10.0);
        assert!(r.eta(1, 100.0).is_err(), "minimum below 2 is rejected");
        tokio::time::advance(Duration::from_secs(1)).await;
        r.insert(20.0);
        assert!(matches!(
            r.eta(3, 100.0),
            Err(RateError::NotEnoughSamples { have: 2, need: 3 })
        ));

        let now = Instant::now();
        assert_eq!(r.eta(2, 30.0).unwrap(), now + Duration::from_secs(1));
        assert_eq!(r.eta(2, 40.0).unwrap(), now + Duration::from_secs(2));
        assert_eq!(r.eta(2, 100.0).unwrap(), now + Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn eta_at_newest_value_is_its_timestamp() {
        let r = RateWindow::new(4);
        r.insert(10.0);
        tokio::time::advance(Duration::from_secs(1)).await;
        r.insert(20.0);
        let stamped = Instant::now();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(r.eta(2, 20.0).unwrap(), stamped);
    }

    #[tokio::test(start_paused = true)]
    async fn eta_rejects_targets_behind_the_trend() {
        let r = RateWindow::new(4);
        r.insert(10.0);
        tokio::time::advance(Duration::from_secs(1)).await;
        r.insert(20.0);
        assert!(matches!(
            r.eta(2, 5.0),
            Err(RateError::WrongDirection { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn eta_rejects_flat_samples() {
        let r = RateWindow::new(4);
        r.insert(10.0);
        tokio::time::advance(Duration::from_secs(1)).await;
        r.insert(10.0);
        assert_eq!(r.eta(2, 20.0), Err(RateError::NoChange));
    }

    #[tokio::test(start_paused = true)]
    async fn ring_replaces_oldest_when_full() {
        let r = RateWindow::new(4);
        // 20, 30, 100 at one-second intervals, then 110 three seconds
        // later: the window drops the 20, leaving 30→110 over 4s.
        for v in [20.0, 30.0, 100.0] {
            r.insert(v);
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        r.insert(110.0);
        // 80 over 4 seconds = 20/second; 40 more to reach 150 takes 2s.
        assert_eq!(
            r.eta(3, 150.0).unwrap(),
            Instant::now() + Duration::from_secs(2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn increment_accumulates_a_running_sum() {
        let r = RateWindow::new(8);
        r.increment(5.0);
        tokio::time::advance(Duration::from_secs(1)).await;
        r.increment(5.0);
        // 5 → 10 over one second; 10 more to reach 20 takes 2s.
        assert_eq!(
            r.eta(2, 20.0).unwrap(),
            Instant::now() + Duration::from_secs(2)
        );
    }
}
