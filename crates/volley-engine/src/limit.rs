//! Job-start rate limiting.
//!
//! A token bucket: one token per `period`, up to `burst` banked. The
//! sorter consumer acquires a token immediately before each hand-off,
//! so the dispatch order and the token order always agree. With a
//! single caller the bucket needs no locks.

use tokio::time::{Duration, Instant};

use crate::error::{EngineError, EngineResult};
use crate::shutdown::Shutdown;

pub struct RateLimiter {
    period: Duration,
    burst: f64,
    tokens: f64,
    refilled: Instant,
}

impl RateLimiter {
    /// A limiter releasing one job per `period` with up to `burst`
    /// banked starts. Bursts below 1 are raised to 1; periods below a
    /// millisecond are rejected.
    pub fn new(period: Duration, burst: usize) -> EngineResult<Self> {
        if period < Duration::from_millis(1) {
            return Err(EngineError::RateLimitTooSmall);
        }
        let burst = burst.max(1) as f64;
        Ok(Self {
            period,
            burst,
            tokens: burst,
            refilled: Instant::now(),
        })
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let earned = (now - self.refilled).as_secs_f64() / self.period.as_secs_f64();
        self.tokens = (self.tokens + earned).min(self.burst);
        self.refilled = now;
    }

    /// Take a token, sleeping until one is available. Returns false if
    /// the engine shut down while waiting.
    pub async fn acquire(&mut self, shutdown: &Shutdown) -> bool {
        self.refill();
        if self.tokens < 1.0 {
            let wait = self.period.mul_f64(1.0 - self.tokens);
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep(wait) => {}
            }
            self.refill();
        }
        self.tokens -= 1.0;
        true
    }
}
