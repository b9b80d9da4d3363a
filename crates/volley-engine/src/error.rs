//! Engine error taxonomy.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Why an engine run ended, or why it could not start.
///
/// Causes are recorded once at cancellation time and surfaced when the
/// run winds down; see [`crate::engine::Shutdown`].
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The operator interrupted the run. Surfaced as a nonzero exit but
    /// never logged as a tool error, because it is not one.
    #[error("user-initiated shutdown")]
    UserShutdown,

    /// Benign terminal state: the input drained and every dispatched
    /// job completed.
    #[error("no more jobs")]
    NoMoreJobs,

    /// A job failed while `abort_on_error` was set.
    #[error("nonzero exit code")]
    AbortOnError,

    /// The input stream cannot be processed any further (unparseable
    /// CSV header, malformed JSON line).
    #[error("cannot continue reading input: {0}")]
    InputFatal(String),

    /// A cache write failed. On the object-store backend this usually
    /// means expired credentials, so the whole run winds down.
    #[error("could not update the result cache: {0}")]
    CacheWrite(String),

    /// Rate limits below a millisecond are rejected outright.
    #[error("rate limit must be at least a millisecond if defined")]
    RateLimitTooSmall,

    /// Anything else fatal enough to stop dispatching.
    #[error("{0}")]
    Fatal(String),
}

impl EngineError {
    /// Causes that end a run without making it a failed run.
    pub fn is_benign(&self) -> bool {
        matches!(self, EngineError::NoMoreJobs)
    }
}
