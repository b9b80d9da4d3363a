//! Execution outcomes.

use std::time::Duration;

/// How a dispatched job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// The child exited with status zero.
    Succeeded,
    /// The child exited nonzero on its own, or its per-job deadline
    /// fired. A timeout is a genuine failure.
    Failed,
    /// The child exited nonzero while the engine was shutting down at
    /// the user's request. Not cached.
    Aborted,
}

impl OutcomeKind {
    /// Classify a finished child.
    ///
    /// The child's own context carries only the per-job deadline; the
    /// engine's cancellation is deliberately detached from it, so the
    /// only evidence that a nonzero exit was user-initiated is the
    /// `user_cancelled` flag. The deadline overrides it.
    pub fn classify(exit_ok: bool, deadline_fired: bool, user_cancelled: bool) -> Self {
        if exit_ok {
            OutcomeKind::Succeeded
        } else if deadline_fired || !user_cancelled {
            OutcomeKind::Failed
        } else {
            OutcomeKind::Aborted
        }
    }
}

/// The full result of one dispatched job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub kind: OutcomeKind,
    /// Wall-clock time from hand-off to child exit.
    pub elapsed: Duration,
    /// Combined stdout + stderr, in order of arrival.
    pub output: Vec<u8>,
}
