//! Engine-wide cancellation with a recorded cause.
//!
//! Every task in the engine suspends against this token except the
//! running children, whose lifetime belongs to the escalation
//! controller alone. The first cause recorded wins; later cancellations
//! are no-ops, which keeps "user hit Ctrl-C" from being overwritten by
//! the cascade of shutdown errors it triggers.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    cause: Arc<Mutex<Option<EngineError>>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the engine, recording `cause` if none is recorded yet.
    pub fn cancel(&self, cause: EngineError) {
        let mut slot = self.cause.lock().unwrap();
        if slot.is_none() {
            *slot = Some(cause);
        }
        drop(slot);
        self.token.cancel();
    }

    /// Wait until the engine is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the recorded cause is an operator interrupt. Workers use
    /// this to tell an aborted child from a genuinely failed one.
    pub fn is_user_initiated(&self) -> bool {
        matches!(
            *self.cause.lock().unwrap(),
            Some(EngineError::UserShutdown)
        )
    }

    pub fn cause(&self) -> Option<EngineError> {
        self.cause.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_cause_wins() {
        let shutdown = Shutdown::new();
        shutdown.cancel(EngineError::UserShutdown);
        shutdown.cancel(EngineError::AbortOnError);
        assert!(matches!(
            shutdown.cause(),
            Some(EngineError::UserShutdown)
        ));
        assert!(shutdown.is_user_initiated());
    }

    #[tokio::test]
    async fn cancellation_wakes_waiters() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        shutdown.cancel(EngineError::NoMoreJobs);
        handle.await.unwrap();
        assert!(shutdown.is_cancelled());
        assert!(!shutdown.is_user_initiated());
    }
}
