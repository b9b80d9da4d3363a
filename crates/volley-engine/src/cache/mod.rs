//! Persistent result caching.
//!
//! Every completed job stores its combined output under the command's
//! marker, in a success or failure namespace. The modification time of
//! the stored entry is the command's last-run time, which drives
//! skipping, debouncing, and rerun deferral. The engine is indifferent
//! to the backend: a local directory and an S3 bucket behave the same.

mod dir;
mod s3;

use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;

pub use dir::DirCache;
pub use s3::{aws_expiry_time, S3Cache};

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache operation errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No entry exists for the marker. The sentinel, not a fault.
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Object-store failures (auth, transport, service).
    #[error("{0}")]
    Store(String),
}

/// Success/failure persistence with last-modified lookups.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Store combined output under the success namespace. Idempotent.
    async fn write_success(&self, marker: &str, data: &[u8]) -> CacheResult<()>;

    /// Store combined output under the failure namespace. Idempotent.
    async fn write_failure(&self, marker: &str, data: &[u8]) -> CacheResult<()>;

    /// When the marker last succeeded, or [`CacheError::NotFound`].
    async fn success_mod_time(&self, marker: &str) -> CacheResult<SystemTime>;

    /// When the marker last failed, or [`CacheError::NotFound`].
    async fn failure_mod_time(&self, marker: &str) -> CacheResult<SystemTime>;

    /// Retrieve the stored success payload.
    async fn read_success(&self, marker: &str) -> CacheResult<Vec<u8>>;

    /// Retrieve the stored failure payload.
    async fn read_failure(&self, marker: &str) -> CacheResult<Vec<u8>>;
}
