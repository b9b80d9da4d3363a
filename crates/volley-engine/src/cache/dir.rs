//! Local-directory cache backend.
//!
//! Layout under the root: `success/MARKER` and `failure/MARKER`, each
//! file holding the job's combined output. The filesystem mtime conveys
//! the last-run time.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;

use super::{Cache, CacheError, CacheResult};

pub struct DirCache {
    root: PathBuf,
}

impl DirCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> CacheResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("success")).await?;
        tokio::fs::create_dir_all(root.join("failure")).await?;
        Ok(Self { root })
    }

    fn success_path(&self, marker: &str) -> PathBuf {
        self.root.join("success").join(marker)
    }

    fn failure_path(&self, marker: &str) -> PathBuf {
        self.root.join("failure").join(marker)
    }
}

async fn mod_time(path: &Path) -> CacheResult<SystemTime> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.modified()?),
        Err(_) => Err(CacheError::NotFound),
    }
}

#[async_trait]
impl Cache for DirCache {
    async fn write_success(&self, marker: &str, data: &[u8]) -> CacheResult<()> {
        Ok(tokio::fs::write(self.success_path(marker), data).await?)
    }

    async fn write_failure(&self, marker: &str, data: &[u8]) -> CacheResult<()> {
        Ok(tokio::fs::write(self.failure_path(marker), data).await?)
    }

    async fn success_mod_time(&self, marker: &str) -> CacheResult<SystemTime> {
        mod_time(&self.success_path(marker)).await
    }

    async fn failure_mod_time(&self, marker: &str) -> CacheResult<SystemTime> {
        mod_time(&self.failure_path(marker)).await
    }

    async fn read_success(&self, marker: &str) -> CacheResult<Vec<u8>> {
        Ok(tokio::fs::read(self.success_path(marker)).await?)
    }

    async fn read_failure(&self, marker: &str) -> CacheResult<Vec<u8>> {
        Ok(tokio::fs::read(self.failure_path(marker)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh() -> (tempfile::TempDir, DirCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = DirCache::open(dir.path()).await.unwrap();
        (dir, cache)
    }

    #[tokio::test]
    async fn success_roundtrip() {
        let (_dir, cache) = fresh().await;
        cache.write_success("abc", b"output").await.unwrap();
        assert_eq!(cache.read_success("abc").await.unwrap(), b"output");
        assert!(cache.success_mod_time("abc").await.is_ok());
    }

    #[tokio::test]
    async fn namespaces_are_independent() {
        let (_dir, cache) = fresh().await;
        cache.write_failure("abc", b"boom").await.unwrap();
        assert!(matches!(
            cache.success_mod_time("abc").await,
            Err(CacheError::NotFound)
        ));
        assert!(cache.failure_mod_time("abc").await.is_ok());
    }

    #[tokio::test]
    async fn missing_marker_is_not_found() {
        let (_dir, cache) = fresh().await;
        assert!(matches!(
            cache.failure_mod_time("nothing").await,
            Err(CacheError::NotFound)
        ));
    }

    #[tokio::test]
    async fn rewrite_is_idempotent() {
        let (_dir, cache) = fresh().await;
        cache.write_success("abc", b"first").await.unwrap();
        cache.write_success("abc", b"second").await.unwrap();
        assert_eq!(cache.read_success("abc").await.unwrap(), b"second");
    }
}
