//! S3 cache backend.
//!
//! Object-store round-trips are too slow to consult per record, so all
//! last-modified times under the prefix are pulled into an in-memory
//! index once, at connect time. Writes and reads go straight through.
//! The index is not refreshed after writes; within one run a marker is
//! consulted before it is executed, never after.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use super::{Cache, CacheError, CacheResult};

pub struct S3Cache {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    mtimes: HashMap<String, SystemTime>,
}

impl S3Cache {
    /// Connect to `s3://bucket/prefix` with ambient AWS credentials and
    /// prefetch the last-modified index.
    pub async fn connect(uri: &str) -> CacheResult<Self> {
        let (bucket, prefix) = parse_uri(uri)?;
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = aws_sdk_s3::Client::new(&config);
        let mut cache = Self {
            client,
            bucket,
            prefix,
            mtimes: HashMap::new(),
        };
        cache.load_mtimes().await?;
        Ok(cache)
    }

    async fn load_mtimes(&mut self) -> CacheResult<()> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.prefix)
            .into_paginator()
            .send();
        let mut next_report = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut counter: u64 = 0;
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| CacheError::Store(e.to_string()))?;
            for object in page.contents() {
                let (Some(key), Some(modified)) = (object.key(), object.last_modified()) else {
                    continue;
                };
                self.mtimes.insert(key.to_string(), to_system_time(modified));
                counter += 1;
            }
            if tokio::time::Instant::now() >= next_report {
                info!(
                    bucket = %self.bucket,
                    prefix = %self.prefix,
                    retrieved = counter,
                    "still scanning the object store"
                );
                next_report += Duration::from_secs(2);
            }
        }
        debug!(count = counter, "loaded last-modified index");
        Ok(())
    }

    fn success_key(&self, marker: &str) -> String {
        join_key(&self.prefix, "success", marker)
    }

    fn failure_key(&self, marker: &str) -> String {
        join_key(&self.prefix, "failure", marker)
    }

    async fn put(&self, key: String, data: &[u8]) -> CacheResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| CacheError::Store(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: String) -> CacheResult<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| CacheError::Store(e.to_string()))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| CacheError::Store(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn indexed_mtime(&self, key: &str) -> CacheResult<SystemTime> {
        self.mtimes.get(key).copied().ok_or(CacheError::NotFound)
    }
}

#[async_trait]
impl Cache for S3Cache {
    async fn write_success(&self, marker: &str, data: &[u8]) -> CacheResult<()> {
        self.put(self.success_key(marker), data).await
    }

    async fn write_failure(&self, marker: &str, data: &[u8]) -> CacheResult<()> {
        self.put(self.failure_key(marker), data).await
    }

    async fn success_mod_time(&self, marker: &str) -> CacheResult<SystemTime> {
        self.indexed_mtime(&self.success_key(marker))
    }

    async fn failure_mod_time(&self, marker: &str) -> CacheResult<SystemTime> {
        self.indexed_mtime(&self.failure_key(marker))
    }

    async fn read_success(&self, marker: &str) -> CacheResult<Vec<u8>> {
        self.get(self.success_key(marker)).await
    }

    async fn read_failure(&self, marker: &str) -> CacheResult<Vec<u8>> {
        self.get(self.failure_key(marker)).await
    }
}

fn parse_uri(uri: &str) -> CacheResult<(String, String)> {
    let Some(rest) = uri.strip_prefix("s3://") else {
        return Err(CacheError::Store(format!("not an s3 URI: {uri}")));
    };
    let (bucket, prefix) = match rest.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
        None => (rest, ""),
    };
    if bucket.is_empty() {
        return Err(CacheError::Store(format!("missing bucket in {uri}")));
    }
    Ok((bucket.to_string(), prefix.to_string()))
}

fn join_key(prefix: &str, namespace: &str, marker: &str) -> String {
    if prefix.is_empty() {
        format!("{namespace}/{marker}")
    } else {
        format!("{prefix}/{namespace}/{marker}")
    }
}

fn to_system_time(dt: &aws_sdk_s3::primitives::DateTime) -> SystemTime {
    if dt.secs() >= 0 {
        SystemTime::UNIX_EPOCH + Duration::new(dt.secs() as u64, dt.subsec_nanos())
    } else {
        SystemTime::UNIX_EPOCH
    }
}

/// Expiry of the ambient AWS credentials, when the host advertises one
/// via `AWS_EXPIRY_TIME` (RFC 3339). Used to bound the run so writes do
/// not start failing mid-flight.
pub fn aws_expiry_time() -> Option<SystemTime> {
    let raw = std::env::var("AWS_EXPIRY_TIME").ok()?;
    let parsed = chrono::DateTime::parse_from_rfc3339(&raw).ok()?;
    Some(parsed.into())
}
