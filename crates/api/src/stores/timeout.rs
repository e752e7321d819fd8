//! Deadline enforcement for store calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::TtlStore;

/// Wraps a TtlStore so no call outlives `timeout`.
///
/// An elapsed deadline is reported as an ordinary store error.
pub struct TimeoutTtlStore {
    inner: Arc<dyn TtlStore>,
    timeout: Duration,
}

impl TimeoutTtlStore {
    pub fn new(inner: Arc<dyn TtlStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(&self, op: &'static str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("store {} timed out after {:?}", op, self.timeout)),
        }
    }
}

#[async_trait]
impl TtlStore for TimeoutTtlStore {
    async fn health_check(&self) -> Result<bool> {
        self.bounded("PING", self.inner.health_check()).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.bounded("GET", self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.bounded("SET", self.inner.set(key, value, ttl)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.bounded("DEL", self.inner.delete(key)).await
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        self.bounded("INCR", self.inner.increment(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.bounded("EXPIRE", self.inner.expire(key, ttl)).await
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        self.bounded("INCR+EXPIRE", self.inner.increment_with_ttl(key, ttl))
            .await
    }
}
