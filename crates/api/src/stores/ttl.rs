//! Key-value store contract with per-key expiry, and its Redis implementation.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use redis::AsyncCommands;

/// Remote key-value store with TTL semantics.
///
/// A key whose TTL has elapsed reads exactly like a key that was never set.
/// Every call is a remote round trip and may fail; callers decide the fallback.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Health check - verify store connectivity.
    async fn health_check(&self) -> Result<bool>;

    /// Get the value at `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Set `key` to `value`, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Delete `key` (returns true if it existed).
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically increment the integer at `key`, creating it at 0 first.
    /// A key created here carries no TTL.
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Set or refresh the TTL on an existing key (returns false if absent).
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Increment `key` and give it `ttl` when this call created it.
    ///
    /// The default is two separate calls: a crash between them leaves a
    /// counter without expiry. Stores that can do better override it.
    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let count = self.increment(key).await?;
        if count == 1 {
            self.expire(key, ttl).await?;
        }
        Ok(count)
    }
}

/// INCR and first-hit PEXPIRE as one server-side step.
const INCREMENT_WITH_TTL: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Redis implementation of TtlStore.
pub struct RedisTtlStore {
    client: redis::Client,
    increment_script: redis::Script,
}

impl RedisTtlStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            increment_script: redis::Script::new(INCREMENT_WITH_TTL),
        }
    }
}

/// Redis rejects a zero expiry, so sub-millisecond TTLs round up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl TtlStore for RedisTtlStore {
    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(result == "PONG")
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let _: () = conn.pset_ex(key, value, ttl_millis(ttl)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let deleted: i64 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let count: i64 = conn.incr(key, 1).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let millis = i64::try_from(ttl_millis(ttl)).unwrap_or(i64::MAX);

        let applied: bool = conn.pexpire(key, millis).await?;
        Ok(applied)
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let count: i64 = self
            .increment_script
            .key(key)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }
}
