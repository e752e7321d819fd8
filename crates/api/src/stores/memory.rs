//! In-process TtlStore for tests and single-instance development.
//!
//! Expiry is lazy: an expired entry is dropped when it is next touched, and a
//! full sweep runs every `SWEEP_EVERY` writes so untouched keys do not pile up.
//! Time comes from `tokio::time`, so a paused test clock drives expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use tokio::time::Instant;

use super::TtlStore;

const SWEEP_EVERY: u64 = 1024;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Memory implementation of TtlStore.
#[derive(Default)]
pub struct MemoryTtlStore {
    entries: Mutex<HashMap<String, Entry>>,
    writes: AtomicU64,
}

impl MemoryTtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|entries| entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    /// Locks for a write, sweeping expired entries every so often.
    fn lock_for_write(&self, now: Instant) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        let mut entries = self.lock()?;
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            entries.retain(|_, entry| entry.is_live(now));
        }
        Ok(entries)
    }
}

fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn bump(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) -> Result<i64> {
    let count = match live_entry(entries, key, now) {
        Some(entry) => {
            let current: i64 = std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| anyhow!("value at {} is not an integer", key))?;
            let next = current
                .checked_add(1)
                .ok_or_else(|| anyhow!("increment would overflow at {}", key))?;
            entry.value = next.to_string().into_bytes();
            next
        }
        None => {
            entries.insert(
                key.to_string(),
                Entry {
                    value: b"1".to_vec(),
                    expires_at: None,
                },
            );
            1
        }
    };
    Ok(count)
}

#[async_trait]
impl TtlStore for MemoryTtlStore {
    async fn health_check(&self) -> Result<bool> {
        Ok(self.lock().is_ok())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut entries = self.lock()?;

        Ok(live_entry(&mut entries, key, now).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            bail!("ttl must be positive");
        }
        let now = Instant::now();
        let mut entries = self.lock_for_write(now)?;

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.lock()?;

        Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        let mut entries = self.lock_for_write(now)?;

        bump(&mut entries, key, now)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.lock()?;

        match live_entry(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let now = Instant::now();
        let mut entries = self.lock_for_write(now)?;

        let count = bump(&mut entries, key, now)?;
        if count == 1 {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Some(now + ttl);
            }
        }
        Ok(count)
    }
}
