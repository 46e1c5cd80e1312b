//! Cache contract and an in-memory implementation.
//!
//! Used for stream progress, buffered chunks and idempotency records. Values
//! are opaque bytes; `increment` stores a decimal counter like Redis `INCR`.

use crate::error::StorageError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    /// Store `value`; `ttl` of `None` keeps it until deleted.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    /// Store only if absent; true when this call created the key.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, StorageError>;
    /// Add one to a counter (absent counts as 0) and return the new value.
    async fn increment(&self, key: &str) -> Result<i64, StorageError>;
    /// Drop entries whose TTL has passed; returns how many were removed.
    /// Backends that expire keys on their own return 0.
    async fn purge_expired(&self) -> Result<usize, StorageError>;
}

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Process-local cache with lazy expiry
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored entries, including expired ones not yet purged.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StorageError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).map_or(false, |entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn increment(&self, key: &str) -> Result<i64, StorageError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let (current, expires_at) = match entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                let text = std::str::from_utf8(&entry.value)
                    .map_err(|e| StorageError::backend("increment", key, e))?;
                let current = text
                    .parse::<i64>()
                    .map_err(|e| StorageError::backend("increment", key, e))?;
                (current, entry.expires_at)
            }
            _ => (0, None),
        };
        let next = current + 1;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn purge_expired(&self) -> Result<usize, StorageError> {
        Ok(MemoryCache::purge_expired(self))
    }
}
