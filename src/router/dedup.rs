//! Consumer-side idempotency store
//!
//! A key is claimed with check-and-set before the handler runs. A claim that
//! already exists marks the delivery as a duplicate. When the handler fails
//! the claim is released so the broker's redelivery is processed again.

use crate::error::StorageError;
use crate::storage::Cache;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const KEY_PREFIX: &str = "idempotency:";

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Claim `key`. Returns true if this is the first claim within the TTL.
    async fn check_and_set(&self, key: &str) -> Result<bool, StorageError>;

    /// Give up a claim made by `check_and_set`.
    async fn release(&self, key: &str) -> Result<(), StorageError>;
}

/// Idempotency records kept in the cache under `idempotency:<key>`.
///
/// [`Consumer`](super::Consumer) claims `<destination>:<group>:<key>`, so one
/// store can be shared by every consumer group.
pub struct CacheIdempotencyStore {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl CacheIdempotencyStore {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn cache_key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl IdempotencyStore for CacheIdempotencyStore {
    async fn check_and_set(&self, key: &str) -> Result<bool, StorageError> {
        self.cache
            .set_if_absent(&Self::cache_key(key), b"1".to_vec(), self.ttl)
            .await
    }

    async fn release(&self, key: &str) -> Result<(), StorageError> {
        self.cache.delete(&Self::cache_key(key)).await
    }
}
