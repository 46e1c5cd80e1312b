//! Keyed write serialization
//!
//! Provides one async mutex per key so that work on the same stream or context
//! id is applied by a single logical writer, while different keys proceed in
//! parallel. Lock entries are pruned once the last holder releases them.

use crate::error::ApiError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Per-key lock manager
pub struct KeyedLocks {
    locks: LockMap,
}

/// Exclusive hold on one key; released on drop.
pub struct KeyedGuard {
    key: String,
    locks: LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive access to `key`. Waiters are served in FIFO order.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let entry = {
            let mut map = self.locks.lock();
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = entry.lock_owned().await;
        KeyedGuard {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        self.locks.lock().len()
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.lock();
        // The map holds one reference; any other means a holder or waiter remains.
        let idle = map
            .get(&self.key)
            .map(|entry| Arc::strong_count(entry) == 1)
            .unwrap_or(false);
        if idle {
            map.remove(&self.key);
        }
    }
}

/// Run `operation` unless `cancel` fires first, in which case the operation
/// is dropped and `ApiError::Cancelled` is returned.
pub async fn cancellable<T, F>(
    cancel: &CancellationToken,
    what: &str,
    operation: F,
) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ApiError::Cancelled(what.to_string())),
        result = operation => result,
    }
}
