//! Per-shadow write lock registry.
//!
//! All writers for a (thing, shadow) pair, local handlers and sync
//! workers alike, serialize on the same keyed mutex. Readers do not take
//! these locks. Entries are garbage-collected once no guard or waiter
//! references them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const SWEEP_THRESHOLD: usize = 64;

/// Keyed mutex registry for shadow writers.
pub struct ShadowLocks {
    inner: Mutex<HashMap<(String, String), Arc<AsyncMutex<()>>>>,
}

impl ShadowLocks {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the write lock for one shadow. The returned guard holds
    /// the lock until dropped.
    pub async fn acquire(&self, thing_name: &str, shadow_name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap();
            if map.len() > SWEEP_THRESHOLD {
                map.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            map.entry((thing_name.to_string(), shadow_name.to_string()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop entries no guard or waiter references.
    pub fn sweep(&self) {
        self.inner
            .lock()
            .unwrap()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ShadowLocks {
    fn default() -> Self {
        Self::new()
    }
}
