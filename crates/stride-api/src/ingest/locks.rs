use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-owner async locks.
///
/// Holding an owner's guard serializes deduplication and insertion for that
/// owner; batches for different owners proceed concurrently.
#[derive(Clone, Default)]
pub struct OwnerLocks {
    state: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, owner_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut guard = self.state.lock().await;
            // Drop locks nobody holds or waits on
            guard.retain(|key, lock| key == owner_id || Arc::strong_count(lock) > 1);
            guard
                .entry(owner_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.state.lock().await.len()
    }
}
