//! Per-instance mutual exclusion around read-decide-write sequences

use approval_types::InstanceId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes state transitions of one workflow instance within this process
///
/// Cross-process safety comes from the store's compare-and-swap on request
/// decisions; this lock keeps a single process from interleaving two
/// advancements of the same instance.
#[derive(Default)]
pub struct InstanceLocks {
    locks: Mutex<HashMap<InstanceId, Arc<AsyncMutex<()>>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, instance_id: InstanceId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(instance_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the entry of a finished instance if nobody is waiting on it
    pub fn release(&self, instance_id: InstanceId) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(lock) = locks.get(&instance_id) {
            // the map holds one reference, a live guard holds another
            if Arc::strong_count(lock) == 1 {
                locks.remove(&instance_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_instance_is_serialized() {
        let locks = Arc::new(InstanceLocks::new());
        let id = InstanceId::new();

        let guard = locks.acquire(id).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_distinct_instances_do_not_block() {
        let locks = InstanceLocks::new();
        let _a = locks.acquire(InstanceId::new()).await;
        let _b = locks.acquire(InstanceId::new()).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_release_only_idle_entries() {
        let locks = InstanceLocks::new();
        let id = InstanceId::new();

        let guard = locks.acquire(id).await;
        locks.release(id);
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.release(id);
        assert!(locks.is_empty());
    }
}
