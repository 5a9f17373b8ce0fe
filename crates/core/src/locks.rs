//! Per-request async locks.
//!
//! Every mutating lifecycle operation holds the lock for its request id for the whole
//! read-check-write sequence. Distinct ids never contend. Reads do not take these locks.

use labflow_uuid::ShardableUuid;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Map size above which idle entries are pruned on the next acquire.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Default)]
pub struct RequestLocks {
    locks: Mutex<HashMap<ShardableUuid, Arc<AsyncMutex<()>>>>,
}

impl RequestLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `request_id`. Released when the guard drops.
    pub async fn acquire(&self, request_id: &ShardableUuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= PRUNE_THRESHOLD {
                // Only the map holds an idle entry.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(*request_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of tracked ids, idle or not.
    pub fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_id_is_exclusive() {
        let locks = Arc::new(RequestLocks::new());
        let id = ShardableUuid::new();
        let guard = locks.acquire(&id).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(&id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn distinct_ids_do_not_contend() {
        let locks = RequestLocks::new();
        let _a = locks.acquire(&ShardableUuid::new()).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(&ShardableUuid::new()),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = RequestLocks::new();
        for _ in 0..PRUNE_THRESHOLD {
            drop(locks.acquire(&ShardableUuid::new()).await);
        }
        assert_eq!(locks.tracked(), PRUNE_THRESHOLD);

        let held = ShardableUuid::new();
        let _guard = locks.acquire(&held).await;
        assert_eq!(locks.tracked(), 1);
    }
}
