use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

// Idle entries are pruned once the map grows past this many keys.
const PRUNE_THRESHOLD: usize = 1024;

/// Serializes ledger mutations per `(student_id, level_id)` inside this process.
#[derive(Clone, Default)]
pub(crate) struct LevelLocks {
    locks: Arc<Mutex<HashMap<(i64, i64), Arc<AsyncMutex<()>>>>>,
}

impl LevelLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock(&self, student_id: i64, level_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry((student_id, level_id)).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::LevelLocks;

    #[tokio::test]
    async fn same_key_waits_for_holder() {
        let locks = LevelLocks::new();
        let guard = locks.lock(1, 10).await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _guard = contender.lock(1, 10).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("lock released")
            .expect("task");
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = LevelLocks::new();
        let _first = locks.lock(1, 10).await;

        let second = tokio::time::timeout(Duration::from_millis(100), locks.lock(1, 11)).await;
        assert!(second.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
