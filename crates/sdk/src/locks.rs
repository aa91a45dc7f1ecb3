//! Per-user serialization.
//!
//! Only one task may mutate a given user's state at any time. Each user id
//! maps to a `Semaphore(1)` created lazily; acquiring the permit gives
//! exclusive access for the duration of the work (it releases on drop).
//! Different users proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Default)]
pub struct UserLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl UserLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a user, waiting behind any in-flight holder.
    /// FIFO among waiters is provided by the semaphore.
    pub async fn acquire(&self, user_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(user_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned().await.expect("user lock semaphore never closed")
    }

    /// Number of tracked users (for logs).
    pub fn user_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop lock entries that are not currently held.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn sequential_reacquire_works() {
        let map = UserLockMap::new();
        let p1 = map.acquire("u1").await;
        drop(p1);
        let p2 = map.acquire("u1").await;
        drop(p2);
    }

    #[tokio::test]
    async fn different_users_do_not_block() {
        let map = Arc::new(UserLockMap::new());
        let _p1 = map.acquire("u1").await;
        let _p2 = map.acquire("u2").await;
        assert_eq!(map.user_count(), 2);
    }

    #[tokio::test]
    async fn same_user_is_serialized() {
        let map = Arc::new(UserLockMap::new());
        let p1 = map.acquire("u1").await;

        let map2 = map.clone();
        let waiter = tokio::spawn(async move {
            let _p = map2.acquire("u1").await;
            7
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(p1);
        assert_eq!(waiter.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let map = UserLockMap::new();
        let held = map.acquire("busy").await;
        drop(map.acquire("idle").await);
        map.prune_idle();
        assert_eq!(map.user_count(), 1);
        drop(held);
    }
}
