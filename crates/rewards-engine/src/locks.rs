//! Per-key async mutual exclusion.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per key, created on first use
///
/// Holding the guard for key `a` never blocks work on key `b`. An entry is
/// removed when its last guard is released with nobody waiting.
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &K) -> KeyedGuard<'_, K> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(key.clone()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        KeyedGuard {
            owner: self,
            key: key.clone(),
            lock,
            guard: Some(guard),
        }
    }

    /// Drop entries nobody is holding or waiting on
    ///
    /// Only needed after a waiter was cancelled mid-wait; released guards
    /// clean up after themselves.
    pub fn prune(&self) {
        self.locks.lock().retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &K, lock: &Arc<AsyncMutex<()>>) {
        let mut locks = self.locks.lock();
        // The map and `lock` are the only references left: no holder, no waiter
        if Arc::strong_count(lock) == 2 {
            if let Some(entry) = locks.get(key) {
                if Arc::ptr_eq(entry, lock) {
                    locks.remove(key);
                }
            }
        }
    }
}

/// Exclusive access to one key of a [`KeyedLocks`]
#[derive(Debug)]
pub struct KeyedGuard<'a, K: Eq + Hash + Clone> {
    owner: &'a KeyedLocks<K>,
    key: K,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.owner.release(&self.key, &self.lock);
    }
}
