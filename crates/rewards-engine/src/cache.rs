//! Keyed cache with pluggable eviction and single-flight loading.
//!
//! Concurrent misses for the same key share one loader call: the first
//! caller runs it, the rest await the same `OnceCell`.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::OnceCell;

/// When a cached value stops being served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Entries expire a fixed time after they were loaded
    TimeToLive(Duration),
    /// Entries stay until invalidated
    NeverExpire,
}

impl EvictionPolicy {
    fn is_expired(&self, loaded_at: Instant) -> bool {
        match self {
            EvictionPolicy::TimeToLive(ttl) => loaded_at.elapsed() >= *ttl,
            EvictionPolicy::NeverExpire => false,
        }
    }
}

struct Slot<V> {
    cell: Arc<OnceCell<(V, Instant)>>,
}

impl<V> Clone for Slot<V> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

pub struct TtlCache<K, V> {
    policy: EvictionPolicy,
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Fresh cached value, if any
    pub fn get(&self, key: &K) -> Option<V> {
        let slots = self.slots.lock();
        let (value, loaded_at) = slots.get(key)?.cell.get()?;
        if self.policy.is_expired(*loaded_at) {
            return None;
        }
        Some(value.clone())
    }

    /// Cached value, or the result of `load` shared with every concurrent caller
    ///
    /// A failed load is not cached; the next caller retries.
    pub async fn get_or_try_load<F, Fut, E>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            let stale = match slots.get(&key).and_then(|slot| slot.cell.get()) {
                Some((_, loaded_at)) => self.policy.is_expired(*loaded_at),
                None => false,
            };
            if stale {
                slots.remove(&key);
            }
            slots
                .entry(key)
                .or_insert_with(|| Slot {
                    cell: Arc::new(OnceCell::new()),
                })
                .clone()
        };

        let (value, _) = slot
            .cell
            .get_or_try_init(|| async move { load().await.map(|value| (value, Instant::now())) })
            .await?;
        Ok(value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let cell = OnceCell::new_with(Some((value, Instant::now())));
        self.slots.lock().insert(key, Slot { cell: Arc::new(cell) });
    }

    pub fn invalidate(&self, key: &K) {
        self.slots.lock().remove(key);
    }

    /// Drop expired entries; loads still in flight are kept
    pub fn purge_expired(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| match slot.cell.get() {
            Some((_, loaded_at)) => !self.policy.is_expired(*loaded_at),
            None => true,
        });
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_load_once() {
        let cache = Arc::new(TtlCache::<&'static str, u64>::new(EvictionPolicy::NeverExpire));
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_try_load("pool", || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(42)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_reloads() {
        let cache = TtlCache::new(EvictionPolicy::TimeToLive(Duration::from_millis(30)));
        let first = cache.get_or_try_load(1, || async { Ok::<_, String>("a") }).await.unwrap();
        assert_eq!(first, "a");
        assert_eq!(cache.get(&1), Some("a"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(&1), None);
        let second = cache.get_or_try_load(1, || async { Ok::<_, String>("b") }).await.unwrap();
        assert_eq!(second, "b");
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let cache = TtlCache::<u8, u8>::new(EvictionPolicy::NeverExpire);
        let err = cache.get_or_try_load(1, || async { Err::<u8, _>("down") }).await;
        assert_eq!(err, Err("down"));
        let ok = cache.get_or_try_load(1, || async { Ok::<_, &str>(7) }).await;
        assert_eq!(ok, Ok(7));
    }

    #[test]
    fn test_purge_and_invalidate() {
        let cache = TtlCache::new(EvictionPolicy::TimeToLive(Duration::ZERO));
        cache.insert(1, 1);
        cache.insert(2, 2);
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());

        let forever = TtlCache::new(EvictionPolicy::NeverExpire);
        forever.insert("k", 1);
        forever.invalidate(&"k");
        assert_eq!(forever.get(&"k"), None);
    }
}
