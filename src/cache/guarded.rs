//! Thread-safe wrapper around [`BoundedCache`].

use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::Mutex;

use super::BoundedCache;

/// A [`BoundedCache`] behind a single coarse lock.
///
/// The lock covers cache shape only. Values are handed out as `Arc`s so the
/// caller can mutate them (under their own lock) after this one is released,
/// letting distinct tenants proceed in parallel.
pub struct GuardedCache<K, V> {
    inner: Mutex<BoundedCache<K, Arc<V>>>,
}

impl<K, V> GuardedCache<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(BoundedCache::new(capacity)),
        }
    }

    /// Look up `key`, refreshing its recency.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().get(key).cloned()
    }

    /// Look up `key` without touching its recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().peek(key).cloned()
    }

    /// Insert or replace `key`, returning whatever entry was displaced.
    pub fn put(&self, key: K, value: Arc<V>) -> Option<(K, Arc<V>)> {
        self.inner.lock().put(key, value)
    }

    /// Fetch `key`, creating it with `make` on a miss, in one lock hold.
    ///
    /// The second element is the entry evicted to make room, if any.
    pub fn get_or_insert_with<Q, F>(&self, key: &Q, make: F) -> (Arc<V>, Option<(K, Arc<V>)>)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F: FnOnce() -> V,
    {
        let mut cache = self.inner.lock();
        if let Some(value) = cache.get(key) {
            return (Arc::clone(value), None);
        }

        let value = Arc::new(make());
        let evicted = cache.put(key.to_owned(), Arc::clone(&value));
        (value, evicted)
    }

    /// Clone out every entry, most recently used first, without touching
    /// recency.
    pub fn snapshot(&self) -> Vec<(K, Arc<V>)> {
        self.inner
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }
}
