//! Arena-backed LRU cache.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Link value marking the end of the free stack.
const NIL: usize = usize::MAX;
/// Index of the sentinel slot heading the circular recency list.
const HEAD: usize = 0;

struct Slot<K, V> {
    entry: Option<(K, V)>,
    prev: usize,
    next: usize,
}

/// A fixed-capacity key/value store with least-recently-used eviction.
///
/// Storage is a pre-allocated arena of `capacity` slots. Occupied slots are
/// threaded into a circular, index-linked recency list behind a sentinel
/// (most recent first); unoccupied slots form a singly linked free stack
/// through their `next` link. No slot is ever allocated after construction.
pub struct BoundedCache<K, V> {
    slots: Vec<Slot<K, V>>,
    index: HashMap<K, usize>,
    /// Top of the free stack, `NIL` when the cache is full.
    free: usize,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: NonZeroUsize) -> Self {
        let capacity = capacity.get();
        let mut slots = Vec::with_capacity(capacity + 1);
        slots.push(Slot {
            entry: None,
            prev: HEAD,
            next: HEAD,
        });
        for i in 1..=capacity {
            slots.push(Slot {
                entry: None,
                prev: NIL,
                next: if i < capacity { i + 1 } else { NIL },
            });
        }

        Self {
            slots,
            // headroom lets tombstones left by evictions be reclaimed by an
            // in-place rehash instead of a resize
            index: HashMap::with_capacity(capacity * 2),
            free: 1,
        }
    }

    /// Insert `value` under `key`, making it the most recently used entry.
    ///
    /// Returns the displaced entry, if any: the previous value when `key` was
    /// already present, or the least recently used entry when the cache was
    /// full. An evicted slot is immediately reused for the new entry.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&i) = self.index.get(&key) {
            let old = self.slots[i].entry.replace((key, value));
            self.move_to_front(i);
            return old;
        }

        let displaced = if self.free == NIL {
            self.evict_tail()
        } else {
            None
        };

        let i = self.free;
        self.free = self.slots[i].next;
        self.slots[i].entry = Some((key.clone(), value));
        self.index.insert(key, i);
        self.push_front(i);

        displaced
    }

    /// Look up `key`, refreshing it to most recently used on a hit.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let i = *self.index.get(key)?;
        self.move_to_front(i);
        self.slots[i].entry.as_ref().map(|(_, v)| v)
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let i = *self.index.get(key)?;
        self.move_to_front(i);
        self.slots[i].entry.as_mut().map(|(_, v)| v)
    }

    /// Look up `key` without touching its recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let i = *self.index.get(key)?;
        self.slots[i].entry.as_ref().map(|(_, v)| v)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Iterate entries from most to least recently used.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: &self.slots,
            current: self.slots[HEAD].next,
        }
    }

    fn evict_tail(&mut self) -> Option<(K, V)> {
        let tail = self.slots[HEAD].prev;
        if tail == HEAD {
            return None;
        }

        self.unlink(tail);
        let evicted = self.slots[tail].entry.take();
        if let Some((ref k, _)) = evicted {
            self.index.remove(k);
        }

        // stack push
        self.slots[tail].next = self.free;
        self.free = tail;

        evicted
    }

    fn unlink(&mut self, i: usize) {
        let (prev, next) = (self.slots[i].prev, self.slots[i].next);
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
        self.slots[i].prev = NIL;
        self.slots[i].next = NIL;
    }

    fn push_front(&mut self, i: usize) {
        let first = self.slots[HEAD].next;
        self.slots[i].prev = HEAD;
        self.slots[i].next = first;
        self.slots[first].prev = i;
        self.slots[HEAD].next = i;
    }

    fn move_to_front(&mut self, i: usize) {
        if self.slots[HEAD].next != i {
            self.unlink(i);
            self.push_front(i);
        }
    }
}

/// Iterator over a [`BoundedCache`], most recently used first.
pub struct Iter<'a, K, V> {
    slots: &'a [Slot<K, V>],
    current: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == HEAD {
            return None;
        }
        let slot = &self.slots[self.current];
        self.current = slot.next;
        slot.entry.as_ref().map(|(k, v)| (k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> BoundedCache<String, u32> {
        BoundedCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    fn keys(cache: &BoundedCache<String, u32>) -> Vec<String> {
        cache.iter().map(|(k, _)| k.clone()).collect()
    }

    #[test]
    fn test_miss_is_none() {
        let mut cache = cache(2);
        assert!(cache.get("absent").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_then_get() {
        let mut cache = cache(2);
        assert!(cache.put("a".to_string(), 1).is_none());

        assert_eq!(cache.get("a"), Some(&1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.capacity(), 2);
    }

    #[test]
    fn test_put_existing_key_replaces_and_refreshes() {
        let mut cache = cache(2);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);

        let old = cache.put("a".to_string(), 10);
        assert_eq!(old, Some(("a".to_string(), 1)));
        assert_eq!(cache.len(), 2);
        assert_eq!(keys(&cache), vec!["a", "b"]);

        // "b" is now the least recently used
        let evicted = cache.put("c".to_string(), 3);
        assert_eq!(evicted, Some(("b".to_string(), 2)));
        assert_eq!(cache.peek("a"), Some(&10));
    }

    #[test]
    fn test_each_new_key_evicts_exactly_one_lru_entry() {
        let mut cache = cache(3);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            assert!(cache.put(key.to_string(), i as u32).is_none());
        }

        assert_eq!(cache.put("d".to_string(), 3), Some(("a".to_string(), 0)));
        assert_eq!(cache.put("e".to_string(), 4), Some(("b".to_string(), 1)));
        assert_eq!(cache.len(), 3);
        assert_eq!(keys(&cache), vec!["e", "d", "c"]);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let n = 4;
        let mut cache = cache(n);
        cache.put("a".to_string(), 0);
        for i in 1..n {
            cache.put(format!("k{}", i), i as u32);
        }

        // touch "a", then insert n - 1 new keys: "a" survives
        assert!(cache.get("a").is_some());
        for i in 0..n - 1 {
            cache.put(format!("new{}", i), i as u32);
        }
        assert!(cache.contains("a"));

        // "a" is now least recently touched: one more insert evicts it
        let evicted = cache.put("last".to_string(), 99);
        assert_eq!(evicted.map(|(k, _)| k), Some("a".to_string()));
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_peek_does_not_refresh() {
        let mut cache = cache(2);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);

        assert_eq!(cache.peek("a"), Some(&1));
        let evicted = cache.put("c".to_string(), 3);
        assert_eq!(evicted.map(|(k, _)| k), Some("a".to_string()));
    }

    #[test]
    fn test_get_mut_updates_in_place() {
        let mut cache = cache(1);
        cache.put("a".to_string(), 1);

        *cache.get_mut("a").unwrap() += 41;
        assert_eq!(cache.peek("a"), Some(&42));
    }

    #[test]
    fn test_capacity_one() {
        let mut cache = cache(1);
        cache.put("a".to_string(), 1);

        assert_eq!(cache.put("b".to_string(), 2), Some(("a".to_string(), 1)));
        assert_eq!(cache.get("b"), Some(&2));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_arena_never_grows() {
        let mut cache = cache(8);
        let index_capacity = cache.index.capacity();
        let mut max_index_capacity = index_capacity;

        for i in 0..1_000u32 {
            cache.put(format!("tenant-{}", i % 37), i);
            if i % 3 == 0 {
                cache.get(&format!("tenant-{}", i % 11));
            }
            max_index_capacity = max_index_capacity.max(cache.index.capacity());
        }
        // churn through distinct keys, every put evicting
        for i in 0..50_000u32 {
            cache.put(format!("churn-{}", i), i);
            max_index_capacity = max_index_capacity.max(cache.index.capacity());
        }

        assert_eq!(cache.slots.len(), 9);
        assert_eq!(cache.len(), 8);
        assert_eq!(cache.iter().count(), 8);
        assert!(
            max_index_capacity <= index_capacity,
            "index grew from {} to {}",
            index_capacity,
            max_index_capacity
        );
    }
}
