//! A map safe for concurrent access from many workers.
//!
//! Storage is sharded: each shard is a `parking_lot::RwLock` around a
//! `HashMap` whose values sit behind `Arc` slots. Readers take shard
//! read locks; writers take short shard write locks. The [`Entry`] view
//! layers compare-and-swap update semantics on top, so read-modify-write
//! cycles never hold a lock around user code.

/// Occupied/vacant entry views with compare-and-swap updates
pub mod entry;

pub use entry::{Entry, OccupiedEntry, VacantEntry};

use parking_lot::RwLock;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

type Shard<K, V> = RwLock<HashMap<K, Arc<V>>>;

/// A concurrent hash map with an occupied/vacant entry API.
///
/// Values are stored behind `Arc` slots; reads hand out cheap `Arc`
/// clones and never block writers for longer than a hash-map lookup.
///
/// ```
/// use sluice_concurrency::ConcurrentMap;
///
/// let map = ConcurrentMap::new();
/// map.insert("hits", 1u64);
/// let count = map.entry("hits").and_modify(|n| n + 1).or_insert(1);
/// assert_eq!(*count, 2);
/// ```
pub struct ConcurrentMap<K, V> {
    shards: Box<[Shard<K, V>]>,
    hasher: RandomState,
}

impl<K: Hash + Eq, V> ConcurrentMap<K, V> {
    /// Create an empty map, sharded for the available parallelism.
    pub fn new() -> Self {
        let shard_count = (num_cpus::get() * 4).next_power_of_two();
        let shards = (0..shard_count)
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    /// The shard guarding `key`.
    pub(crate) fn shard_for(&self, key: &K) -> &Shard<K, V> {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) & (self.shards.len() - 1);
        &self.shards[index]
    }

    /// Get the value stored under `key`, if any.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.shard_for(key).read().get(key).cloned()
    }

    /// Store `value` under `key`, returning the previous value if any.
    pub fn insert(&self, key: K, value: V) -> Option<Arc<V>> {
        self.shard_for(&key).write().insert(key, Arc::new(value))
    }

    /// Store `value` under `key` only if the key is absent.
    ///
    /// Returns true if this call inserted the value. This is the atomic
    /// first-seen-wins primitive the parallel `unique` combinator uses.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        use std::collections::hash_map::Entry as HashEntry;
        match self.shard_for(&key).write().entry(key) {
            HashEntry::Vacant(slot) => {
                slot.insert(Arc::new(value));
                true
            }
            HashEntry::Occupied(_) => false,
        }
    }

    /// Remove the value stored under `key`, returning it if present.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.shard_for(key).write().remove(key)
    }

    /// Whether `key` is currently present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.shard_for(key).read().contains_key(key)
    }

    /// Number of entries across all shards.
    ///
    /// A point-in-time sum; concurrent writers may change it immediately.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// Remove every entry.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
    }

    /// Visit every entry under shard read locks.
    ///
    /// The callback runs with a shard read lock held, so it must not call
    /// back into write operations on this map.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for shard in self.shards.iter() {
            let guard = shard.read();
            for (key, value) in guard.iter() {
                f(key, value);
            }
        }
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<(K, Arc<V>)> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            out.extend(shard.write().drain());
        }
        out
    }

    /// An occupied or vacant view of the slot for `key`, per presence at
    /// the time of this call.
    ///
    /// The view is a snapshot, not a lock: other writers may change the
    /// slot while the view is held, and the entry operations reconcile
    /// with them via compare-and-swap.
    pub fn entry(&self, key: K) -> Entry<'_, K, V> {
        match self.get(&key) {
            Some(snapshot) => Entry::Occupied(OccupiedEntry::new(self, key, snapshot)),
            None => Entry::Vacant(VacantEntry::new(self, key)),
        }
    }
}

impl<K: Hash + Eq, V> Default for ConcurrentMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_insert_get_remove() {
        let map = ConcurrentMap::new();
        assert!(map.is_empty());

        assert!(map.insert("a", 1).is_none());
        assert_eq!(*map.get(&"a").unwrap(), 1);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&"a"));

        let old = map.insert("a", 2).unwrap();
        assert_eq!(*old, 1);
        assert_eq!(*map.get(&"a").unwrap(), 2);

        assert_eq!(*map.remove(&"a").unwrap(), 2);
        assert!(map.get(&"a").is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_clear_and_drain() {
        let map = ConcurrentMap::new();
        for i in 0..100 {
            map.insert(i, i * 2);
        }
        assert_eq!(map.len(), 100);

        let drained = map.drain();
        assert_eq!(drained.len(), 100);
        assert!(map.is_empty());

        for i in 0..10 {
            map.insert(i, i);
        }
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn test_for_each_sees_all_entries() {
        let map = ConcurrentMap::new();
        for i in 0..50u64 {
            map.insert(i, i + 1);
        }
        let mut sum = 0;
        map.for_each(|_, v| sum += *v);
        assert_eq!(sum, (1..=50).sum::<u64>());
    }

    #[test]
    fn test_concurrent_writers_distinct_keys() {
        let map = std::sync::Arc::new(ConcurrentMap::new());
        let mut handles = Vec::new();

        for t in 0..8u64 {
            let map = std::sync::Arc::clone(&map);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    map.insert(t * 1000 + i, t);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), 8 * 100);
    }

    #[test]
    fn test_insert_if_absent_single_winner() {
        let map = std::sync::Arc::new(ConcurrentMap::new());
        let mut handles = Vec::new();

        for t in 0..8 {
            let map = std::sync::Arc::clone(&map);
            handles.push(thread::spawn(move || map.insert_if_absent("key", t)));
        }
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(map.len(), 1);
    }
}
