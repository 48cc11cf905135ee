//! Occupied/vacant entry views with compare-and-swap updates.
//!
//! An entry is a transient view of one map slot, reflecting presence at
//! the moment [`ConcurrentMap::entry`] was called. The view owns no
//! data: updates reconcile with concurrent writers through a
//! compare-and-swap retry loop over the slot's `Arc` (pointer identity
//! decides whether the snapshot is still current). User closures always
//! run outside the shard locks.
//!
//! Modifications registered on a vacant view are not discarded when an
//! insert race is lost: they replay against the winner's slot, so a
//! `and_modify(..).or_insert(..)` chain contributes exactly once no
//! matter how the race resolves.

use super::ConcurrentMap;
use std::hash::Hash;
use std::sync::Arc;

/// A modification registered while the slot was vacant, replayed if an
/// insert race is lost.
type PendingModify<V> = Box<dyn Fn(V) -> V>;

/// A view of a single map slot, occupied or vacant at view-creation time.
pub enum Entry<'a, K, V> {
    /// The key was present when the view was taken.
    Occupied(OccupiedEntry<'a, K, V>),
    /// The key was absent when the view was taken.
    Vacant(VacantEntry<'a, K, V>),
}

impl<'a, K: Hash + Eq + Clone, V: Clone> Entry<'a, K, V> {
    /// Apply `f` to the stored value via a compare-and-swap retry loop.
    ///
    /// On an occupied view the modification applies immediately: the
    /// current value is cloned, `f` transforms the clone, and the result
    /// swaps in only if the slot still holds the observed value;
    /// otherwise the loop retries against the fresh value. If the key is
    /// deleted mid-loop the view turns vacant with `f` registered for
    /// replay. On a vacant view `f` is registered for replay only.
    pub fn and_modify(self, f: impl Fn(V) -> V + 'static) -> Entry<'a, K, V> {
        match self {
            Entry::Occupied(entry) => entry.and_modify(f),
            Entry::Vacant(mut entry) => {
                entry.pending.push(Box::new(f));
                Entry::Vacant(entry)
            }
        }
    }

    /// Resolve the entry to a value, inserting `default` if the slot is
    /// (still) vacant.
    ///
    /// If the insert race is lost, modifications registered with
    /// [`and_modify`](Self::and_modify) replay against the winner's
    /// value; if the insert wins, `default` is stored untouched.
    pub fn or_insert(self, default: V) -> Arc<V> {
        match self {
            Entry::Occupied(entry) => entry.snapshot,
            Entry::Vacant(entry) => entry.insert_or_replay(move |_| default),
        }
    }

    /// Like [`or_insert`](Self::or_insert), computing the default lazily.
    ///
    /// The producer may run and its result be discarded when the race is
    /// lost, so it must be side-effect-free or idempotent.
    pub fn or_insert_with(self, default: impl FnOnce() -> V) -> Arc<V> {
        match self {
            Entry::Occupied(entry) => entry.snapshot,
            Entry::Vacant(entry) => entry.insert_or_replay(move |_| default()),
        }
    }

    /// Like [`or_insert_with`](Self::or_insert_with), passing the key to
    /// the producer.
    pub fn or_insert_with_key(self, default: impl FnOnce(&K) -> V) -> Arc<V> {
        match self {
            Entry::Occupied(entry) => entry.snapshot,
            Entry::Vacant(entry) => entry.insert_or_replay(default),
        }
    }

    /// Resolve the entry with `V::default()` as the fallback value.
    pub fn or_default(self) -> Arc<V>
    where
        V: Default,
    {
        self.or_insert_with(V::default)
    }

    /// The key this entry refers to.
    pub fn key(&self) -> &K {
        match self {
            Entry::Occupied(entry) => &entry.key,
            Entry::Vacant(entry) => &entry.key,
        }
    }
}

/// A view of a slot that held a value when the view was taken.
pub struct OccupiedEntry<'a, K, V> {
    map: &'a ConcurrentMap<K, V>,
    key: K,
    snapshot: Arc<V>,
}

impl<'a, K: Hash + Eq, V> OccupiedEntry<'a, K, V> {
    pub(super) fn new(map: &'a ConcurrentMap<K, V>, key: K, snapshot: Arc<V>) -> Self {
        Self { map, key, snapshot }
    }

    /// The value observed when this view was taken.
    pub fn get(&self) -> Arc<V> {
        Arc::clone(&self.snapshot)
    }

    /// Remove the slot, returning whatever it currently holds.
    pub fn remove(self) -> Option<Arc<V>> {
        self.map.remove(&self.key)
    }
}

impl<'a, K: Hash + Eq + Clone, V> OccupiedEntry<'a, K, V> {
    /// Swap `value` into the slot, returning the previous value.
    ///
    /// If the key was deleted since the view was taken, the value is
    /// (re)inserted and `None` is returned.
    pub fn insert(&mut self, value: V) -> Option<Arc<V>> {
        let new = Arc::new(value);
        let shard = self.map.shard_for(&self.key);
        let mut guard = shard.write();
        let old = guard.insert(self.key.clone(), Arc::clone(&new));
        drop(guard);
        self.snapshot = new;
        old
    }
}

impl<'a, K: Hash + Eq + Clone, V: Clone> OccupiedEntry<'a, K, V> {
    /// CAS retry loop for [`Entry::and_modify`].
    fn and_modify(mut self, f: impl Fn(V) -> V + 'static) -> Entry<'a, K, V> {
        loop {
            // Run the user closure outside the shard lock.
            let updated = Arc::new(f((*self.snapshot).clone()));
            let shard = self.map.shard_for(&self.key);
            let mut guard = shard.write();
            match guard.get_mut(&self.key) {
                Some(slot) if Arc::ptr_eq(slot, &self.snapshot) => {
                    *slot = Arc::clone(&updated);
                    drop(guard);
                    self.snapshot = updated;
                    return Entry::Occupied(self);
                }
                Some(slot) => {
                    // Another writer interleaved: retry on its value.
                    self.snapshot = Arc::clone(slot);
                }
                None => {
                    // Deleted mid-loop: carry the modification forward.
                    drop(guard);
                    return Entry::Vacant(VacantEntry {
                        map: self.map,
                        key: self.key,
                        pending: vec![Box::new(f)],
                    });
                }
            }
        }
    }
}

/// A view of a slot that was empty when the view was taken.
pub struct VacantEntry<'a, K, V> {
    map: &'a ConcurrentMap<K, V>,
    key: K,
    pending: Vec<PendingModify<V>>,
}

impl<'a, K: Hash + Eq, V> VacantEntry<'a, K, V> {
    pub(super) fn new(map: &'a ConcurrentMap<K, V>, key: K) -> Self {
        Self {
            map,
            key,
            pending: Vec::new(),
        }
    }
}

impl<'a, K: Hash + Eq + Clone, V: Clone> VacantEntry<'a, K, V> {
    /// Insert the produced value if the slot is still empty; otherwise
    /// replay the pending modifications against the winner's value.
    fn insert_or_replay(self, make: impl FnOnce(&K) -> V) -> Arc<V> {
        use std::collections::hash_map::Entry as HashEntry;

        // The producer runs before any lock; its result is discarded if
        // the insert race is lost.
        let value = Arc::new(make(&self.key));
        loop {
            let shard = self.map.shard_for(&self.key);
            let mut guard = shard.write();
            let snapshot = match guard.entry(self.key.clone()) {
                HashEntry::Vacant(slot) => {
                    slot.insert(Arc::clone(&value));
                    return value;
                }
                HashEntry::Occupied(slot) => {
                    if self.pending.is_empty() {
                        return Arc::clone(slot.get());
                    }
                    Arc::clone(slot.get())
                }
            };
            drop(guard);

            // Lost the race: replay pending modifications via CAS.
            let mut updated = (*snapshot).clone();
            for modify in &self.pending {
                updated = modify(updated);
            }
            let updated = Arc::new(updated);

            let mut guard = shard.write();
            match guard.get_mut(&self.key) {
                Some(slot) if Arc::ptr_eq(slot, &snapshot) => {
                    *slot = Arc::clone(&updated);
                    return updated;
                }
                // Conflicting writer or a fresh delete: retry the loop.
                Some(_) | None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_entry_occupied_get_insert_remove() {
        let map = ConcurrentMap::new();
        map.insert("k", 10);

        let Entry::Occupied(mut entry) = map.entry("k") else {
            panic!("expected occupied entry");
        };
        assert_eq!(*entry.get(), 10);

        let old = entry.insert(20).unwrap();
        assert_eq!(*old, 10);
        assert_eq!(*map.get(&"k").unwrap(), 20);

        let removed = entry.remove().unwrap();
        assert_eq!(*removed, 20);
        assert!(!map.contains_key(&"k"));
    }

    #[test]
    fn test_entry_vacant_or_insert() {
        let map: ConcurrentMap<&str, i32> = ConcurrentMap::new();
        assert!(matches!(map.entry("k"), Entry::Vacant(_)));

        let value = map.entry("k").or_insert(7);
        assert_eq!(*value, 7);

        // Now occupied: or_insert returns the existing value.
        let value = map.entry("k").or_insert(99);
        assert_eq!(*value, 7);
    }

    #[test]
    fn test_or_insert_with_key() {
        let map: ConcurrentMap<String, usize> = ConcurrentMap::new();
        let value = map.entry("abcd".to_string()).or_insert_with_key(|k| k.len());
        assert_eq!(*value, 4);
    }

    #[test]
    fn test_or_default() {
        let map: ConcurrentMap<&str, u32> = ConcurrentMap::new();
        let value = map.entry("k").or_default();
        assert_eq!(*value, 0);
    }

    #[test]
    fn test_and_modify_applies_on_occupied() {
        let map = ConcurrentMap::new();
        map.insert("k", 100);
        let value = map.entry("k").and_modify(|v| v + 10).or_insert(1);
        assert_eq!(*value, 110);
    }

    #[test]
    fn test_and_modify_not_applied_on_winning_insert() {
        let map: ConcurrentMap<&str, i32> = ConcurrentMap::new();
        // The slot is empty: the registered modification has no target,
        // so the insert stores the default untouched.
        let value = map.entry("k").and_modify(|v| v + 10).or_insert(1);
        assert_eq!(*value, 1);
    }

    #[test]
    fn test_counter_idiom_under_contention() {
        let map = std::sync::Arc::new(ConcurrentMap::new());
        let threads = 8u64;
        let iterations = 500u64;

        let mut handles = Vec::new();
        for _ in 0..threads {
            let map = std::sync::Arc::clone(&map);
            handles.push(thread::spawn(move || {
                for _ in 0..iterations {
                    map.entry("count").and_modify(|v: u64| v + 1).or_insert(1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Every operation contributes exactly once: the winning insert
        // stores 1, every other pass adds 1.
        assert_eq!(*map.get(&"count").unwrap(), threads * iterations);
    }

    #[test]
    fn test_racing_writers_never_leave_zero() {
        // insert(100), and_modify(+10).or_insert(1), and remove racing on
        // one key: a surviving value must be 1, 100, or 110.
        for _ in 0..50 {
            let map = std::sync::Arc::new(ConcurrentMap::new());
            let mut handles = Vec::new();

            for writer in 0..4 {
                let map = std::sync::Arc::clone(&map);
                handles.push(thread::spawn(move || match writer {
                    0 => {
                        for _ in 0..20 {
                            map.insert("k", 100u64);
                        }
                    }
                    1 => {
                        // A single modify-chain: +10 applies to an
                        // existing value or replays after a lost insert,
                        // never both.
                        map.entry("k").and_modify(|v| v + 10).or_insert(1);
                    }
                    _ => {
                        for _ in 0..20 {
                            map.remove(&"k");
                        }
                    }
                }));
            }
            for handle in handles {
                handle.join().unwrap();
            }

            if let Some(value) = map.get(&"k") {
                assert!(
                    matches!(*value, 1 | 100 | 110),
                    "unexpected surviving value {}",
                    *value
                );
            }
        }
    }
}
