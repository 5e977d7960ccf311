//! HashedTable: hash index over slot storage, with a debug reentrancy guard.

use super::{InsertError, Lookup, Slot, Table};
use crate::reentrancy::DebugReentrancy;
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use hashbrown::hash_table::Entry as IndexEntry;
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};
use std::collections::hash_map::RandomState;

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    hash: u64,
}

/// Unordered backing table. Iterates in slot order, which is unspecified
/// but stable while no entries are added or removed.
///
/// Each entry stores its precomputed hash; the index is always rebuilt from
/// the stored hash, so `K: Hash` never runs after insertion.
pub struct HashedTable<K, V, S = RandomState> {
    hasher: S,
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Entry<K, V>>,
    reentrancy: DebugReentrancy,
}

impl<K, V> HashedTable<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

impl<K, V, S: Default> Default for HashedTable<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> HashedTable<K, V, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            index: HashTable::new(),
            slots: SlotMap::with_key(),
            reentrancy: DebugReentrancy::new(),
        }
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            hasher,
            index: HashTable::with_capacity(capacity),
            slots: SlotMap::with_capacity_and_key(capacity),
            reentrancy: DebugReentrancy::new(),
        }
    }
}

impl<K, V, S> Table for HashedTable<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    type Key = K;
    type Value = V;
    type Slot = Slot;

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn insert(&mut self, key: K, value: V) -> Result<Slot, InsertError<Slot, K, V>> {
        let _g = self.reentrancy.enter("insert");
        let hash = self.hasher.hash_one(&key);
        match self.index.entry(
            hash,
            |&kk| self.slots.get(kk).map(|e| e.key == key).unwrap_or(false),
            |&kk| self.slots.get(kk).map(|e| e.hash).unwrap_or(0),
        ) {
            IndexEntry::Occupied(o) => Err(InsertError::DuplicateKey {
                slot: Slot::new(*o.get()),
                key,
                value,
            }),
            IndexEntry::Vacant(v) => {
                let k = self.slots.insert(Entry { key, value, hash });
                let _ = v.insert(k);
                Ok(Slot::new(k))
            }
        }
    }

    fn remove(&mut self, slot: Slot) -> Option<(K, V)> {
        let _g = self.reentrancy.enter("remove");
        let k = slot.raw();
        let entry = self.slots.remove(k)?;
        if let Ok(occupied) = self.index.find_entry(entry.hash, |&kk| kk == k) {
            let _ = occupied.remove();
        }
        Some((entry.key, entry.value))
    }

    fn key(&self, slot: Slot) -> Option<&K> {
        self.slots.get(slot.raw()).map(|e| &e.key)
    }

    fn value(&self, slot: Slot) -> Option<&V> {
        self.slots.get(slot.raw()).map(|e| &e.value)
    }

    fn value_mut(&mut self, slot: Slot) -> Option<&mut V> {
        self.slots.get_mut(slot.raw()).map(|e| &mut e.value)
    }

    fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(Slot, &K, &V),
    {
        for (k, e) in self.slots.iter() {
            f(Slot::new(k), &e.key, &e.value);
        }
    }

    fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(Slot, &K, &mut V),
    {
        for (k, e) in self.slots.iter_mut() {
            f(Slot::new(k), &e.key, &mut e.value);
        }
    }
}

impl<K, V, S, Q> Lookup<Q> for HashedTable<K, V, S>
where
    K: Eq + Hash + Borrow<Q>,
    Q: ?Sized + Hash + Eq,
    S: BuildHasher,
{
    fn find(&self, q: &Q) -> Option<Slot> {
        let _g = self.reentrancy.enter("find");
        let hash = self.hasher.hash_one(q);
        self.index
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|e| e.key.borrow() == q)
                    .unwrap_or(false)
            })
            .map(|&k| Slot::new(k))
    }
}
