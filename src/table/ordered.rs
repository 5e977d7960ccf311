//! OrderedTable: key-ordered index over slot storage.

use super::{InsertError, Lookup, Slot, Table};
use crate::reentrancy::DebugReentrancy;
use core::borrow::Borrow;
use slotmap::{DefaultKey, SlotMap};
use std::collections::BTreeMap;

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
}

/// Ordered backing table. Iterates in ascending key order.
///
/// The `BTreeMap` index keeps its own copy of every key, hence `K: Clone`.
/// Values live in slot storage, so slots stay put while the index rebalances.
///
/// `insert` clones the key while the owning map's storage is borrowed. Keys
/// that hold handles are fine: cloning a handle only touches its own entry.
/// A `Clone` impl that calls back into the same map panics.
pub struct OrderedTable<K, V> {
    index: BTreeMap<K, DefaultKey>,
    slots: SlotMap<DefaultKey, Entry<K, V>>,
    reentrancy: DebugReentrancy,
}

impl<K, V> OrderedTable<K, V> {
    pub fn new() -> Self {
        Self {
            index: BTreeMap::new(),
            slots: SlotMap::with_key(),
            reentrancy: DebugReentrancy::new(),
        }
    }
}

impl<K, V> Default for OrderedTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Table for OrderedTable<K, V>
where
    K: Ord + Clone,
{
    type Key = K;
    type Value = V;
    type Slot = Slot;

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn insert(&mut self, key: K, value: V) -> Result<Slot, InsertError<Slot, K, V>> {
        let _g = self.reentrancy.enter("insert");
        // Probe first so a rejected key can be handed back.
        if let Some(&k) = self.index.get(&key) {
            return Err(InsertError::DuplicateKey {
                slot: Slot::new(k),
                key,
                value,
            });
        }
        let k = self.slots.insert(Entry {
            key: key.clone(),
            value,
        });
        self.index.insert(key, k);
        Ok(Slot::new(k))
    }

    fn remove(&mut self, slot: Slot) -> Option<(K, V)> {
        let _g = self.reentrancy.enter("remove");
        let entry = self.slots.remove(slot.raw())?;
        self.index.remove(&entry.key);
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
        for &k in self.index.values() {
            if let Some(e) = self.slots.get(k) {
                f(Slot::new(k), &e.key, &e.value);
            }
        }
    }

    fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(Slot, &K, &mut V),
    {
        let slots = &mut self.slots;
        for &k in self.index.values() {
            if let Some(e) = slots.get_mut(k) {
                f(Slot::new(k), &e.key, &mut e.value);
            }
        }
    }
}

impl<K, V, Q> Lookup<Q> for OrderedTable<K, V>
where
    K: Ord + Clone + Borrow<Q>,
    Q: ?Sized + Ord,
{
    fn find(&self, q: &Q) -> Option<Slot> {
        let _g = self.reentrancy.enter("find");
        self.index.get(q).map(|&k| Slot::new(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_in_key_order_regardless_of_insert_order() {
        let mut t: OrderedTable<i32, &'static str> = OrderedTable::new();
        for (k, v) in [(3, "c"), (1, "a"), (2, "b")] {
            t.insert(k, v).unwrap();
        }
        let mut order = Vec::new();
        t.for_each(|_, k, v| order.push((*k, *v)));
        assert_eq!(order, vec![(1, "a"), (2, "b"), (3, "c")]);
    }

    #[test]
    fn duplicate_insert_keeps_original() {
        let mut t: OrderedTable<String, i32> = OrderedTable::new();
        let s = t.insert("k".to_string(), 1).unwrap();
        match t.insert("k".to_string(), 2) {
            Err(InsertError::DuplicateKey { slot, key, value }) => {
                assert_eq!(slot, s);
                assert_eq!(key, "k");
                assert_eq!(value, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(t.value(s), Some(&1));
    }

    #[test]
    fn remove_unlinks_index_and_stale_slot_stays_dead() {
        let mut t: OrderedTable<String, i32> = OrderedTable::new();
        let a = t.insert("a".to_string(), 1).unwrap();
        let b = t.insert("b".to_string(), 2).unwrap();
        assert_eq!(t.remove(a), Some(("a".to_string(), 1)));
        assert_eq!(t.find("a"), None);
        assert_eq!(t.find("b"), Some(b));
        assert!(t.remove(a).is_none());
        assert_eq!(t.len(), 1);

        let a2 = t.insert("a".to_string(), 3).unwrap();
        assert_ne!(a, a2);
        assert!(t.value(a).is_none());
        assert_eq!(t.value(a2), Some(&3));
    }

    #[test]
    fn for_each_mut_updates_in_key_order() {
        let mut t: OrderedTable<u8, Vec<u8>> = OrderedTable::new();
        for k in [2u8, 0, 1] {
            t.insert(k, Vec::new()).unwrap();
        }
        let mut step = 0u8;
        t.for_each_mut(|_, k, v| {
            v.push(step);
            v.push(*k);
            step += 1;
        });
        let s = t.find(&1u8).unwrap();
        assert_eq!(t.value(s), Some(&vec![1, 1]));
    }
}
