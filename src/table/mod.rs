//! Backing tables: keyed storage addressed through stable slots.
//!
//! A table owns `(key, value)` pairs and hands out a `Slot` for each one.
//! A slot stays valid until its own entry is removed; inserting or removing
//! other keys never moves or invalidates it. This is the only contract the
//! counting layer above relies on.

use core::fmt;
use core::hash::Hash;
use slotmap::DefaultKey;

mod hashed;
mod ordered;

pub use hashed::HashedTable;
pub use ordered::OrderedTable;

/// Stable, generational position of an entry in the built-in tables.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Slot(DefaultKey);

impl Slot {
    pub(crate) fn new(k: DefaultKey) -> Self {
        Slot(k)
    }
    pub(crate) fn raw(&self) -> DefaultKey {
        self.0
    }
}

/// Rejected insert. The table already holds the key at `slot`; the key and
/// value that were offered are handed back untouched.
#[derive(Debug, thiserror::Error)]
pub enum InsertError<P, K, V> {
    #[error("key is already present in the table")]
    DuplicateKey { slot: P, key: K, value: V },
}

/// Associative storage with stable slots.
pub trait Table {
    type Key;
    type Value;
    type Slot: Copy + Eq + Hash + fmt::Debug;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a new entry. Fails without side effects if the key exists.
    fn insert(
        &mut self,
        key: Self::Key,
        value: Self::Value,
    ) -> Result<Self::Slot, InsertError<Self::Slot, Self::Key, Self::Value>>;

    /// Erase the entry at `slot`, returning it. `None` for stale slots.
    fn remove(&mut self, slot: Self::Slot) -> Option<(Self::Key, Self::Value)>;

    fn key(&self, slot: Self::Slot) -> Option<&Self::Key>;

    fn value(&self, slot: Self::Slot) -> Option<&Self::Value>;

    fn value_mut(&mut self, slot: Self::Slot) -> Option<&mut Self::Value>;

    /// Visit every entry once, in the table's native order.
    fn for_each<F>(&self, f: F)
    where
        F: FnMut(Self::Slot, &Self::Key, &Self::Value);

    /// Like `for_each`, with mutable access to values.
    fn for_each_mut<F>(&mut self, f: F)
    where
        F: FnMut(Self::Slot, &Self::Key, &mut Self::Value);
}

/// Lookup by a borrowed form `Q` of the table's key.
///
/// Kept apart from `Table` because hashed and ordered tables need different
/// bounds on `Q` (`Hash + Eq` versus `Ord`).
pub trait Lookup<Q: ?Sized>: Table {
    fn find(&self, q: &Q) -> Option<Self::Slot>;

    fn contains_key(&self, q: &Q) -> bool {
        self.find(q).is_some()
    }
}

#[cfg(test)]
mod proptests;
