//! CountedTable: per-entry liveness counting atop any backing `Table`.
//!
//! Each entry's count and value sit in a small shared cell next to the
//! table, and every `CountedSlot` holds that cell directly. Acquiring,
//! releasing and reaching the value therefore never touch the table; only
//! inserting and evicting do. A slot whose count reaches zero is reported
//! as dead and must later be passed to `evict`. Until then lookups and
//! traversal treat it as absent.

use crate::liveness::{LiveCount, LiveUnit};
use crate::table::{InsertError, Lookup, Table};
use core::cell::RefCell;
use std::rc::Rc;

#[derive(Debug)]
struct Shared<V> {
    liveness: LiveCount,
    value: RefCell<V>,
}

/// Stored value wrapper: the user value plus its liveness tracker.
#[derive(Debug)]
pub struct Counted<V> {
    shared: Rc<Shared<V>>,
}

impl<V> Counted<V> {
    pub(crate) fn new(value: V) -> Self {
        Self {
            shared: Rc::new(Shared {
                liveness: LiveCount::new(),
                value: RefCell::new(value),
            }),
        }
    }

    /// Number of outstanding handles on this entry.
    pub fn live_count(&self) -> usize {
        self.shared.liveness.get()
    }

    fn is_live(&self) -> bool {
        self.shared.liveness.is_live()
    }

    fn into_value(self) -> V {
        match Rc::try_unwrap(self.shared) {
            Ok(shared) => shared.value.into_inner(),
            Err(_) => unreachable!("a rejected entry was never shared"),
        }
    }
}

/// A slot together with the liveness unit it holds.
#[derive(Debug)]
pub struct CountedSlot<P, V> {
    pub(crate) slot: P,
    shared: Rc<Shared<V>>,
    unit: LiveUnit, // consumed by release()
}

impl<P: Copy + core::fmt::Debug, V> CountedSlot<P, V> {
    fn mint(slot: P, entry: &Counted<V>) -> Self {
        Self {
            slot,
            shared: Rc::clone(&entry.shared),
            unit: entry.shared.liveness.acquire(),
        }
    }

    /// Another unit on the same entry; used to clone a handle.
    pub fn acquire(&self) -> Self {
        let unit = self.shared.liveness.acquire();
        log::trace!("acquired unit on {:?}, live count {}", self.slot, self.live_count());
        Self {
            slot: self.slot,
            shared: Rc::clone(&self.shared),
            unit,
        }
    }

    /// Return the unit. Reports `Dead` when it was the last one.
    pub fn release(self) -> Released<P> {
        let CountedSlot { slot, shared, unit } = self;
        if shared.liveness.release(unit) {
            Released::Dead(slot)
        } else {
            Released::Live
        }
    }

    pub fn live_count(&self) -> usize {
        self.shared.liveness.get()
    }

    pub fn value(&self) -> &RefCell<V> {
        &self.shared.value
    }

    pub fn same_entry(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

/// Outcome of returning a unit to its entry.
#[derive(Debug, Eq, PartialEq)]
pub enum Released<P> {
    /// Other units are still outstanding.
    Live,
    /// That was the last unit; the slot must now be evicted.
    Dead(P),
}

pub struct CountedTable<T> {
    inner: T,
}

impl<T, K, V> CountedTable<T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Stored entries, including dead ones not yet evicted.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Mint a unit for the entry at `q`, if it exists and is live.
    ///
    /// An entry whose count already dropped to zero is treated as absent:
    /// its count is the only proof that it is still referenced.
    pub fn find<Q>(&self, q: &Q) -> Option<CountedSlot<T::Slot, V>>
    where
        T: Lookup<Q>,
        Q: ?Sized,
    {
        let slot = self.inner.find(q)?;
        let entry = self.inner.value(slot).filter(|e| e.is_live())?;
        Some(CountedSlot::mint(slot, entry))
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        T: Lookup<Q>,
        Q: ?Sized,
    {
        self.inner
            .find(q)
            .and_then(|slot| self.inner.value(slot))
            .is_some_and(Counted::is_live)
    }

    /// Insert `key` or overwrite its value in place, and mint a unit for it.
    ///
    /// The stored key and the liveness tracker of an existing entry are kept
    /// as is. On overwrite the offered key and the replaced value come back,
    /// so the caller decides when they are dropped.
    ///
    /// # Panics
    /// If the existing value is borrowed, or if the existing entry is dead
    /// and was not evicted first.
    pub fn upsert(&mut self, key: K, value: V) -> (CountedSlot<T::Slot, V>, Option<(K, V)>) {
        match self.inner.insert(key, Counted::new(value)) {
            Ok(slot) => {
                log::trace!("inserted new entry, {} entries now", self.inner.len());
                let entry = self
                    .inner
                    .value(slot)
                    .expect("freshly inserted slot must resolve");
                (CountedSlot::mint(slot, entry), None)
            }
            Err(InsertError::DuplicateKey { slot, key, value }) => {
                let entry = self
                    .inner
                    .value(slot)
                    .expect("duplicate insert must report a stored slot");
                assert!(entry.is_live(), "overwriting an entry awaiting eviction");
                let old = entry.shared.value.replace(value.into_value());
                log::trace!(
                    "overwrote value of existing entry with {} live handles",
                    entry.live_count()
                );
                (CountedSlot::mint(slot, entry), Some((key, old)))
            }
        }
    }

    /// Erase a dead entry and hand back its parts. `None` if the slot is
    /// already gone.
    pub fn evict(&mut self, slot: T::Slot) -> Option<(K, Counted<V>)> {
        debug_assert!(
            self.inner.value(slot).map_or(true, |e| !e.is_live()),
            "evicting an entry that still has live handles"
        );
        let evicted = self.inner.remove(slot)?;
        log::debug!("evicted entry, {} entries remain", self.inner.len());
        Some(evicted)
    }

    pub fn key(&self, h: &CountedSlot<T::Slot, V>) -> Option<&K> {
        self.inner.key(h.slot)
    }

    /// Visit every live entry once, in the table's native order.
    ///
    /// # Panics
    /// If a visited value is mutably borrowed.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        self.inner.for_each(|_, k, c| {
            if c.is_live() {
                f(k, &*c.shared.value.borrow());
            }
        });
    }

    /// Like `for_each`, with mutable access to each value in turn.
    ///
    /// # Panics
    /// If a visited value is already borrowed.
    pub fn for_each_mut<F>(&self, mut f: F)
    where
        F: FnMut(&K, &mut V),
    {
        self.inner.for_each(|_, k, c| {
            if c.is_live() {
                f(k, &mut *c.shared.value.borrow_mut());
            }
        });
    }
}
