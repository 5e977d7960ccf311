//! OwnershipMap: the public map and its handles.
//!
//! Handles reach their entry's count and value directly; only `put`, key
//! access, traversal and eviction borrow the table. An entry whose last
//! handle goes while the table is borrowed is queued as dead: it is already
//! invisible to `len`, lookups and traversal, and is evicted as soon as the
//! table is free again.

use crate::counted::{Counted, CountedSlot, CountedTable, Released};
use crate::table::{HashedTable, Lookup, OrderedTable, Table};
use core::cell::{self, RefCell};
use core::fmt;
use core::hash::{BuildHasher, Hash, Hasher};
use core::marker::PhantomData;
use std::collections::hash_map::RandomState;
use std::rc::Rc;

/// Failure of a fallible handle accessor.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum HandleError {
    /// Default-constructed, moved-from, or released handle.
    #[error("handle does not refer to a live entry")]
    Detached,
    /// The value (or, for keys, the map storage) is already borrowed in a
    /// conflicting way, e.g. by a live `value_mut` guard on the same entry.
    #[error("entry is already borrowed")]
    Busy,
}

struct Inner<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    table: RefCell<CountedTable<T>>,
    // Released entries waiting for the table to be free.
    dead: RefCell<Vec<T::Slot>>,
    _kv: PhantomData<fn() -> (K, V)>,
}

impl<K, V, T> Inner<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn live_len(&self) -> Option<usize> {
        let stored = self.table.try_borrow().ok()?.len();
        Some(stored - self.dead.borrow().len())
    }

    fn retire(&self, slot: T::Slot) {
        self.dead.borrow_mut().push(slot);
        self.reap();
    }

    /// Evict every queued entry, unless the table is borrowed.
    ///
    /// Evicted keys and values drop with no borrow held; handles they own
    /// may retire further entries, which the next round picks up.
    fn reap(&self) {
        loop {
            let Ok(mut table) = self.table.try_borrow_mut() else {
                return;
            };
            let slots = core::mem::take(&mut *self.dead.borrow_mut());
            if slots.is_empty() {
                return;
            }
            let evicted: Vec<_> = slots.into_iter().filter_map(|s| table.evict(s)).collect();
            drop(table);
            drop(evicted);
        }
    }
}

/// A keyed map whose entries live exactly as long as the handles on them.
///
/// `put` and `get` hand out [`Handle`]s. Each handle holds one unit of its
/// entry's live count; the entry is gone the moment the last unit is
/// released. There is no `remove`.
///
/// Handles co-own the storage, so the map itself may be dropped while
/// handles are still around. As with `Rc`, a value that holds a handle to
/// its own entry keeps that entry alive forever.
pub struct OwnershipMap<K, V, T = HashedTable<K, Counted<V>>>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    inner: Rc<Inner<K, V, T>>,
}

/// `OwnershipMap` over a hash table with a configurable hasher.
pub type HashOwnershipMap<K, V, S = RandomState> = OwnershipMap<K, V, HashedTable<K, Counted<V>, S>>;

/// `OwnershipMap` over a key-ordered table; traversal is in key order.
pub type OrderedOwnershipMap<K, V> = OwnershipMap<K, V, OrderedTable<K, Counted<V>>>;

impl<K, V> OwnershipMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_table(HashedTable::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_table(HashedTable::with_capacity(capacity))
    }
}

impl<K, V, S> OwnershipMap<K, V, HashedTable<K, Counted<V>, S>>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_table(HashedTable::with_hasher(hasher))
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self::with_table(HashedTable::with_capacity_and_hasher(capacity, hasher))
    }
}

impl<K, V, T> Default for OwnershipMap<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>> + Default,
{
    fn default() -> Self {
        Self::with_table(T::default())
    }
}

impl<K, V, T> OwnershipMap<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    /// Build a map over an empty backing table.
    pub fn with_table(table: T) -> Self {
        debug_assert!(table.is_empty(), "backing table must start empty");
        Self {
            inner: Rc::new(Inner {
                table: RefCell::new(CountedTable::new(table)),
                dead: RefCell::new(Vec::new()),
                _kv: PhantomData,
            }),
        }
    }

    /// Number of live entries.
    ///
    /// # Panics
    /// If the storage is mutably borrowed, i.e. from inside user key code
    /// running during `put`.
    pub fn len(&self) -> usize {
        self.inner
            .live_len()
            .unwrap_or_else(|| panic!("OwnershipMap::len: storage is mutably borrowed"))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Presence check that does not mint a handle.
    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        T: Lookup<Q>,
        Q: ?Sized,
    {
        self.inner.table.borrow().contains_key(q)
    }

    /// Insert `key`, or overwrite its value in place, and return a handle.
    ///
    /// Overwriting is visible through every existing handle for `key`; their
    /// shared live count carries over and the stored key is kept. The offered
    /// key and the previous value are dropped after the map is consistent
    /// again, so either may own handles into this map.
    ///
    /// # Panics
    /// If called while the storage is borrowed (from inside `for_each`, or
    /// while a `key()` guard is alive) or while the value of `key` is
    /// borrowed.
    pub fn put(&self, key: K, value: V) -> Handle<K, V, T> {
        self.inner.reap();
        let (unit, replaced) = self.inner.table.borrow_mut().upsert(key, value);
        let handle = Handle::attach(Rc::clone(&self.inner), unit);
        drop(replaced);
        self.inner.reap();
        handle
    }

    /// Look up `q`. The handle is valid iff the entry exists, which is the
    /// same as it being held by at least one other handle. Never inserts.
    pub fn get<Q>(&self, q: &Q) -> Handle<K, V, T>
    where
        T: Lookup<Q>,
        Q: ?Sized,
    {
        let found = self.inner.table.borrow().find(q);
        match found {
            Some(unit) => Handle::attach(Rc::clone(&self.inner), unit),
            None => {
                log::trace!("lookup missed; returning a detached handle");
                Handle::default()
            }
        }
    }

    /// Like [`get`](Self::get), returning a handle without mutable access.
    pub fn get_read_only<Q>(&self, q: &Q) -> ReadHandle<K, V, T>
    where
        T: Lookup<Q>,
        Q: ?Sized,
    {
        ReadHandle::from(self.get(q))
    }

    /// Call `f` on every live entry once, in the table's native order.
    ///
    /// `f` may use handles, call `get` and release handles; entries it
    /// releases are evicted once the traversal ends. `put` from inside `f`
    /// panics, as does reading a value that is mutably borrowed.
    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(&K, &V),
    {
        let mut f = f;
        self.inner.reap();
        self.inner.table.borrow().for_each(&mut f);
        // Handles captured by `f` are released with the storage free.
        drop(f);
        self.inner.reap();
    }

    /// Call `f` with mutable access to every live entry's value.
    ///
    /// Each value is exclusively borrowed only while `f` visits it; the
    /// same rules as [`for_each`](Self::for_each) apply otherwise.
    pub fn for_each_mut<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V),
    {
        let mut f = f;
        self.inner.reap();
        self.inner.table.borrow().for_each_mut(&mut f);
        drop(f);
        self.inner.reap();
    }

    /// True if `handle` is attached to an entry of this map.
    pub fn owns(&self, handle: &Handle<K, V, T>) -> bool {
        handle
            .attached
            .as_ref()
            .is_some_and(|a| Rc::ptr_eq(&a.owner, &self.inner))
    }
}

impl<K, V, T> fmt::Debug for OwnershipMap<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnershipMap")
            .field("len", &self.inner.live_len())
            .finish_non_exhaustive()
    }
}

struct Attached<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    owner: Rc<Inner<K, V, T>>,
    unit: CountedSlot<T::Slot, V>,
}

impl<K, V, T> Attached<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn duplicate(&self) -> Self {
        Self {
            owner: Rc::clone(&self.owner),
            unit: self.unit.acquire(),
        }
    }

    fn same_entry(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.owner, &other.owner) && self.unit.same_entry(&other.unit)
    }

    fn release(self) {
        let Attached { owner, unit } = self;
        if let Released::Dead(slot) = unit.release() {
            owner.retire(slot);
        }
    }
}

/// Shared, mutable capability on one entry of an [`OwnershipMap`].
///
/// - `clone` adds one unit to the entry's live count.
/// - dropping (or [`release`](Self::release)) removes one; after the last
///   one the entry is gone from the map at once.
/// - [`take`](Self::take) moves the unit out, leaving this handle detached.
/// - `clone_from` is copy-assignment: a no-op when both handles refer to the
///   same entry, otherwise it releases the current unit before acquiring.
///
/// Detached handles (default, taken-from, released, or from a missed `get`)
/// report `is_valid() == false`; the panicking accessors require a valid
/// handle, the `try_` variants return [`HandleError`] instead.
#[must_use = "dropping a Handle releases its entry right away"]
pub struct Handle<K, V, T = HashedTable<K, Counted<V>>>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    attached: Option<Attached<K, V, T>>,
}

impl<K, V, T> Handle<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn attach(owner: Rc<Inner<K, V, T>>, unit: CountedSlot<T::Slot, V>) -> Self {
        Self {
            attached: Some(Attached { owner, unit }),
        }
    }

    fn attached(&self) -> Result<&Attached<K, V, T>, HandleError> {
        self.attached.as_ref().ok_or(HandleError::Detached)
    }

    pub fn is_valid(&self) -> bool {
        self.attached.is_some()
    }

    /// The entry's key. The guard holds a shared borrow of the map storage,
    /// so `put` panics while it is alive.
    pub fn try_key(&self) -> Result<cell::Ref<'_, K>, HandleError> {
        let a = self.attached()?;
        let table = a.owner.table.try_borrow().map_err(|_| HandleError::Busy)?;
        cell::Ref::filter_map(table, |t| t.key(&a.unit)).map_err(|_| HandleError::Detached)
    }

    /// # Panics
    /// If the handle is detached or the storage is mutably borrowed.
    pub fn key(&self) -> cell::Ref<'_, K> {
        self.try_key()
            .unwrap_or_else(|e| panic!("Handle::key: {e}"))
    }

    pub fn try_value(&self) -> Result<cell::Ref<'_, V>, HandleError> {
        let a = self.attached()?;
        a.unit.value().try_borrow().map_err(|_| HandleError::Busy)
    }

    /// # Panics
    /// If the handle is detached or the value is mutably borrowed.
    pub fn value(&self) -> cell::Ref<'_, V> {
        self.try_value()
            .unwrap_or_else(|e| panic!("Handle::value: {e}"))
    }

    pub fn try_value_mut(&self) -> Result<cell::RefMut<'_, V>, HandleError> {
        let a = self.attached()?;
        a.unit.value().try_borrow_mut().map_err(|_| HandleError::Busy)
    }

    /// Mutable access to the entry's value, seen by every handle on it.
    /// Other entries stay fully usable while the guard is alive.
    ///
    /// # Panics
    /// If the handle is detached or the value is already borrowed.
    pub fn value_mut(&self) -> cell::RefMut<'_, V> {
        self.try_value_mut()
            .unwrap_or_else(|e| panic!("Handle::value_mut: {e}"))
    }

    /// Outstanding handles on this entry, this one included. Zero if detached.
    pub fn live_count(&self) -> usize {
        self.attached.as_ref().map_or(0, |a| a.unit.live_count())
    }

    /// Move this handle's unit into a new handle, leaving `self` detached.
    pub fn take(&mut self) -> Self {
        Self {
            attached: self.attached.take(),
        }
    }

    /// Release this handle's unit now. Detached handles are left as is.
    pub fn release(&mut self) {
        if let Some(a) = self.attached.take() {
            a.release();
        }
    }

    /// A read-only handle on the same entry.
    pub fn read_only(&self) -> ReadHandle<K, V, T> {
        ReadHandle {
            inner: self.clone(),
        }
    }
}

impl<K, V, T> Drop for Handle<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn drop(&mut self) {
        self.release();
    }
}

impl<K, V, T> Default for Handle<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn default() -> Self {
        Self { attached: None }
    }
}

impl<K, V, T> Clone for Handle<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn clone(&self) -> Self {
        Self {
            attached: self.attached.as_ref().map(Attached::duplicate),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        if *self == *source {
            return;
        }
        self.release();
        self.attached = source.attached.as_ref().map(Attached::duplicate);
    }
}

impl<K, V, T> PartialEq for Handle<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn eq(&self, other: &Self) -> bool {
        match (&self.attached, &other.attached) {
            (Some(a), Some(b)) => a.same_entry(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<K, V, T> Eq for Handle<K, V, T> where T: Table<Key = K, Value = Counted<V>> {}

impl<K, V, T> Hash for Handle<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.attached {
            Some(a) => {
                (Rc::as_ptr(&a.owner) as *const ()).hash(state);
                a.unit.slot.hash(state);
            }
            None => 0u8.hash(state),
        }
    }
}

impl<K, V, T> fmt::Debug for Handle<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("slot", &self.attached.as_ref().map(|a| a.unit.slot))
            .finish()
    }
}

/// Read-only counterpart of [`Handle`]: same liveness behavior, no
/// mutable access to the value.
#[must_use = "dropping a ReadHandle releases its entry right away"]
pub struct ReadHandle<K, V, T = HashedTable<K, Counted<V>>>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    inner: Handle<K, V, T>,
}

impl<K, V, T> ReadHandle<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    pub fn try_key(&self) -> Result<cell::Ref<'_, K>, HandleError> {
        self.inner.try_key()
    }

    /// # Panics
    /// If the handle is detached or the storage is mutably borrowed.
    pub fn key(&self) -> cell::Ref<'_, K> {
        self.inner.key()
    }

    pub fn try_value(&self) -> Result<cell::Ref<'_, V>, HandleError> {
        self.inner.try_value()
    }

    /// # Panics
    /// If the handle is detached or the value is mutably borrowed.
    pub fn value(&self) -> cell::Ref<'_, V> {
        self.inner.value()
    }

    pub fn live_count(&self) -> usize {
        self.inner.live_count()
    }

    pub fn take(&mut self) -> Self {
        Self {
            inner: self.inner.take(),
        }
    }

    pub fn release(&mut self) {
        self.inner.release();
    }
}

impl<K, V, T> From<Handle<K, V, T>> for ReadHandle<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn from(inner: Handle<K, V, T>) -> Self {
        Self { inner }
    }
}

impl<K, V, T> Default for ReadHandle<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn default() -> Self {
        Self {
            inner: Handle::default(),
        }
    }
}

impl<K, V, T> Clone for ReadHandle<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.inner.clone_from(&source.inner);
    }
}

impl<K, V, T> PartialEq for ReadHandle<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<K, V, T> Eq for ReadHandle<K, V, T> where T: Table<Key = K, Value = Counted<V>> {}

impl<K, V, T> Hash for ReadHandle<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl<K, V, T> fmt::Debug for ReadHandle<K, V, T>
where
    T: Table<Key = K, Value = Counted<V>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadHandle").field(&self.inner).finish()
    }
}
