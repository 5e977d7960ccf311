//! ownership-map: a single-threaded keyed map whose entries live exactly
//! as long as the handles that reference them.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: no `remove`, no sweeper. `put`/`get` hand out handles; the
//!   entry leaves the map when its last handle goes away.
//! - Layers:
//!   - `Table` (`HashedTable`, `OrderedTable`): keyed storage that hands
//!     out stable, generational slots. Duplicate inserts fail and return
//!     the rejected value. Each table carries a debug-only reentrancy
//!     guard around the spans that call user `Eq`/`Hash`/`Ord`.
//!   - `CountedTable<T>`: wraps any table and gives each entry a shared
//!     cell holding its `LiveCount` and its value. Every outstanding unit
//!     is linear and must be returned; the last return reports the entry
//!     as dead. Units reach the cell without touching the table.
//!   - `OwnershipMap<K, V, T>`: public API over `Rc<RefCell<CountedTable>>`
//!     plus a queue of dead slots. `Handle`/`ReadHandle` own one unit each
//!     and retire their entry on the last drop.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` through `Rc`.
//! - Slots stay valid across insertion and removal of other keys.
//! - Handles co-own the storage; the map may be dropped before them.
//!
//! Drop ordering
//! - A retired entry is evicted at once if the table is free, else as soon
//!   as it is (after `for_each`, or at the next `put` or release). Until
//!   then it is invisible to `len`, lookups and traversal.
//! - Eviction unlinks the entry and releases the storage borrow before the
//!   key and value are dropped. A value holding handles to other entries
//!   therefore cascades safely, as does a replaced value on `put`.
//!
//! Overflow semantics
//! - A live count that would wrap aborts the process, like `Rc`.
//!
//! Notes and non-goals
//! - No weak handles, no explicit removal, no capacity-driven eviction.
//! - Iteration order is the backing table's: slot order for
//!   `HashedTable`, ascending key order for `OrderedTable`.
//! - Keys are immutable after insertion.

#[cfg(feature = "bench_internal")]
pub mod counted;
#[cfg(not(feature = "bench_internal"))]
mod counted;
mod liveness;
mod ownership_map;
mod reentrancy;
pub mod table;

// Public surface
pub use counted::Counted;
pub use ownership_map::{
    Handle, HandleError, HashOwnershipMap, OrderedOwnershipMap, OwnershipMap, ReadHandle,
};
pub use table::{HashedTable, InsertError, Lookup, OrderedTable, Slot, Table};
