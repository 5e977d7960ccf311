//! Per-entry live counts and the units drawn from them.
//!
//! Each outstanding handle owns one `LiveUnit`. Units are linear: the only
//! way to dispose of one is `LiveCount::release`, so an entry's count can
//! never drift below the number of handles that still point at it.

use core::cell::Cell;

/// One acquired unit of a `LiveCount`.
#[must_use = "a live unit must be handed back through LiveCount::release"]
#[derive(Debug)]
pub(crate) struct LiveUnit {
    _linear: (),
}

impl Drop for LiveUnit {
    fn drop(&mut self) {
        // A unit lost while unwinding leaves its entry counted, so the entry
        // leaks like an `Rc` cycle instead of being freed under a live handle.
        if !std::thread::panicking() {
            panic!("live unit dropped without being released");
        }
    }
}

/// Non-atomic count of outstanding handles on one entry.
#[derive(Debug)]
pub(crate) struct LiveCount {
    count: Cell<usize>,
}

impl LiveCount {
    pub(crate) fn new() -> Self {
        Self {
            count: Cell::new(0),
        }
    }

    pub(crate) fn get(&self) -> usize {
        self.count.get()
    }

    pub(crate) fn is_live(&self) -> bool {
        self.count.get() > 0
    }

    #[inline]
    pub(crate) fn acquire(&self) -> LiveUnit {
        let n = self.count.get().wrapping_add(1);
        if n == 0 {
            // Same policy as `Rc`: abort rather than continue with a wrapped count.
            std::process::abort();
        }
        self.count.set(n);
        LiveUnit { _linear: () }
    }

    /// Return a unit. True if it was the last one.
    #[inline]
    pub(crate) fn release(&self, unit: LiveUnit) -> bool {
        let c = self.count.get();
        assert!(c > 0, "LiveCount underflow");
        self.count.set(c - 1);
        core::mem::forget(unit);
        c == 1
    }
}
