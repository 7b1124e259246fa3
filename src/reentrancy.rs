//! Debug-only reentrancy guard for the dictionary.
//!
//! `Dict` calls user code (the `DictType` hooks) while its slot arrays may
//! be half-migrated. A hook that reaches back into the same table would
//! observe that state, so every public entry point is guarded. In debug
//! builds a nested entry panics and names both operations. In release
//! builds the tracker is zero-sized and the guard is a no-op.
//!
//! The guard owns a handle to the depth counter instead of borrowing the
//! tracker, which lets a guarded method keep using `&mut self`.

use core::marker::PhantomData;
#[cfg(debug_assertions)]
use std::cell::Cell;
#[cfg(debug_assertions)]
use std::rc::Rc;

#[derive(Debug)]
pub(crate) struct DebugReentrancy {
    #[cfg(debug_assertions)]
    active: Rc<Cell<Option<&'static str>>>,
    // Keep !Send + !Sync in line with single-threaded design.
    _nosend: PhantomData<*mut ()>,
}

impl DebugReentrancy {
    pub(crate) fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            active: Rc::new(Cell::new(None)),
            _nosend: PhantomData,
        }
    }

    /// Enter the operation named `op`. Panics in debug builds if another
    /// guarded operation is still running on the same instance.
    #[inline]
    #[allow(unused_variables)]
    pub(crate) fn enter(&self, op: &'static str) -> ReentrancyGuard {
        #[cfg(debug_assertions)]
        {
            if let Some(outer) = self.active.get() {
                panic!("reentrancy detected: `{op}` called while `{outer}` is running");
            }
            self.active.set(Some(op));
            ReentrancyGuard {
                active: Rc::clone(&self.active),
                _nosend: PhantomData,
            }
        }

        #[cfg(not(debug_assertions))]
        {
            ReentrancyGuard {
                _nosend: PhantomData,
            }
        }
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// Released on drop, including during unwinding.
pub(crate) struct ReentrancyGuard {
    #[cfg(debug_assertions)]
    active: Rc<Cell<Option<&'static str>>>,
    _nosend: PhantomData<*mut ()>,
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            debug_assert!(self.active.get().is_some());
            self.active.set(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DebugReentrancy;

    #[test]
    fn sequential_entries_are_ok() {
        let r = DebugReentrancy::new();
        {
            let _g = r.enter("add");
        }
        let _g = r.enter("find");
    }

    #[cfg(debug_assertions)]
    #[test]
    fn nested_entry_panics_with_both_names() {
        let r = DebugReentrancy::new();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _outer = r.enter("add");
            let _inner = r.enter("find");
        }));
        let payload = res.expect_err("nested entry must panic in debug builds");
        let msg = payload
            .downcast_ref::<String>()
            .cloned()
            .unwrap_or_default();
        assert!(msg.contains("`find`") && msg.contains("`add`"), "{msg}");
    }

    #[cfg(debug_assertions)]
    #[test]
    fn guard_released_after_unwind() {
        let r = DebugReentrancy::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _g = r.enter("add");
            panic!("hook failed");
        }));
        let _g = r.enter("add");
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn nested_entry_is_noop_in_release() {
        let r = DebugReentrancy::new();
        let _g1 = r.enter("add");
        let _g2 = r.enter("find");
    }
}
