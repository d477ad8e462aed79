//! Connection reference count guarding instance teardown.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::warn;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct RefState {
    count: usize,
    retired: bool,
}

/// Counts live connections to one instance.
///
/// Every mutation happens under one lock, so exactly one release observes
/// the transition to zero.
#[derive(Debug, Default)]
pub(crate) struct RefCount {
    state: Mutex<RefState>,
}

impl RefCount {
    fn lock(&self) -> MutexGuard<'_, RefState> {
        // The state is two plain values; a panicking holder cannot leave it torn.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a reference. Returns `false` without counting when the instance
    /// has been retired.
    pub(crate) fn acquire(&self) -> bool {
        let mut state = self.lock();
        if state.retired {
            return false;
        }
        state.count += 1;
        true
    }

    /// Drops a reference and reports whether this call took the count from
    /// one to zero. When it did and `retire_on_zero` is set, the count is
    /// retired in the same critical section.
    pub(crate) fn release(&self, retire_on_zero: bool) -> bool {
        let mut state = self.lock();
        let Some(remaining) = state.count.checked_sub(1) else {
            warn!("connection released with no outstanding references");
            return false;
        };
        state.count = remaining;
        if remaining == 0 && retire_on_zero {
            state.retired = true;
        }
        remaining == 0
    }

    pub(crate) fn count(&self) -> usize {
        self.lock().count
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.lock().retired
    }
}
