//! Per-core wait/notify slots.
//!
//! The worker runtime is cooperative: a reader blocked on a pending
//! version has no scheduler-level blocking primitive, so it busy-spins on
//! its own core's slot flag. The writer that produces the value sets the
//! flags named by the waiter bitmap it displaced from the slot word.
//!
//! There is deliberately no timeout: serial-id assignment guarantees the
//! producer was scheduled, so a stuck wait is a correctness bug upstream,
//! not a recoverable condition.

use std::sync::atomic::{AtomicBool, Ordering};

use ocelot_types::{CoreId, MAX_CORES};

/// Cache line size in bytes (x86-64 and AArch64).
pub const CACHE_LINE_BYTES: usize = 64;

/// Forces cache-line alignment so adjacent per-core slots never share a
/// line.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CacheAligned<T> {
    value: T,
}

impl<T> CacheAligned<T> {
    #[inline]
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

// ---------------------------------------------------------------------------
// SlotArray
// ---------------------------------------------------------------------------

/// Fixed array of per-core notification flags.
///
/// `wait` may only be called by the owning core on its own slot; `notify`
/// may be called by any core. A flag set before the waiter arrives makes
/// the wait return immediately, which is correct because the waiter always
/// re-decodes the slot word it parked on.
#[derive(Debug)]
pub struct SlotArray {
    slots: [CacheAligned<AtomicBool>; MAX_CORES],
}

impl SlotArray {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| CacheAligned::new(AtomicBool::new(false))),
        }
    }

    /// Busy-spin until this core's flag is set, then clear it.
    pub fn wait(&self, core: CoreId) {
        let slot = &self.slots[core.get()];
        while !slot.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
        slot.store(false, Ordering::Release);
    }

    /// Set the flag of every core named in `bitmap`.
    pub fn notify_all(&self, bitmap: u32) {
        let mut rest = bitmap;
        while rest != 0 {
            let core = rest.trailing_zeros() as usize;
            self.slots[core].store(true, Ordering::Release);
            rest &= rest - 1;
        }
    }

    /// Whether a core's flag is currently set (diagnostics only).
    #[must_use]
    pub fn is_set(&self, core: CoreId) -> bool {
        self.slots[core.get()].load(Ordering::Acquire)
    }
}

impl Default for SlotArray {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
