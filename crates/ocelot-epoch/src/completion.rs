//! Batch completion tracking.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Countdown to an exactly-once continuation.
///
/// Created holding one unit on behalf of the dispatching thread, so the
/// continuation cannot fire while work is still being fanned out; the
/// dispatcher releases its hold with `complete(1)` once every unit has
/// been counted in via [`increment`](Self::increment).
pub struct Completion {
    pending: AtomicU64,
    continuation: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Completion {
    #[must_use]
    pub fn new(continuation: impl FnOnce() + Send + 'static) -> Self {
        Self {
            pending: AtomicU64::new(1),
            continuation: Mutex::new(Some(Box::new(continuation))),
        }
    }

    /// Add `n` outstanding units of work.
    ///
    /// Must happen while at least one unit (the dispatch hold counts) is
    /// still pending; incrementing a completed counter is a bug.
    pub fn increment(&self, n: u64) {
        let prev = self.pending.fetch_add(n, Ordering::Relaxed);
        debug_assert!(prev > 0, "increment after completion");
    }

    /// Retire `n` units. The continuation runs on the calling thread of
    /// whichever `complete` brings the count to zero.
    pub fn complete(&self, n: u64) {
        let prev = self.pending.fetch_sub(n, Ordering::AcqRel);
        debug_assert!(prev >= n, "completion counter underflow");
        if prev == n {
            if let Some(continuation) = self.continuation.lock().take() {
                continuation();
            }
        }
    }

    /// Units still outstanding (diagnostics, tests).
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
