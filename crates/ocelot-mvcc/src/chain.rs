//! The version-chain contract shared by all three variants.
//!
//! One capability set (reserve / read / write / garbage-collect) with
//! three implementations selected per table at startup:
//! [`SortedChain`](crate::sorted::SortedChain) (default),
//! [`LinkListChain`](crate::linklist::LinkListChain), and
//! [`TurnChain`](crate::turn::TurnChain) for deterministic replay.
//!
//! Structural mutation (reserving a slot for a serial id) is mutually
//! exclusive per chain and *fails* under contention so the caller retries;
//! value installation is a single-word atomic per slot and proceeds fully
//! in parallel across slots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ocelot_types::{CoreId, EngineError, EpochNr, RowValue, SerialId};

use crate::arena::ValueArena;
use crate::linklist::LinkListChain;
use crate::slot::{SlotState, SlotWord, VersionCell, WAITER_MASK};
use crate::sorted::SortedChain;
use crate::spinner::SlotArray;
use crate::turn::TurnChain;

/// Epochs concurrently in flight: one executing, one retiring.
pub const MAX_CONCURRENT_EPOCHS: usize = 2;

// ---------------------------------------------------------------------------
// ChainCx
// ---------------------------------------------------------------------------

/// Per-call context for chain operations.
///
/// Constructed by the worker runtime and passed down explicitly; chains
/// hold no references to process-wide state.
#[derive(Clone, Copy)]
pub struct ChainCx<'a> {
    /// The calling worker's core.
    pub core: CoreId,
    /// Wait/notify slots shared by all workers.
    pub spinners: &'a SlotArray,
    /// Arena backing installed values.
    pub values: &'a ValueArena,
}

// ---------------------------------------------------------------------------
// VersionChain
// ---------------------------------------------------------------------------

/// Per-row multi-version store keyed by serial id.
pub trait VersionChain: Send + Sync {
    /// Reserve a slot for `sid` (write intent).
    ///
    /// Returns `false` if the structural lock was contended; the caller
    /// retries the whole operation. Reserving an already-reserved `sid`
    /// succeeds without duplicating the entry.
    fn reserve_version(&self, sid: SerialId, epoch_nr: EpochNr, cx: &ChainCx<'_>) -> bool;

    /// Reserve a *read* access. Only the deterministic turn-based variant
    /// records reads; the multi-version variants resolve reads from the
    /// chain directly.
    fn reserve_read(&self, sid: SerialId, epoch_nr: EpochNr, cx: &ChainCx<'_>) -> bool {
        let _ = (sid, epoch_nr, cx);
        true
    }

    /// The latest version visible to `sid` (strictly earlier serial id),
    /// or `None` if the row is absent or deleted at that snapshot.
    ///
    /// Blocks cooperatively if the visible version is still pending.
    fn read_version(&self, sid: SerialId, cx: &ChainCx<'_>) -> Option<RowValue>;

    /// Install `value` (or a tombstone for `None`) into the slot reserved
    /// for exactly `sid`. With `dry_run`, only validates the reservation.
    ///
    /// An unreserved `sid` is a diverging outcome: two engine phases
    /// disagree about this row's write set. The error carries the full
    /// version list for diagnostics; there is no recovery path.
    fn write_version(
        &self,
        sid: SerialId,
        value: Option<RowValue>,
        epoch_nr: EpochNr,
        dry_run: bool,
        cx: &ChainCx<'_>,
    ) -> Result<(), EngineError>;

    /// Drop versions below `boundary`, retaining the newest such entry
    /// (the GC floor) so earlier reads still resolve. Returns the number
    /// of versions released.
    fn garbage_collect(&self, boundary: SerialId, cx: &ChainCx<'_>) -> usize;

    /// Number of entries currently on the chain (diagnostics, tests).
    fn version_count(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Variant selection
// ---------------------------------------------------------------------------

/// Concurrency-control variant, chosen per table at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainVariant {
    /// Sorted array with binary-search reads (default).
    Sorted,
    /// Backward singly-linked list; no reallocation on growth.
    LinkList,
    /// Deterministic turn-based replay (pre-ordered execution mode).
    TurnBased,
}

/// Mint a fresh chain of the given variant.
#[must_use]
pub fn new_chain(variant: ChainVariant) -> Arc<dyn VersionChain> {
    match variant {
        ChainVariant::Sorted => Arc::new(SortedChain::new()),
        ChainVariant::LinkList => Arc::new(LinkListChain::new()),
        ChainVariant::TurnBased => Arc::new(TurnChain::new()),
    }
}

// ---------------------------------------------------------------------------
// GcRule
// ---------------------------------------------------------------------------

/// Per-chain garbage-collection trigger.
///
/// Runs on the reserve path, under the structural lock: the first
/// reservation a chain sees from a new epoch collects everything below
/// the minimum still-live epoch's base serial id.
#[derive(Debug, Default)]
pub struct GcRule {
    last_gc_epoch: AtomicU64,
}

impl GcRule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// If `epoch_nr` advances past the last collected epoch, invoke
    /// `collect` with the GC boundary (base serial id of the minimum
    /// still-live epoch).
    pub fn on_reserve<F: FnOnce(SerialId)>(&self, epoch_nr: EpochNr, collect: F) {
        let seen = self.last_gc_epoch.load(Ordering::Relaxed);
        if epoch_nr.get() <= seen {
            return;
        }
        // Caller holds the structural lock, so the store cannot race
        // another reservation on this chain.
        self.last_gc_epoch.store(epoch_nr.get(), Ordering::Relaxed);
        let min_live = epoch_nr.saturating_sub(MAX_CONCURRENT_EPOCHS as u64 - 1);
        collect(SerialId::base_of(min_live));
    }
}

// ---------------------------------------------------------------------------
// Shared slot-word protocol helpers
// ---------------------------------------------------------------------------

/// Resolve a version cell to its value, parking on the caller's spinner
/// slot while the word is still pending.
///
/// The caller must have dropped the chain's structural lock: this can
/// spin until another core's piece runs.
pub(crate) fn wait_for_value(cell: &VersionCell, cx: &ChainCx<'_>) -> Option<RowValue> {
    loop {
        let word = cell.load();
        match word.state() {
            SlotState::Value(idx) => return cx.values.fetch(idx),
            SlotState::Tombstone => return None,
            SlotState::Pending { waiters } => {
                let parked = SlotWord::pending_with(waiters & !cx.core.bit());
                if cell.compare_exchange(word, parked).is_ok() {
                    cx.spinners.wait(cx.core);
                }
                // Either way, re-decode: the writer may have installed
                // between our load and the exchange.
            }
        }
    }
}

/// Install `value` into `cell` and wake every core that parked on the
/// displaced pending word. Returns the displaced word's value handle if
/// this install clobbered an earlier one (the caller frees it).
pub(crate) fn install_and_notify(
    cell: &VersionCell,
    value: Option<RowValue>,
    cx: &ChainCx<'_>,
) -> Option<crate::arena::ValueIdx> {
    let word = match value {
        Some(v) => SlotWord::value(cx.values.alloc(cx.core, v)),
        None => SlotWord::tombstone(),
    };
    let old = cell.install(word);
    match old.state() {
        SlotState::Pending { waiters } => {
            // Cleared bits are cores that parked on this slot.
            let parked = (WAITER_MASK as u32) & !waiters;
            if parked != 0 {
                cx.spinners.notify_all(parked);
            }
            None
        }
        SlotState::Value(idx) => Some(idx),
        SlotState::Tombstone => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
