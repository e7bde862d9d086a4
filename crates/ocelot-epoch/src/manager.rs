//! The epoch pipeline.
//!
//! At most [`MAX_CONCURRENT_EPOCHS`] epochs are live: one executing and
//! one retiring. Advancing to epoch N+1 drops epoch N-1's arenas, so a
//! logical pointer into a retired epoch stops resolving exactly when
//! that epoch falls out of the ring.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use ocelot_mvcc::MAX_CONCURRENT_EPOCHS;
use ocelot_types::EpochNr;

use crate::memory::EpochMemory;

/// One bounded batch window: number plus its per-node arenas.
pub struct Epoch {
    nr: EpochNr,
    mem: EpochMemory,
}

impl Epoch {
    #[must_use]
    pub fn nr(&self) -> EpochNr {
        self.nr
    }

    #[must_use]
    pub fn memory(&self) -> &EpochMemory {
        &self.mem
    }
}

impl std::fmt::Debug for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Epoch").field("nr", &self.nr).finish_non_exhaustive()
    }
}

struct ManagerInner {
    current: EpochNr,
    ring: [Option<Arc<Epoch>>; MAX_CONCURRENT_EPOCHS],
}

/// Owns the ring of live epochs. One instance per engine context.
pub struct EpochManager {
    nr_nodes: usize,
    arena_capacity: u64,
    inner: RwLock<ManagerInner>,
}

impl EpochManager {
    /// Starts before the first epoch; epoch 0 never executes.
    #[must_use]
    pub fn new(nr_nodes: usize, arena_capacity: u64) -> Self {
        Self {
            nr_nodes,
            arena_capacity,
            inner: RwLock::new(ManagerInner {
                current: EpochNr::ZERO,
                ring: [const { None }; MAX_CONCURRENT_EPOCHS],
            }),
        }
    }

    #[must_use]
    pub fn current_epoch_nr(&self) -> EpochNr {
        self.inner.read().current
    }

    #[must_use]
    pub fn current_epoch(&self) -> Option<Arc<Epoch>> {
        let inner = self.inner.read();
        let slot = Self::slot_of(inner.current);
        inner.ring[slot].clone()
    }

    /// Look up a live epoch by number; `None` once it has retired from
    /// the ring (or never existed).
    #[must_use]
    pub fn epoch(&self, nr: EpochNr) -> Option<Arc<Epoch>> {
        let inner = self.inner.read();
        inner.ring[Self::slot_of(nr)]
            .as_ref()
            .filter(|epoch| epoch.nr == nr)
            .cloned()
    }

    /// Open epoch N+1, dropping epoch N-1's arenas in the same motion.
    pub fn advance(&self) -> Arc<Epoch> {
        let retired;
        let epoch;
        {
            let mut inner = self.inner.write();
            let next = inner.current.next();
            epoch = Arc::new(Epoch {
                nr: next,
                mem: EpochMemory::new(next, self.nr_nodes, self.arena_capacity),
            });
            retired = inner.ring[Self::slot_of(next)].replace(Arc::clone(&epoch));
            inner.current = next;
        }
        if let Some(retired) = &retired {
            debug!(epoch = %retired.nr(), "epoch arenas reset");
        }
        info!(epoch = %epoch.nr(), "epoch opened");
        epoch
    }

    fn slot_of(nr: EpochNr) -> usize {
        (nr.get() % MAX_CONCURRENT_EPOCHS as u64) as usize
    }
}

impl std::fmt::Debug for EpochManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochManager")
            .field("current", &self.current_epoch_nr())
            .field("nr_nodes", &self.nr_nodes)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
