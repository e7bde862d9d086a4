//! Per-epoch, per-node object arenas and logical epoch pointers.
//!
//! Objects hosted by an epoch are addressed by `(epoch, node, offset)`
//! rather than a raw address. Offsets are minted by a per-node bump
//! counter, so two nodes laying out the same epoch identically agree on
//! what every offset means, and an object from one epoch can never be
//! confused with another epoch's identically-offset object: resolution
//! consults the manager's live-epoch table first.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;

use ocelot_types::{EngineError, EpochNr, NodeId};

use crate::manager::EpochManager;

#[derive(Default)]
struct NodeArena {
    next_offset: u64,
    objects: HashMap<u64, Arc<dyn Any + Send + Sync>>,
}

/// One epoch's per-node arenas.
pub struct EpochMemory {
    epoch_nr: EpochNr,
    capacity: u64,
    nodes: Box<[Mutex<NodeArena>]>,
}

impl EpochMemory {
    /// `capacity` is the logical byte budget per node; arenas are sized
    /// conservatively and exhaustion mid-run is fatal to the batch.
    #[must_use]
    pub fn new(epoch_nr: EpochNr, nr_nodes: usize, capacity: u64) -> Self {
        Self {
            epoch_nr,
            capacity,
            nodes: (0..nr_nodes).map(|_| Mutex::new(NodeArena::default())).collect(),
        }
    }

    #[must_use]
    pub fn epoch_nr(&self) -> EpochNr {
        self.epoch_nr
    }

    /// Host `value` in `node`'s arena, bumping the node's offset counter
    /// (8-byte aligned) and returning the logical pointer.
    pub fn alloc<T: Send + Sync + 'static>(
        &self,
        node: NodeId,
        value: T,
    ) -> Result<EpochObject<T>, EngineError> {
        let mut arena = self.nodes[node.index()].lock();
        let size = (mem::size_of::<T>().max(1) as u64 + 7) & !7;
        if arena.next_offset + size > self.capacity {
            return Err(EngineError::ArenaExhausted {
                node_id: node.get(),
            });
        }
        let offset = arena.next_offset;
        arena.next_offset += size;
        arena.objects.insert(offset, Arc::new(value));
        Ok(EpochObject {
            epoch_nr: self.epoch_nr,
            node,
            offset,
            _marker: PhantomData,
        })
    }

    /// Resolve an offset in `node`'s arena. `None` if nothing of type `T`
    /// lives at that offset.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, node: NodeId, offset: u64) -> Option<Arc<T>> {
        let arena = self.nodes[node.index()].lock();
        let object = Arc::clone(arena.objects.get(&offset)?);
        object.downcast::<T>().ok()
    }

    /// Bytes logically consumed on `node`.
    #[must_use]
    pub fn used(&self, node: NodeId) -> u64 {
        self.nodes[node.index()].lock().next_offset
    }
}

impl fmt::Debug for EpochMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpochMemory")
            .field("epoch_nr", &self.epoch_nr)
            .field("nr_nodes", &self.nodes.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// EpochObject
// ---------------------------------------------------------------------------

/// Logical pointer into an epoch arena: `(epoch, node, offset)`.
///
/// Plain data; freely copied and shipped between nodes. Resolution goes
/// through the [`EpochManager`] and fails once the epoch has retired
/// from the pipeline window.
pub struct EpochObject<T> {
    epoch_nr: EpochNr,
    node: NodeId,
    offset: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for EpochObject<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EpochObject<T> {}

impl<T> fmt::Debug for EpochObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpochObject")
            .field("epoch_nr", &self.epoch_nr)
            .field("node", &self.node)
            .field("offset", &self.offset)
            .finish()
    }
}

impl<T: Send + Sync + 'static> EpochObject<T> {
    #[must_use]
    pub fn epoch_nr(&self) -> EpochNr {
        self.epoch_nr
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Resolve to the hosted object via the manager's live-epoch table.
    pub fn resolve(&self, manager: &EpochManager) -> Result<Arc<T>, EngineError> {
        let expired = || EngineError::EpochExpired {
            epoch_nr: self.epoch_nr.get(),
        };
        let epoch = manager.epoch(self.epoch_nr).ok_or_else(expired)?;
        epoch.memory().get(self.node, self.offset).ok_or_else(expired)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
