//! Sharded value arena.
//!
//! Installed row values live here, addressed by a [`ValueIdx`] packed into
//! the 62-bit payload of a value slot word. Writers allocate from their
//! own core's shard (allocation affinity), so allocation contention is
//! zero in steady state; any core may fetch. Garbage collection returns
//! retired handles to the owning shard's free list.

use parking_lot::RwLock;

use ocelot_types::{CoreId, RowValue};

/// Values per arena chunk.
const ARENA_CHUNK: usize = 4096;

/// Shard bits in a packed payload (bounds the worker-core count).
const SHARD_BITS: u32 = 6;

/// Chunk bits in a packed payload.
const CHUNK_BITS: u32 = 24;

// ---------------------------------------------------------------------------
// ValueIdx
// ---------------------------------------------------------------------------

/// Handle to one value slot: `(shard, chunk, offset)`.
///
/// Packs losslessly into 62 bits: `shard(6) | chunk(24) | offset(32)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueIdx {
    shard: u32,
    chunk: u32,
    offset: u32,
}

impl ValueIdx {
    #[inline]
    #[must_use]
    pub const fn new(shard: u32, chunk: u32, offset: u32) -> Self {
        Self { shard, chunk, offset }
    }

    /// Pack into a slot-word payload.
    #[inline]
    #[must_use]
    pub const fn to_payload(self) -> u64 {
        ((self.shard as u64) << (CHUNK_BITS + 32))
            | ((self.chunk as u64) << 32)
            | self.offset as u64
    }

    /// Unpack from a slot-word payload.
    #[inline]
    #[must_use]
    pub const fn from_payload(payload: u64) -> Self {
        Self {
            shard: (payload >> (CHUNK_BITS + 32)) as u32 & ((1 << SHARD_BITS) - 1),
            chunk: (payload >> 32) as u32 & ((1 << CHUNK_BITS) - 1),
            offset: payload as u32,
        }
    }
}

// ---------------------------------------------------------------------------
// ValueArena
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Shard {
    chunks: Vec<Vec<Option<RowValue>>>,
    free_list: Vec<(u32, u32)>,
    high_water: u64,
}

impl Shard {
    fn alloc(&mut self, value: RowValue) -> (u32, u32) {
        if let Some((chunk, offset)) = self.free_list.pop() {
            self.chunks[chunk as usize][offset as usize] = Some(value);
            return (chunk, offset);
        }
        if self
            .chunks
            .last()
            .is_none_or(|c| c.len() >= ARENA_CHUNK)
        {
            self.chunks.push(Vec::with_capacity(ARENA_CHUNK));
        }
        let chunk = self.chunks.len() - 1;
        let offset = self.chunks[chunk].len();
        self.chunks[chunk].push(Some(value));
        self.high_water += 1;
        (chunk as u32, offset as u32)
    }
}

/// Per-core-sharded arena of row values.
#[derive(Debug)]
pub struct ValueArena {
    shards: Box<[RwLock<Shard>]>,
}

impl ValueArena {
    /// One shard per worker core.
    #[must_use]
    pub fn new(nr_shards: usize) -> Self {
        assert!(nr_shards > 0 && nr_shards <= 1 << SHARD_BITS);
        Self {
            shards: (0..nr_shards).map(|_| RwLock::new(Shard::default())).collect(),
        }
    }

    /// Store `value` in `core`'s shard.
    pub fn alloc(&self, core: CoreId, value: RowValue) -> ValueIdx {
        let shard = core.get() % self.shards.len();
        let (chunk, offset) = self.shards[shard].write().alloc(value);
        ValueIdx::new(shard as u32, chunk, offset)
    }

    /// Clone out the value at `idx`, if the slot is live.
    #[must_use]
    pub fn fetch(&self, idx: ValueIdx) -> Option<RowValue> {
        let shard = self.shards.get(idx.shard as usize)?.read();
        shard
            .chunks
            .get(idx.chunk as usize)?
            .get(idx.offset as usize)?
            .clone()
    }

    /// Release the slot at `idx` back to its shard's free list.
    ///
    /// Tolerates an already-freed slot (GC may race a retired epoch's
    /// dry-run bookkeeping); frees are idempotent per handle generation.
    pub fn free(&self, idx: ValueIdx) {
        let Some(lock) = self.shards.get(idx.shard as usize) else {
            return;
        };
        let mut shard = lock.write();
        let Some(slot) = shard
            .chunks
            .get_mut(idx.chunk as usize)
            .and_then(|c| c.get_mut(idx.offset as usize))
        else {
            return;
        };
        if slot.take().is_some() {
            shard.free_list.push((idx.chunk, idx.offset));
        }
    }

    /// Live value count across all shards (diagnostics).
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.shards
            .iter()
            .map(|s| {
                let s = s.read();
                s.chunks.iter().map(|c| c.len()).sum::<usize>() - s.free_list.len()
            })
            .sum()
    }

    /// Total slots ever allocated across all shards.
    #[must_use]
    pub fn high_water(&self) -> u64 {
        self.shards.iter().map(|s| s.read().high_water).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
