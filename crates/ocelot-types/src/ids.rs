//! Identifier newtypes.
//!
//! A `SerialId` packs `(epoch_nr << 32) | sequence` and is the single
//! source of truth for happens-before between transactions touching the
//! same row. `NodeId` is 1-based (node 0 is reserved/invalid, matching the
//! cluster numbering the arena tables are keyed by). `CoreId` is bounded
//! by [`MAX_CORES`] because a pending slot word carries a per-core waiter
//! bitmap in its low 32 bits.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum worker cores supported by the wait/notify slot array.
///
/// The pending-word waiter bitmap is 32 bits wide, one bit per core.
pub const MAX_CORES: usize = 32;

/// Maximum cluster nodes an epoch arena table is sized for.
pub const MAX_NODES: usize = 64;

// ---------------------------------------------------------------------------
// SerialId
// ---------------------------------------------------------------------------

/// Totally-ordered transaction serial id: `(epoch_nr << 32) | sequence`.
///
/// Sequences are assigned from 1 within an epoch, so `base_of(epoch)`
/// (sequence 0) is a strict lower bound on every serial id of that epoch
/// and serves as a garbage-collection boundary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct SerialId(u64);

impl SerialId {
    /// Pack an epoch number and an in-epoch sequence.
    #[inline]
    #[must_use]
    pub const fn new(epoch_nr: EpochNr, sequence: u32) -> Self {
        Self((epoch_nr.get() << 32) | sequence as u64)
    }

    /// Reconstruct from a raw packed word.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Sequence 0 of `epoch_nr`: strictly below every id of that epoch.
    #[inline]
    #[must_use]
    pub const fn base_of(epoch_nr: EpochNr) -> Self {
        Self(epoch_nr.get() << 32)
    }

    /// The raw packed word.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The epoch this id was assigned in.
    #[inline]
    #[must_use]
    pub const fn epoch_nr(self) -> EpochNr {
        EpochNr::new(self.0 >> 32)
    }

    /// The in-epoch sequence number.
    #[inline]
    #[must_use]
    pub const fn sequence(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for SerialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sid#{}.{}", self.0 >> 32, self.0 as u32)
    }
}

// ---------------------------------------------------------------------------
// EpochNr
// ---------------------------------------------------------------------------

/// Epoch number. Epoch 0 never executes; the first live epoch is 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct EpochNr(u64);

impl EpochNr {
    pub const ZERO: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The following epoch number.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// `self - n`, saturating at zero.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, n: u64) -> Self {
        Self(self.0.saturating_sub(n))
    }
}

impl fmt::Display for EpochNr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// NodeId / CoreId
// ---------------------------------------------------------------------------

/// Cluster node id, 1-based.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Construct a node id; `raw` must be in `1..=MAX_NODES`.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Option<Self> {
        if raw == 0 || raw as usize > MAX_NODES {
            return None;
        }
        Some(Self(raw))
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Zero-based index into per-node arena tables.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize - 1
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Worker core index, `< MAX_CORES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CoreId(usize);

impl CoreId {
    #[inline]
    #[must_use]
    pub const fn new(raw: usize) -> Option<Self> {
        if raw >= MAX_CORES {
            return None;
        }
        Some(Self(raw))
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }

    /// This core's bit in a waiter bitmap.
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u32 {
        1 << self.0
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_id_packing_round_trip() {
        let sid = SerialId::new(EpochNr::new(7), 42);
        assert_eq!(sid.epoch_nr(), EpochNr::new(7));
        assert_eq!(sid.sequence(), 42);
        assert_eq!(sid.raw(), (7_u64 << 32) | 42);
    }

    #[test]
    fn test_serial_id_order_matches_epoch_then_sequence() {
        let a = SerialId::new(EpochNr::new(1), u32::MAX);
        let b = SerialId::new(EpochNr::new(2), 0);
        let c = SerialId::new(EpochNr::new(2), 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_base_of_is_strict_lower_bound() {
        let base = SerialId::base_of(EpochNr::new(3));
        let first = SerialId::new(EpochNr::new(3), 1);
        let prev_epoch = SerialId::new(EpochNr::new(2), u32::MAX);
        assert!(base < first);
        assert!(prev_epoch < base);
    }

    proptest::proptest! {
        #[test]
        fn prop_serial_id_order_is_epoch_then_sequence(
            e1 in 0_u64..1 << 31,
            s1 in 0_u32..=u32::MAX,
            e2 in 0_u64..1 << 31,
            s2 in 0_u32..=u32::MAX,
        ) {
            let a = SerialId::new(EpochNr::new(e1), s1);
            let b = SerialId::new(EpochNr::new(e2), s2);
            proptest::prop_assert_eq!(a.cmp(&b), (e1, s1).cmp(&(e2, s2)));
        }
    }

    #[test]
    fn test_node_id_domain() {
        assert!(NodeId::new(0).is_none());
        assert_eq!(NodeId::new(1).unwrap().index(), 0);
        assert!(NodeId::new(MAX_NODES as u32).is_some());
        assert!(NodeId::new(MAX_NODES as u32 + 1).is_none());
    }

    #[test]
    fn test_core_id_bit() {
        assert_eq!(CoreId::new(0).unwrap().bit(), 1);
        assert_eq!(CoreId::new(5).unwrap().bit(), 0b10_0000);
        assert!(CoreId::new(MAX_CORES).is_none());
    }

    #[test]
    fn test_display() {
        let sid = SerialId::new(EpochNr::new(2), 9);
        assert_eq!(sid.to_string(), "sid#2.9");
        assert_eq!(EpochNr::new(2).to_string(), "epoch#2");
        assert_eq!(NodeId::new(3).unwrap().to_string(), "node#3");
    }
}
