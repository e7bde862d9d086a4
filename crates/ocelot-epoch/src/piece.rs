//! Units of run-phase work.
//!
//! A transaction's run phase is a small graph of pieces. Each piece
//! carries a scheduling key; workers drain their queues in ascending key
//! order, so the key is how serial order is imposed (or deliberately
//! relaxed) across transactions.

use std::fmt;

use smallvec::SmallVec;

use ocelot_types::{NodeId, SerialId};

use crate::dispatch::WorkerCx;

type PieceFn = Box<dyn FnOnce(&WorkerCx<'_>) + Send>;

/// One schedulable unit of transaction work.
pub struct Piece {
    sched_key: u64,
    node: NodeId,
    work: PieceFn,
}

impl Piece {
    /// A piece destined for `node`, keyed 0 until its collection assigns
    /// scheduling keys.
    #[must_use]
    pub fn new(node: NodeId, work: impl FnOnce(&WorkerCx<'_>) + Send + 'static) -> Self {
        Self {
            sched_key: 0,
            node,
            work: Box::new(work),
        }
    }

    #[must_use]
    pub fn sched_key(&self) -> u64 {
        self.sched_key
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn set_sched_key(&mut self, key: u64) {
        self.sched_key = key;
    }

    pub(crate) fn execute(self, cx: &WorkerCx<'_>) {
        (self.work)(cx);
    }
}

impl fmt::Debug for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Piece")
            .field("sched_key", &self.sched_key)
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

/// The ordered pieces of one transaction's run phase.
#[derive(Debug, Default)]
pub struct PieceCollection {
    pieces: SmallVec<[Piece; 4]>,
}

impl PieceCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, piece: Piece) {
        self.pieces.push(piece);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Out-of-order mode: every piece carries the transaction's serial
    /// id, so pieces of different transactions drain in serial order on
    /// each worker even when issued concurrently.
    pub fn assign_scheduling_key(&mut self, sid: SerialId) {
        for piece in &mut self.pieces {
            piece.sched_key = sid.raw();
        }
    }

    /// Pre-ordered (deterministic) mode: only the final piece carries the
    /// serial id; earlier pieces key 0, letting independent prefixes of
    /// different transactions interleave while serial order is preserved
    /// at the commit-relevant tail.
    pub fn rekey_preordered(&mut self, sid: SerialId) {
        let last = self.pieces.len().saturating_sub(1);
        for (i, piece) in self.pieces.iter_mut().enumerate() {
            piece.sched_key = if i == last { sid.raw() } else { 0 };
        }
    }

    #[must_use]
    pub fn keys(&self) -> Vec<u64> {
        self.pieces.iter().map(Piece::sched_key).collect()
    }
}

impl IntoIterator for PieceCollection {
    type Item = Piece;
    type IntoIter = smallvec::IntoIter<[Piece; 4]>;

    fn into_iter(self) -> Self::IntoIter {
        self.pieces.into_iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ocelot_types::EpochNr;

    fn node() -> NodeId {
        NodeId::new(1).unwrap()
    }

    fn collection(n: usize) -> PieceCollection {
        let mut pieces = PieceCollection::new();
        for _ in 0..n {
            pieces.push(Piece::new(node(), |_| {}));
        }
        pieces
    }

    #[test]
    fn test_uniform_key_assignment() {
        let sid = SerialId::new(EpochNr::new(2), 5);
        let mut pieces = collection(3);
        pieces.assign_scheduling_key(sid);
        assert_eq!(pieces.keys(), vec![sid.raw(); 3]);
    }

    #[test]
    fn test_preordered_rekey_tags_only_the_tail() {
        let sid = SerialId::new(EpochNr::new(2), 5);
        let mut pieces = collection(3);
        pieces.assign_scheduling_key(sid);
        pieces.rekey_preordered(sid);
        assert_eq!(pieces.keys(), vec![0, 0, sid.raw()]);
    }

    #[test]
    fn test_preordered_rekey_single_piece_keeps_sid() {
        let sid = SerialId::new(EpochNr::new(1), 1);
        let mut pieces = collection(1);
        pieces.rekey_preordered(sid);
        assert_eq!(pieces.keys(), vec![sid.raw()]);
    }
}
