//! Transaction base protocol.
//!
//! Every transaction moves through `Created -> PrepareInsert -> Prepare
//! -> Run -> Done`. The two prepare phases resolve index lookups and
//! reserve version slots; the run phase produces values into the
//! reserved slots via pieces. [`TxnRow`] is the per-row helper a
//! transaction keeps between phases: it remembers the chain and the
//! serial id so the run phase never repeats an index lookup.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::error;

use ocelot_mvcc::{ChainCx, VersionChain};
use ocelot_types::{EngineError, RowValue, SerialId};

use crate::dispatch::WorkerCx;
use crate::piece::PieceCollection;

/// Phase progression of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Created,
    PrepareInsert,
    Prepare,
    Run,
    Done,
}

/// How phases are ordered across a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Both prepare phases run eagerly per transaction; run-phase pieces
    /// carry the serial id as scheduling key.
    OutOfOrder,
    /// All insert preparation completes before any read preparation,
    /// which completes before any run; run-phase pieces are re-keyed so
    /// only each transaction's tail piece carries its serial id.
    Deterministic,
}

/// One transaction's behavior, implemented by the workload.
pub trait Transaction: Send {
    /// Reserve version slots for rows this transaction creates.
    fn prepare_insert(&mut self, sid: SerialId, cx: &WorkerCx<'_>) -> Result<(), EngineError>;

    /// Resolve remaining index lookups and reserve accesses on existing
    /// rows.
    fn prepare(&mut self, sid: SerialId, cx: &WorkerCx<'_>) -> Result<(), EngineError>;

    /// Produce the run-phase pieces. Scheduling keys are assigned by the
    /// client according to the execution mode.
    fn run(&mut self, sid: SerialId) -> PieceCollection;
}

// ---------------------------------------------------------------------------
// TxnRow
// ---------------------------------------------------------------------------

/// A transaction's handle on one row, carried from prepare to run.
#[derive(Clone)]
pub struct TxnRow {
    sid: SerialId,
    chain: Arc<dyn VersionChain>,
}

impl TxnRow {
    #[must_use]
    pub fn new(sid: SerialId, chain: Arc<dyn VersionChain>) -> Self {
        Self { sid, chain }
    }

    #[must_use]
    pub fn sid(&self) -> SerialId {
        self.sid
    }

    /// Reserve this row's slot for the transaction's write, retrying
    /// until the structural lock is won.
    pub fn append_new_version(&self, cx: &ChainCx<'_>) {
        while !self.chain.reserve_version(self.sid, self.sid.epoch_nr(), cx) {
            std::hint::spin_loop();
        }
    }

    /// Record a read access (meaningful on turn-based chains only).
    pub fn append_read_access(&self, cx: &ChainCx<'_>) {
        while !self.chain.reserve_read(self.sid, self.sid.epoch_nr(), cx) {
            std::hint::spin_loop();
        }
    }

    /// Snapshot read at this transaction's serial id.
    #[must_use]
    pub fn read(&self, cx: &ChainCx<'_>) -> Option<RowValue> {
        self.chain.read_version(self.sid, cx)
    }

    /// Install the transaction's value into its reserved slot.
    pub fn write(&self, value: RowValue, cx: &ChainCx<'_>) {
        self.install(Some(value), false, cx);
    }

    /// Install a tombstone into the reserved slot.
    pub fn delete(&self, cx: &ChainCx<'_>) {
        self.install(None, false, cx);
    }

    /// Validate the reservation without installing anything. On
    /// turn-based chains this blocks until the row's turn is held but
    /// does not consume it; the real write that follows does.
    pub fn write_dry_run(&self, cx: &ChainCx<'_>) {
        self.install(None, true, cx);
    }

    fn install(&self, value: Option<RowValue>, dry_run: bool, cx: &ChainCx<'_>) {
        if let Err(err) = self
            .chain
            .write_version(self.sid, value, self.sid.epoch_nr(), dry_run, cx)
        {
            match &err {
                EngineError::DivergingOutcome { sid, versions } => {
                    error!(
                        sid,
                        versions = ?versions,
                        "write targeted an unreserved serial id; phases disagree on this row's write set"
                    );
                }
                other => error!(error = %other, "version install failed"),
            }
            // Continuing would produce silently wrong results.
            std::process::abort();
        }
    }
}

impl std::fmt::Debug for TxnRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnRow").field("sid", &self.sid).finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ocelot_mvcc::{new_chain, ChainVariant, SlotArray, ValueArena};
    use ocelot_types::{CoreId, EpochNr};

    fn sid(epoch: u64, seq: u32) -> SerialId {
        SerialId::new(EpochNr::new(epoch), seq)
    }

    fn value(bytes: &[u8]) -> RowValue {
        RowValue::from(bytes.to_vec())
    }

    #[test]
    fn test_row_reserve_write_read_round_trip() {
        let spinners = SlotArray::new();
        let values = ValueArena::new(1);
        let cx = ChainCx {
            core: CoreId::new(0).unwrap(),
            spinners: &spinners,
            values: &values,
        };
        let chain = new_chain(ChainVariant::Sorted);

        let writer = TxnRow::new(sid(1, 1), Arc::clone(&chain));
        writer.append_new_version(&cx);
        writer.write(value(b"v1"), &cx);

        let reader = TxnRow::new(sid(1, 2), chain);
        assert_eq!(reader.read(&cx).as_deref(), Some(&b"v1"[..]));
    }

    #[test]
    fn test_delete_makes_row_absent_at_snapshot() {
        let spinners = SlotArray::new();
        let values = ValueArena::new(1);
        let cx = ChainCx {
            core: CoreId::new(0).unwrap(),
            spinners: &spinners,
            values: &values,
        };
        let chain = new_chain(ChainVariant::Sorted);

        let t1 = TxnRow::new(sid(1, 1), Arc::clone(&chain));
        t1.append_new_version(&cx);
        t1.write(value(b"live"), &cx);

        let t2 = TxnRow::new(sid(1, 2), Arc::clone(&chain));
        t2.append_new_version(&cx);
        t2.delete(&cx);

        let before = TxnRow::new(sid(1, 2), Arc::clone(&chain));
        let after = TxnRow::new(sid(1, 3), chain);
        assert_eq!(before.read(&cx).as_deref(), Some(&b"live"[..]));
        assert!(after.read(&cx).is_none());
    }

    #[test]
    fn test_dry_run_leaves_slot_pending() {
        let spinners = SlotArray::new();
        let values = ValueArena::new(1);
        let cx = ChainCx {
            core: CoreId::new(0).unwrap(),
            spinners: &spinners,
            values: &values,
        };
        let chain = new_chain(ChainVariant::Sorted);

        let row = TxnRow::new(sid(1, 1), Arc::clone(&chain));
        row.append_new_version(&cx);
        row.write_dry_run(&cx);
        row.write(value(b"real"), &cx);

        let reader = TxnRow::new(sid(1, 2), chain);
        assert_eq!(reader.read(&cx).as_deref(), Some(&b"real"[..]));
    }
}
