//! The epoch client: batch admission and phase dispatch.
//!
//! One client per node drives each epoch's batch: advance the manager,
//! parse the marshalled inputs into transactions, assign serial ids
//! (sequence from 1 within the epoch), run the prepare phases in the
//! order the execution mode demands, then dispatch run-phase pieces and
//! wait for the batch completion to close the epoch.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ocelot_mvcc::{ChainVariant, SlotArray, ValueArena};
use ocelot_types::{EngineError, EpochNr, NodeId, SerialId};

use crate::completion::Completion;
use crate::dispatch::{WorkerCx, WorkerPool};
use crate::manager::{Epoch, EpochManager};
use crate::piece::Piece;
use crate::txn::{ExecutionMode, Transaction, TxnState};

// ---------------------------------------------------------------------------
// Config and seams
// ---------------------------------------------------------------------------

/// Engine-wide construction parameters. Passed down explicitly; there is
/// no global engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker threads, one per core.
    pub nr_cores: usize,
    /// Cluster size; bounds the per-epoch arena table.
    pub nr_nodes: usize,
    /// This node's id.
    pub node: NodeId,
    pub mode: ExecutionMode,
    /// Chain variant for tables that do not override it.
    pub default_variant: ChainVariant,
    /// Bucket count for hash-backed tables.
    pub hash_buckets: usize,
    /// Per-node logical byte budget of each epoch arena.
    pub epoch_arena_bytes: u64,
}

impl EngineConfig {
    /// Single-node defaults used by tests and embedded setups.
    #[must_use]
    pub fn single_node(nr_cores: usize) -> Self {
        Self {
            nr_cores,
            nr_nodes: 1,
            // Single-node configs always have node 1.
            node: NodeId::new(1).unwrap_or_else(|| unreachable!()),
            mode: ExecutionMode::OutOfOrder,
            default_variant: ChainVariant::Sorted,
            hash_buckets: 1 << 10,
            epoch_arena_bytes: 1 << 20,
        }
    }
}

/// Decodes one marshalled input record into a transaction.
///
/// The byte layout is workload-defined; the client's only contract with
/// it is that decoding happens before the prepare phases.
pub trait TxnFactory: Send + Sync {
    fn parse(&self, input: &[u8]) -> Result<Box<dyn Transaction>, EngineError>;
}

/// Decides where a run-phase piece executes.
///
/// Returning the piece hands it back for local dispatch; returning
/// `None` means the router shipped it to `piece.node()`'s peer, whose
/// receiver schedules it there.
pub trait PieceRouter: Send + Sync {
    fn route(&self, piece: Piece) -> Option<Piece>;
}

/// Single-node router: everything executes locally.
#[derive(Debug, Default)]
pub struct LocalRouter;

impl PieceRouter for LocalRouter {
    fn route(&self, piece: Piece) -> Option<Piece> {
        Some(piece)
    }
}

// ---------------------------------------------------------------------------
// EpochClient
// ---------------------------------------------------------------------------

struct TxnEntry {
    sid: SerialId,
    state: TxnState,
    txn: Box<dyn Transaction>,
}

type TxnHandle = Arc<Mutex<TxnEntry>>;
type PhaseStep = dyn Fn(&mut TxnEntry, &WorkerCx<'_>) -> Result<(), EngineError> + Send + Sync;

/// Drives epochs of transactions through the three-phase protocol.
pub struct EpochClient {
    config: EngineConfig,
    manager: EpochManager,
    pool: WorkerPool,
    router: Box<dyn PieceRouter>,
    factory: Arc<dyn TxnFactory>,
    txns: Mutex<Vec<TxnHandle>>,
}

impl EpochClient {
    #[must_use]
    pub fn new(config: EngineConfig, factory: Arc<dyn TxnFactory>) -> Self {
        Self::with_router(config, factory, Box::new(LocalRouter))
    }

    #[must_use]
    pub fn with_router(
        config: EngineConfig,
        factory: Arc<dyn TxnFactory>,
        router: Box<dyn PieceRouter>,
    ) -> Self {
        let manager = EpochManager::new(config.nr_nodes, config.epoch_arena_bytes);
        let pool = WorkerPool::new(
            config.nr_cores,
            Arc::new(SlotArray::new()),
            Arc::new(ValueArena::new(config.nr_cores)),
        );
        Self {
            config,
            manager,
            pool,
            router,
            factory,
            txns: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn manager(&self) -> &EpochManager {
        &self.manager
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run one epoch over `inputs` and block until its batch completes.
    pub fn start(&self, inputs: &[&[u8]]) -> Result<EpochNr, EngineError> {
        let epoch = self.initialize_epoch(inputs)?;
        let epoch_nr = epoch.nr();

        match self.config.mode {
            ExecutionMode::OutOfOrder => {
                // Both prepare phases run eagerly per transaction.
                self.run_txn_phase(epoch_nr, "prepare", |entry, cx| {
                    entry.txn.prepare_insert(entry.sid, cx)?;
                    entry.state = TxnState::PrepareInsert;
                    entry.txn.prepare(entry.sid, cx)?;
                    entry.state = TxnState::Prepare;
                    Ok(())
                })?;
            }
            ExecutionMode::Deterministic => {
                // Full barrier between phases: every insert reservation
                // lands before any read reservation, and all reservations
                // land before the first piece runs.
                self.run_txn_phase(epoch_nr, "prepare-insert", |entry, cx| {
                    entry.txn.prepare_insert(entry.sid, cx)?;
                    entry.state = TxnState::PrepareInsert;
                    Ok(())
                })?;
                self.run_txn_phase(epoch_nr, "prepare", |entry, cx| {
                    entry.txn.prepare(entry.sid, cx)?;
                    entry.state = TxnState::Prepare;
                    Ok(())
                })?;
            }
        }

        self.execute_epoch(epoch_nr);
        Ok(epoch_nr)
    }

    fn initialize_epoch(&self, inputs: &[&[u8]]) -> Result<Arc<Epoch>, EngineError> {
        let epoch = self.manager.advance();
        let mut txns = Vec::with_capacity(inputs.len());
        for (i, record) in inputs.iter().enumerate() {
            let txn = self.factory.parse(record)?;
            let sid = SerialId::new(epoch.nr(), i as u32 + 1);
            txns.push(Arc::new(Mutex::new(TxnEntry {
                sid,
                state: TxnState::Created,
                txn,
            })));
        }
        info!(epoch = %epoch.nr(), txns = txns.len(), "epoch initialized");
        *self.txns.lock() = txns;
        Ok(epoch)
    }

    /// Dispatch `step` for every transaction and wait for the phase to
    /// drain. The first error any transaction reports fails the phase.
    fn run_txn_phase(
        &self,
        epoch_nr: EpochNr,
        label: &'static str,
        step: impl Fn(&mut TxnEntry, &WorkerCx<'_>) -> Result<(), EngineError> + Send + Sync + 'static,
    ) -> Result<(), EngineError> {
        let txns: Vec<TxnHandle> = self.txns.lock().clone();
        info!(epoch = %epoch_nr, txns = txns.len(), phase = label, "phase dispatched");

        let step: Arc<PhaseStep> = Arc::new(step);
        let failure: Arc<Mutex<Option<EngineError>>> = Arc::new(Mutex::new(None));
        let (completion, gate) = self.batch_completion(epoch_nr, label);

        completion.increment(txns.len() as u64);
        for handle in txns {
            let step = Arc::clone(&step);
            let failure = Arc::clone(&failure);
            let piece = Piece::new(self.config.node, move |cx| {
                let mut entry = handle.lock();
                if let Err(err) = step(&mut entry, cx) {
                    let mut slot = failure.lock();
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                }
            });
            self.pool.dispatch(piece, Some(Arc::clone(&completion)));
        }
        completion.complete(1);
        Self::wait_gate(&gate);

        let taken = failure.lock().take();
        match taken {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Collect every transaction's pieces, key them per the execution
    /// mode, and dispatch; the batch completion closes the epoch.
    fn execute_epoch(&self, epoch_nr: EpochNr) {
        let txns: Vec<TxnHandle> = self.txns.lock().clone();
        let (completion, gate) = self.batch_completion(epoch_nr, "run");

        let mut nr_pieces = 0_usize;
        for handle in &txns {
            let mut entry = handle.lock();
            let sid = entry.sid;
            let mut pieces = entry.txn.run(sid);
            match self.config.mode {
                ExecutionMode::OutOfOrder => pieces.assign_scheduling_key(sid),
                ExecutionMode::Deterministic => pieces.rekey_preordered(sid),
            }
            entry.state = TxnState::Run;
            drop(entry);

            nr_pieces += pieces.len();
            completion.increment(pieces.len() as u64);
            for piece in pieces {
                match self.router.route(piece) {
                    Some(piece) => self.pool.dispatch(piece, Some(Arc::clone(&completion))),
                    // Shipped to a peer; its receiver accounts for it
                    // there, so retire the local unit.
                    None => completion.complete(1),
                }
            }
        }
        info!(epoch = %epoch_nr, txns = txns.len(), pieces = nr_pieces, phase = "run", "phase dispatched");

        completion.complete(1);
        Self::wait_gate(&gate);

        for handle in &txns {
            handle.lock().state = TxnState::Done;
        }
        info!(epoch = %epoch_nr, txns = txns.len(), "epoch batch complete");
    }

    #[allow(clippy::type_complexity)]
    fn batch_completion(
        &self,
        epoch_nr: EpochNr,
        label: &'static str,
    ) -> (Arc<Completion>, Arc<(Mutex<bool>, Condvar)>) {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let completion = {
            let gate = Arc::clone(&gate);
            Arc::new(Completion::new(move || {
                debug!(epoch = %epoch_nr, phase = label, "phase drained");
                let (lock, cvar) = &*gate;
                *lock.lock() = true;
                cvar.notify_all();
            }))
        };
        (completion, gate)
    }

    fn wait_gate(gate: &Arc<(Mutex<bool>, Condvar)>) {
        let (lock, cvar) = &**gate;
        let mut done = lock.lock();
        while !*done {
            cvar.wait(&mut done);
        }
    }
}

impl std::fmt::Debug for EpochClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochClient")
            .field("node", &self.config.node)
            .field("mode", &self.config.mode)
            .field("current_epoch", &self.manager.current_epoch_nr())
            .finish_non_exhaustive()
    }
}
