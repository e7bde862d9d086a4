//! Engine error taxonomy.
//!
//! Retryable contention (a failed structural-lock acquire, a lost bucket
//! CAS) is signalled by `bool` returns and never surfaces here. These
//! variants cover the fatal and seam-level failures.

use thiserror::Error;

/// Errors surfaced by the execution core.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A write targeted a serial id that was never reserved on the chain.
    ///
    /// Two engine phases disagree about which rows a transaction touches.
    /// There is no recovery path: callers log the carried version list and
    /// abort the process.
    #[error("diverging outcomes: sid {sid} not reserved (chain has {})", .versions.len())]
    DivergingOutcome { sid: u64, versions: Vec<u64> },

    /// A key failed to decode against its table's fixed-field layout.
    #[error("key codec: {detail}")]
    KeyCodec { detail: String },

    /// An epoch object was resolved against an epoch no longer in the
    /// pipeline window.
    #[error("epoch {epoch_nr} has been retired from the pipeline window")]
    EpochExpired { epoch_nr: u64 },

    /// A per-node epoch arena ran out of space mid-run. Arenas are sized
    /// conservatively; this is fatal if it occurs.
    #[error("epoch arena exhausted on node {node_id}")]
    ArenaExhausted { node_id: u32 },

    /// A marshalled transaction input record was shorter than its fixed
    /// layout requires.
    #[error("transaction input truncated: expected {expected} bytes, got {actual}")]
    TxnInputTruncated { expected: usize, actual: usize },
}
