//! Epoch lifecycle and transaction execution.
//!
//! Transactions are admitted in bounded batches called epochs. At most
//! [`MAX_CONCURRENT_EPOCHS`] are in flight: one executing while the
//! previous finishes retiring, which pipelines execution against version
//! garbage collection. Each epoch owns per-node arenas
//! ([`EpochMemory`]); objects allocated there are addressed by a logical
//! `(epoch, node, offset)` triple ([`EpochObject`]) so a reference means
//! the same thing on every node holding that epoch's arena layout.
//!
//! [`EpochClient`] drives a batch through the three-phase protocol
//! (insert preparation, read preparation, execution), assigning each
//! transaction a [`SerialId`] and scheduling its run-phase pieces on the
//! [`WorkerPool`] in scheduling-key order.
//!
//! [`MAX_CONCURRENT_EPOCHS`]: ocelot_mvcc::MAX_CONCURRENT_EPOCHS
//! [`SerialId`]: ocelot_types::SerialId

pub mod client;
pub mod completion;
pub mod dispatch;
pub mod manager;
pub mod memory;
pub mod piece;
pub mod txn;

pub use client::{EngineConfig, EpochClient, LocalRouter, PieceRouter, TxnFactory};
pub use completion::Completion;
pub use dispatch::{WorkerCx, WorkerPool};
pub use manager::{Epoch, EpochManager};
pub use memory::{EpochMemory, EpochObject};
pub use piece::{Piece, PieceCollection};
pub use txn::{ExecutionMode, Transaction, TxnRow, TxnState};
