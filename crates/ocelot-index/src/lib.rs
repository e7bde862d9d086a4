//! Index backends for the ocelot execution core.
//!
//! Both backends map an encoded key ([`VarKey`]) to a shared version
//! chain. The hash backend serves point lookup and insert-if-absent with
//! lock-free bucket chains; the ordered backend adds forward range scans
//! in encoded-key order. [`TableManager`] is the thin registry seam the
//! workload layer consumes.
//!
//! [`VarKey`]: ocelot_types::VarKey

pub mod hash;
pub mod ordered;
pub mod table;

use std::sync::Arc;

use ocelot_mvcc::VersionChain;

/// Shared handle to one row's version chain.
pub type ChainRef = Arc<dyn VersionChain>;

pub use hash::HashIndex;
pub use ordered::{IndexSearchIterator, OrderedIndex};
pub use table::{BackendKind, IndexBackend, Table, TableId, TableManager, TableSpec};
