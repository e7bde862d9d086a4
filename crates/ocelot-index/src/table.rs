//! Table registry.
//!
//! A table pairs one index backend with the version-chain variant its
//! rows use. The manager is the process-wide registry the workload layer
//! resolves table handles from; tables are registered once during setup
//! and never dropped mid-run.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use ocelot_mvcc::ChainVariant;
use ocelot_types::VarKey;

use crate::hash::HashIndex;
use crate::ordered::{IndexSearchIterator, OrderedIndex};
use crate::ChainRef;

/// Identifies a table within the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

/// Which index backend a table runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Fixed-bucket hash index; point lookups only.
    Hash { nr_buckets: usize },
    /// Skip-list index; point lookups plus forward range scans.
    Ordered,
}

/// Everything needed to build a table.
#[derive(Clone, Debug)]
pub struct TableSpec {
    pub id: TableId,
    pub name: String,
    pub backend: BackendKind,
    pub variant: ChainVariant,
}

/// Constructed index backend of a table.
pub enum IndexBackend {
    Hash(HashIndex),
    Ordered(OrderedIndex),
}

/// One table: an index backend plus the chain variant for its rows.
pub struct Table {
    spec: TableSpec,
    backend: IndexBackend,
}

impl Table {
    #[must_use]
    pub fn new(spec: TableSpec) -> Self {
        let backend = match spec.backend {
            BackendKind::Hash { nr_buckets } => {
                IndexBackend::Hash(HashIndex::new(nr_buckets, spec.variant))
            }
            BackendKind::Ordered => IndexBackend::Ordered(OrderedIndex::new(spec.variant)),
        };
        Self { spec, backend }
    }

    #[must_use]
    pub fn id(&self) -> TableId {
        self.spec.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    #[must_use]
    pub fn variant(&self) -> ChainVariant {
        self.spec.variant
    }

    /// Point lookup.
    #[must_use]
    pub fn search(&self, key: &VarKey) -> Option<ChainRef> {
        match &self.backend {
            IndexBackend::Hash(index) => index.search(key),
            IndexBackend::Ordered(index) => index.search(key),
        }
    }

    /// Find the chain for `key`, creating it if absent.
    pub fn search_or_create(&self, key: &VarKey) -> (ChainRef, bool) {
        match &self.backend {
            IndexBackend::Hash(index) => index.search_or_create(key),
            IndexBackend::Ordered(index) => index.search_or_create(key),
        }
    }

    /// Insert a pre-built chain (bulk-load path). Returns `false` if the
    /// key was already present.
    pub fn insert(&self, key: &VarKey, chain: ChainRef) -> bool {
        match &self.backend {
            IndexBackend::Hash(index) => index.insert(key, chain),
            IndexBackend::Ordered(index) => index.insert(key, chain),
        }
    }

    /// Forward range scan. `None` on a hash table, which cannot order
    /// its keys.
    #[must_use]
    pub fn range_iter(&self, start: &VarKey, end: Option<&VarKey>) -> Option<IndexSearchIterator<'_>> {
        match &self.backend {
            IndexBackend::Hash(_) => None,
            IndexBackend::Ordered(index) => Some(index.range_iter(start, end)),
        }
    }

    /// Number of keys published to the index.
    #[must_use]
    pub fn nr_keys(&self) -> usize {
        match &self.backend {
            IndexBackend::Hash(index) => index.len(),
            IndexBackend::Ordered(index) => index.len(),
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.spec.id)
            .field("name", &self.spec.name)
            .field("backend", &self.spec.backend)
            .field("variant", &self.spec.variant)
            .finish_non_exhaustive()
    }
}

/// Process-wide table registry.
#[derive(Default)]
pub struct TableManager {
    tables: RwLock<HashMap<TableId, Arc<Table>>>,
}

impl TableManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table. Registration is idempotent on the id: a second
    /// call with an already-registered id returns the existing table and
    /// ignores the new spec.
    pub fn create(&self, spec: TableSpec) -> Arc<Table> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.get(&spec.id) {
            return Arc::clone(existing);
        }
        info!(
            table = %spec.name,
            id = spec.id.0,
            backend = ?spec.backend,
            variant = ?spec.variant,
            "registered table"
        );
        let table = Arc::new(Table::new(spec));
        tables.insert(table.id(), Arc::clone(&table));
        table
    }

    #[must_use]
    pub fn get(&self, id: TableId) -> Option<Arc<Table>> {
        self.tables.read().get(&id).map(Arc::clone)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
