//! Linked-list version chain.
//!
//! Entries form a backward singly-linked list, newest serial id at the
//! head, descending toward the tail. Reservation splices in under the
//! structural lock; reads and writes walk O(n) but the chain never
//! relocates, so there is no growth copy.

use std::sync::Arc;

use parking_lot::RwLock;

use ocelot_types::{EngineError, EpochNr, RowValue, SerialId};

use crate::chain::{install_and_notify, wait_for_value, ChainCx, GcRule, VersionChain};
use crate::slot::{SlotState, VersionCell};

struct Node {
    sid: u64,
    cell: Arc<VersionCell>,
    next: Option<Box<Node>>,
}

#[derive(Default)]
struct ListInner {
    /// Newest entry; `next` pointers descend by serial id.
    head: Option<Box<Node>>,
    len: usize,
}

/// Linked-list chain.
pub struct LinkListChain {
    inner: RwLock<ListInner>,
    gc: GcRule,
}

impl LinkListChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ListInner::default()),
            gc: GcRule::new(),
        }
    }

    fn collect_locked(inner: &mut ListInner, boundary: SerialId, cx: &ChainCx<'_>) -> usize {
        let freed = cut_below(&mut inner.head, boundary.raw(), cx);
        inner.len -= freed;
        freed
    }
}

/// Walk to the newest entry below `boundary` (the retained floor) and
/// release everything after it.
fn cut_below(list: &mut Option<Box<Node>>, boundary: u64, cx: &ChainCx<'_>) -> usize {
    match list {
        Some(node) if node.sid >= boundary => cut_below(&mut node.next, boundary, cx),
        Some(floor) => {
            let mut freed = 0;
            let mut suffix = floor.next.take();
            while let Some(node) = suffix {
                if let SlotState::Value(idx) = node.cell.load().state() {
                    cx.values.free(idx);
                }
                freed += 1;
                suffix = node.next;
            }
            freed
        }
        None => 0,
    }
}

/// Splice a pending entry for `sid` into the descending list.
/// Returns `false` if the serial id was already reserved.
fn splice(list: &mut Option<Box<Node>>, sid: u64) -> bool {
    match list {
        Some(node) if node.sid > sid => splice(&mut node.next, sid),
        Some(node) if node.sid == sid => false,
        _ => {
            let next = list.take();
            *list = Some(Box::new(Node {
                sid,
                cell: Arc::new(VersionCell::new_pending()),
                next,
            }));
            true
        }
    }
}

impl Default for LinkListChain {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionChain for LinkListChain {
    fn reserve_version(&self, sid: SerialId, epoch_nr: EpochNr, cx: &ChainCx<'_>) -> bool {
        let Some(mut inner) = self.inner.try_write() else {
            return false;
        };
        self.gc.on_reserve(epoch_nr, |boundary| {
            Self::collect_locked(&mut inner, boundary, cx);
        });

        if splice(&mut inner.head, sid.raw()) {
            inner.len += 1;
        }
        true
    }

    fn read_version(&self, sid: SerialId, cx: &ChainCx<'_>) -> Option<RowValue> {
        let cell = {
            let inner = self.inner.read();
            let mut node = inner.head.as_deref();
            while node.is_some_and(|n| n.sid >= sid.raw()) {
                node = node.unwrap().next.as_deref();
            }
            Arc::clone(&node?.cell)
        };
        wait_for_value(&cell, cx)
    }

    fn write_version(
        &self,
        sid: SerialId,
        value: Option<RowValue>,
        _epoch_nr: EpochNr,
        dry_run: bool,
        cx: &ChainCx<'_>,
    ) -> Result<(), EngineError> {
        let cell = {
            let inner = self.inner.read();
            let mut node = inner.head.as_deref();
            while let Some(n) = node {
                if n.sid == sid.raw() {
                    break;
                }
                node = n.next.as_deref();
            }
            match node {
                Some(n) => Arc::clone(&n.cell),
                None => {
                    let mut versions = Vec::with_capacity(inner.len);
                    let mut n = inner.head.as_deref();
                    while let Some(node) = n {
                        versions.push(node.sid);
                        n = node.next.as_deref();
                    }
                    versions.reverse();
                    drop(inner);
                    tracing::error!(
                        %sid,
                        ?versions,
                        "diverging outcomes: write targets an unreserved serial id"
                    );
                    return Err(EngineError::DivergingOutcome {
                        sid: sid.raw(),
                        versions,
                    });
                }
            }
        };
        if !dry_run {
            if let Some(stale) = install_and_notify(&cell, value, cx) {
                cx.values.free(stale);
            }
        }
        Ok(())
    }

    fn garbage_collect(&self, boundary: SerialId, cx: &ChainCx<'_>) -> usize {
        let mut inner = self.inner.write();
        Self::collect_locked(&mut inner, boundary, cx)
    }

    fn version_count(&self) -> usize {
        self.inner.read().len
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
