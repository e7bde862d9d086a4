//! Concurrent hash index.
//!
//! Bucket count is fixed at construction. Each bucket head is an atomic
//! pointer to a singly-linked chain of entries; insert-if-absent walks
//! the chain comparing full encoded keys and, on miss, attempts a
//! compare-and-swap link at the position it last observed, resuming the
//! walk from the competing entry on failure. Entries are never unlinked
//! while the table lives (index entries are long-lived), which is what
//! makes the raw-pointer traversal sound; the whole graph is reclaimed
//! on drop.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use xxhash_rust::xxh32::xxh32;

use ocelot_mvcc::{new_chain, ChainVariant};
use ocelot_types::VarKey;

use crate::ChainRef;

/// Hash seed, kept from the original engine's table hash.
const HASH_SEED: u32 = 0xdead_beef;

struct HashEntry {
    key: VarKey,
    chain: ChainRef,
    next: AtomicPtr<HashEntry>,
}

/// Fixed-bucket concurrent hash index.
pub struct HashIndex {
    buckets: Box<[AtomicPtr<HashEntry>]>,
    variant: ChainVariant,
    len: AtomicUsize,
}

// Entries are reachable only through Acquire loads of bucket/next links,
// are immutable after publication, and are freed only by `Drop` (which
// takes `&mut self`).
unsafe impl Send for HashIndex {}
unsafe impl Sync for HashIndex {}

impl HashIndex {
    /// Allocate the bucket array up front; `nr_buckets` never changes.
    #[must_use]
    pub fn new(nr_buckets: usize, variant: ChainVariant) -> Self {
        assert!(nr_buckets > 0, "hash index needs at least one bucket");
        Self {
            buckets: (0..nr_buckets)
                .map(|_| AtomicPtr::new(ptr::null_mut()))
                .collect(),
            variant,
            len: AtomicUsize::new(0),
        }
    }

    fn bucket_of(&self, key: &VarKey) -> &AtomicPtr<HashEntry> {
        let idx = xxh32(key.as_bytes(), HASH_SEED) as usize % self.buckets.len();
        &self.buckets[idx]
    }

    /// Point lookup.
    #[must_use]
    pub fn search(&self, key: &VarKey) -> Option<ChainRef> {
        let mut p = self.bucket_of(key).load(Ordering::Acquire);
        while !p.is_null() {
            // SAFETY: published entries stay valid for the index lifetime.
            let entry = unsafe { &*p };
            if entry.key == *key {
                return Some(Arc::clone(&entry.chain));
            }
            p = entry.next.load(Ordering::Acquire);
        }
        None
    }

    /// Find the chain for `key`, creating it if absent.
    ///
    /// Exactly one concurrent caller per key observes `created == true`;
    /// every caller gets the same chain.
    pub fn search_or_create(&self, key: &VarKey) -> (ChainRef, bool) {
        self.find_or_publish(key, None)
    }

    /// Insert a pre-built chain (bulk-load path). Returns `false` and
    /// leaves the existing chain in place if `key` is already present.
    pub fn insert(&self, key: &VarKey, chain: ChainRef) -> bool {
        self.find_or_publish(key, Some(chain)).1
    }

    fn find_or_publish(&self, key: &VarKey, prebuilt: Option<ChainRef>) -> (ChainRef, bool) {
        let mut parent = self.bucket_of(key);
        let mut p = parent.load(Ordering::Acquire);
        let mut newentry: *mut HashEntry = ptr::null_mut();

        loop {
            while !p.is_null() {
                // SAFETY: see `search`.
                let entry = unsafe { &*p };
                if entry.key == *key {
                    if !newentry.is_null() {
                        // Lost the race; discard the speculative entry.
                        // SAFETY: never published, we are the sole owner.
                        drop(unsafe { Box::from_raw(newentry) });
                    }
                    return (Arc::clone(&entry.chain), false);
                }
                parent = &entry.next;
                p = parent.load(Ordering::Acquire);
            }

            if newentry.is_null() {
                let chain = prebuilt.clone().unwrap_or_else(|| new_chain(self.variant));
                newentry = Box::into_raw(Box::new(HashEntry {
                    key: key.clone(),
                    chain,
                    next: AtomicPtr::new(ptr::null_mut()),
                }));
            }

            // `p` is null here: we link at the tail of the chain.
            match parent.compare_exchange(p, newentry, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    self.len.fetch_add(1, Ordering::Relaxed);
                    // SAFETY: we still hold a unique view of the entry's
                    // immutable fields; it was just published.
                    let chain = unsafe { Arc::clone(&(*newentry).chain) };
                    return (chain, true);
                }
                Err(observed) => {
                    // Another core linked an entry here; resume the walk
                    // from it, keeping our speculative entry around.
                    p = observed;
                }
            }
        }
    }

    /// Number of entries ever published.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn nr_buckets(&self) -> usize {
        self.buckets.len()
    }
}

impl Drop for HashIndex {
    fn drop(&mut self) {
        for bucket in &*self.buckets {
            let mut p = bucket.swap(ptr::null_mut(), Ordering::Acquire);
            while !p.is_null() {
                // SAFETY: drop has exclusive access; each entry is freed
                // exactly once.
                let entry = unsafe { Box::from_raw(p) };
                p = entry.next.load(Ordering::Acquire);
            }
        }
    }
}

impl std::fmt::Debug for HashIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashIndex")
            .field("nr_buckets", &self.buckets.len())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
