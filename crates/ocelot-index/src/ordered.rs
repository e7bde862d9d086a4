//! Ordered index over encoded keys.
//!
//! Backed by a lock-free skip list, so point lookups and forward range
//! scans run concurrently with inserts without any table-wide lock.
//! Keys compare bytewise, which is why the key codecs emit big-endian
//! fixed-width encodings: encoded order equals logical order.

use std::ops::Bound;
use std::sync::Arc;

use crossbeam_skiplist::map::{Entry, Range};
use crossbeam_skiplist::SkipMap;

use ocelot_mvcc::{new_chain, ChainVariant};
use ocelot_types::VarKey;

use crate::ChainRef;

type KeyBounds = (Bound<VarKey>, Bound<VarKey>);
type SkipRange<'a> = Range<'a, VarKey, KeyBounds, VarKey, ChainRef>;

/// Ordered key-to-chain index supporting forward range scans.
pub struct OrderedIndex {
    map: SkipMap<VarKey, ChainRef>,
    variant: ChainVariant,
}

impl OrderedIndex {
    #[must_use]
    pub fn new(variant: ChainVariant) -> Self {
        Self {
            map: SkipMap::new(),
            variant,
        }
    }

    /// Point lookup.
    #[must_use]
    pub fn search(&self, key: &VarKey) -> Option<ChainRef> {
        self.map.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Find the chain for `key`, creating it if absent.
    ///
    /// Exactly one concurrent caller per key observes `created == true`;
    /// every caller gets the same chain. A caller that loses the race
    /// drops the chain it speculatively minted.
    pub fn search_or_create(&self, key: &VarKey) -> (ChainRef, bool) {
        if let Some(entry) = self.map.get(key) {
            return (Arc::clone(entry.value()), false);
        }
        let minted = new_chain(self.variant);
        let entry = self.map.get_or_insert(key.clone(), Arc::clone(&minted));
        let chain = Arc::clone(entry.value());
        let created = Arc::ptr_eq(&chain, &minted);
        (chain, created)
    }

    /// Insert a pre-built chain (bulk-load path). Returns `false` and
    /// leaves the existing chain in place if `key` is already present.
    pub fn insert(&self, key: &VarKey, chain: ChainRef) -> bool {
        let entry = self.map.get_or_insert(key.clone(), Arc::clone(&chain));
        Arc::ptr_eq(entry.value(), &chain)
    }

    /// Forward scan from `start` (inclusive) to `end` (exclusive), or to
    /// the end of the table when `end` is `None`. The iterator starts
    /// positioned on the first matching entry, if any.
    #[must_use]
    pub fn range_iter(&self, start: &VarKey, end: Option<&VarKey>) -> IndexSearchIterator<'_> {
        let bounds = (
            Bound::Included(start.clone()),
            match end {
                Some(end) => Bound::Excluded(end.clone()),
                None => Bound::Unbounded,
            },
        );
        IndexSearchIterator::new(self.map.range(bounds))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for OrderedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedIndex")
            .field("len", &self.map.len())
            .finish_non_exhaustive()
    }
}

/// Cursor over a key range, positioned on one entry at a time.
///
/// Styled as an explicit is-valid/advance cursor rather than a Rust
/// `Iterator` because scan consumers need the key and the chain of the
/// current position separately, often more than once.
pub struct IndexSearchIterator<'a> {
    range: SkipRange<'a>,
    current: Option<Entry<'a, VarKey, ChainRef>>,
}

impl<'a> IndexSearchIterator<'a> {
    fn new(mut range: SkipRange<'a>) -> Self {
        let current = range.next();
        Self { range, current }
    }

    /// Whether the cursor is positioned on an entry.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    /// Advance to the next entry in key order.
    pub fn advance(&mut self) {
        self.current = self.range.next();
    }

    /// Encoded key at the current position.
    #[must_use]
    pub fn key(&self) -> Option<&VarKey> {
        self.current.as_ref().map(Entry::key)
    }

    /// Version chain at the current position.
    #[must_use]
    pub fn chain(&self) -> Option<ChainRef> {
        self.current.as_ref().map(|e| Arc::clone(e.value()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn key(n: u64) -> VarKey {
        VarKey::from(n.to_be_bytes().to_vec())
    }

    fn decode(key: &VarKey) -> u64 {
        let mut buf = [0_u8; 8];
        buf.copy_from_slice(key.as_bytes());
        u64::from_be_bytes(buf)
    }

    #[test]
    fn test_search_miss_on_empty() {
        let index = OrderedIndex::new(ChainVariant::Sorted);
        assert!(index.search(&key(1)).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_search_or_create_then_search() {
        let index = OrderedIndex::new(ChainVariant::Sorted);
        let (chain, created) = index.search_or_create(&key(42));
        assert!(created);
        let found = index.search(&key(42)).unwrap();
        assert!(Arc::ptr_eq(&chain, &found));
        let (again, created_again) = index.search_or_create(&key(42));
        assert!(!created_again);
        assert!(Arc::ptr_eq(&chain, &again));
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let index = OrderedIndex::new(ChainVariant::Sorted);
        assert!(index.insert(&key(1), new_chain(ChainVariant::Sorted)));
        assert!(!index.insert(&key(1), new_chain(ChainVariant::Sorted)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_range_scan_is_ordered_and_end_exclusive() {
        let index = OrderedIndex::new(ChainVariant::Sorted);
        for n in [9_u64, 3, 7, 1, 5] {
            index.search_or_create(&key(n));
        }

        let mut it = index.range_iter(&key(3), Some(&key(9)));
        let mut seen = Vec::new();
        while it.is_valid() {
            seen.push(decode(it.key().unwrap()));
            assert!(it.chain().is_some());
            it.advance();
        }
        assert_eq!(seen, vec![3, 5, 7]);
    }

    #[test]
    fn test_open_ended_scan_reaches_table_end() {
        let index = OrderedIndex::new(ChainVariant::Sorted);
        for n in 0..8_u64 {
            index.search_or_create(&key(n));
        }

        let mut it = index.range_iter(&key(5), None);
        let mut seen = Vec::new();
        while it.is_valid() {
            seen.push(decode(it.key().unwrap()));
            it.advance();
        }
        assert_eq!(seen, vec![5, 6, 7]);
    }

    #[test]
    fn test_empty_range_is_invalid_from_the_start() {
        let index = OrderedIndex::new(ChainVariant::Sorted);
        index.search_or_create(&key(1));
        let it = index.range_iter(&key(2), Some(&key(3)));
        assert!(!it.is_valid());
        assert!(it.key().is_none());
        assert!(it.chain().is_none());
    }

    #[test]
    fn test_concurrent_create_is_idempotent() {
        let index = Arc::new(OrderedIndex::new(ChainVariant::Sorted));
        let nr_threads = 8;
        let nr_keys = 64_u64;
        let barrier = Arc::new(Barrier::new(nr_threads));

        let handles: Vec<_> = (0..nr_threads)
            .map(|_| {
                let index = Arc::clone(&index);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut created = 0_usize;
                    for n in 0..nr_keys {
                        let (_, was_created) = index.search_or_create(&key(n));
                        if was_created {
                            created += 1;
                        }
                    }
                    created
                })
            })
            .collect();

        let total_created: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total_created, nr_keys as usize);
        assert_eq!(index.len(), nr_keys as usize);
    }

    proptest::proptest! {
        #[test]
        fn prop_range_scan_matches_sorted_filter(
            mut keys in proptest::collection::vec(0_u64..512, 1..64),
            lo in 0_u64..512,
            span in 0_u64..128,
        ) {
            let index = OrderedIndex::new(ChainVariant::Sorted);
            for &n in &keys {
                index.search_or_create(&key(n));
            }
            keys.sort_unstable();
            keys.dedup();

            let hi = lo.saturating_add(span);
            let expected: Vec<u64> =
                keys.iter().copied().filter(|&n| n >= lo && n < hi).collect();

            let mut it = index.range_iter(&key(lo), Some(&key(hi)));
            let mut seen = Vec::new();
            while it.is_valid() {
                seen.push(decode(it.key().unwrap()));
                it.advance();
            }
            proptest::prop_assert_eq!(seen, expected);
        }
    }
}
