//! Multi-version record store for the ocelot execution core.
//!
//! A [`VersionChain`] holds every reserved/produced version of one logical
//! row, keyed by the externally-assigned [`SerialId`] total order. Three
//! interchangeable variants implement the same contract:
//!
//! - [`SortedChain`]: sorted array, the default out-of-order variant.
//! - [`LinkListChain`]: backward singly-linked list, no reallocation.
//! - [`TurnChain`]: deterministic turn-based replay.
//!
//! Readers that arrive before a version is produced park on the per-core
//! [`SlotArray`] after advertising themselves in the pending slot word's
//! waiter bitmap; the eventual writer notifies exactly the parked cores.

pub mod arena;
pub mod chain;
pub mod linklist;
pub mod slot;
pub mod sorted;
pub mod spinner;
pub mod turn;

pub use arena::{ValueArena, ValueIdx};
pub use chain::{
    new_chain, ChainCx, ChainVariant, GcRule, VersionChain, MAX_CONCURRENT_EPOCHS,
};
pub use linklist::LinkListChain;
pub use slot::{
    SlotState, SlotWord, VersionCell, SLOT_PAYLOAD_MASK, SLOT_TAG_MASK, SLOT_TAG_SHIFT,
    TAG_PENDING, TAG_TOMBSTONE, TAG_VALUE, WAITER_MASK,
};
pub use sorted::SortedChain;
pub use spinner::{CacheAligned, SlotArray, CACHE_LINE_BYTES};
pub use turn::TurnChain;
