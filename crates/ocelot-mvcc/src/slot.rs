//! Tagged slot words and version cells.
//!
//! A version slot is a single 64-bit word that is either a *pending*
//! sentinel (the version was reserved but not yet produced), an installed
//! *value* handle, or a *tombstone* (the row was deleted at this version).
//! The top two bits carry the tag; the tag assignment keeps every pending
//! word numerically above every value word so a torn sentinel can never be
//! mistaken for a handle.
//!
//! The pending payload's low 32 bits are a waiter bitmap, one bit per
//! worker core, initially all ones. A reader that must block atomically
//! clears its own bit before parking on its [`SlotArray`] slot; the writer
//! that eventually installs the value notifies exactly the cleared bits.
//!
//! [`SlotArray`]: crate::spinner::SlotArray

use std::sync::atomic::{AtomicU64, Ordering};

use crate::arena::ValueIdx;

/// Bit position where the 2-bit tag begins in a slot word.
pub const SLOT_TAG_SHIFT: u32 = 62;

/// Mask isolating the tag bits.
pub const SLOT_TAG_MASK: u64 = 0b11_u64 << SLOT_TAG_SHIFT;

/// Mask isolating the 62-bit payload.
pub const SLOT_PAYLOAD_MASK: u64 = (1_u64 << SLOT_TAG_SHIFT) - 1;

/// Tag: installed value; payload is a packed [`ValueIdx`].
pub const TAG_VALUE: u64 = 0b00_u64 << SLOT_TAG_SHIFT;

/// Tag: reserved, value not yet produced; low 32 payload bits are the
/// waiter bitmap.
pub const TAG_PENDING: u64 = 0b01_u64 << SLOT_TAG_SHIFT;

/// Tag: deleted at this version.
pub const TAG_TOMBSTONE: u64 = 0b10_u64 << SLOT_TAG_SHIFT;

/// Full waiter bitmap: every core still unparked.
pub const WAITER_MASK: u64 = u32::MAX as u64;

// ---------------------------------------------------------------------------
// SlotWord
// ---------------------------------------------------------------------------

/// Decoded state of a slot word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Reserved but not produced; `waiters` holds the current bitmap
    /// (a cleared bit means that core is parked on its spinner slot).
    Pending { waiters: u32 },
    /// A produced value, resolvable through the value arena.
    Value(ValueIdx),
    /// Deleted at this version.
    Tombstone,
}

/// A raw slot word with checked encode/decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SlotWord(u64);

impl SlotWord {
    /// A fresh pending sentinel with the full waiter bitmap.
    #[inline]
    #[must_use]
    pub const fn pending() -> Self {
        Self(TAG_PENDING | WAITER_MASK)
    }

    /// A pending sentinel with an explicit waiter bitmap.
    #[inline]
    #[must_use]
    pub const fn pending_with(waiters: u32) -> Self {
        Self(TAG_PENDING | waiters as u64)
    }

    /// An installed value handle.
    #[inline]
    #[must_use]
    pub const fn value(idx: ValueIdx) -> Self {
        Self(TAG_VALUE | idx.to_payload())
    }

    /// A tombstone.
    #[inline]
    #[must_use]
    pub const fn tombstone() -> Self {
        Self(TAG_TOMBSTONE)
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Decode the tag and payload.
    #[inline]
    #[must_use]
    pub const fn state(self) -> SlotState {
        match self.0 & SLOT_TAG_MASK {
            TAG_PENDING => SlotState::Pending {
                waiters: (self.0 & WAITER_MASK) as u32,
            },
            TAG_TOMBSTONE => SlotState::Tombstone,
            _ => SlotState::Value(ValueIdx::from_payload(self.0 & SLOT_PAYLOAD_MASK)),
        }
    }

    /// Whether this word is still the pending sentinel.
    #[inline]
    #[must_use]
    pub const fn is_pending(self) -> bool {
        self.0 & SLOT_TAG_MASK == TAG_PENDING
    }
}

// ---------------------------------------------------------------------------
// VersionCell
// ---------------------------------------------------------------------------

/// One version slot: an atomic [`SlotWord`].
///
/// Structural chain mutation hands out `Arc<VersionCell>`s so a reader can
/// drop the chain's structural lock before blocking on the word.
#[derive(Debug)]
pub struct VersionCell {
    word: AtomicU64,
}

impl VersionCell {
    /// A freshly reserved slot.
    #[must_use]
    pub fn new_pending() -> Self {
        Self {
            word: AtomicU64::new(SlotWord::pending().raw()),
        }
    }

    #[inline]
    #[must_use]
    pub fn load(&self) -> SlotWord {
        SlotWord::from_raw(self.word.load(Ordering::Acquire))
    }

    /// Attempt to replace `current` with `new`; on failure returns the
    /// observed word so the caller can re-decode.
    #[inline]
    pub fn compare_exchange(&self, current: SlotWord, new: SlotWord) -> Result<(), SlotWord> {
        self.word
            .compare_exchange(current.raw(), new.raw(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SlotWord::from_raw)
    }

    /// Unconditionally install `new`, returning the displaced word.
    ///
    /// Exactly one writer installs per slot; the only concurrent mutation
    /// this races with is readers clearing waiter bits, which the returned
    /// old word captures for notification.
    #[inline]
    pub fn install(&self, new: SlotWord) -> SlotWord {
        SlotWord::from_raw(self.word.swap(new.raw(), Ordering::AcqRel))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
