//! Encoded key/value byte strings and the table codec seam.
//!
//! Tables define fixed-field key and value types; the execution core only
//! ever sees their encoded form. Keys order bytewise, so codecs for ordered
//! tables must encode integer fields big-endian.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// VarKey / RowValue
// ---------------------------------------------------------------------------

/// An encoded, immutable key. Ordered and hashed bytewise.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarKey(Arc<[u8]>);

impl VarKey {
    #[must_use]
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for VarKey {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for VarKey {
    fn from(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }
}

impl From<Vec<u8>> for VarKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl fmt::Debug for VarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarKey({} bytes)", self.0.len())
    }
}

/// An encoded, immutable row value.
///
/// Cheap to clone; the version layer hands out clones of the installed
/// value rather than references into its arena.
#[derive(Clone, PartialEq, Eq)]
pub struct RowValue(Arc<[u8]>);

impl RowValue {
    #[must_use]
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for RowValue {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for RowValue {
    fn from(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }
}

impl From<Vec<u8>> for RowValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl fmt::Debug for RowValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowValue({} bytes)", self.0.len())
    }
}

// ---------------------------------------------------------------------------
// Codec seam
// ---------------------------------------------------------------------------

/// Fixed-field key codec. Encodings must be prefix-free and order-preserving
/// for ordered tables (big-endian integer fields).
pub trait KeyCodec: Sized {
    fn encode_key(&self) -> VarKey;
    fn decode_key(key: &VarKey) -> Result<Self, EngineError>;
}

/// Fixed-field value codec.
pub trait ValueCodec: Sized {
    fn encode_value(&self) -> RowValue;
    fn decode_value(value: &RowValue) -> Result<Self, EngineError>;
}

impl KeyCodec for (u32, u32) {
    fn encode_key(&self) -> VarKey {
        let mut buf = Vec::with_capacity(8);
        buf.extend_from_slice(&self.0.to_be_bytes());
        buf.extend_from_slice(&self.1.to_be_bytes());
        VarKey::from(buf)
    }

    fn decode_key(key: &VarKey) -> Result<Self, EngineError> {
        let b = key.as_bytes();
        if b.len() != 8 {
            return Err(EngineError::KeyCodec {
                detail: format!("expected 8 bytes for (u32, u32), got {}", b.len()),
            });
        }
        let hi = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        let lo = u32::from_be_bytes([b[4], b[5], b[6], b[7]]);
        Ok((hi, lo))
    }
}

impl KeyCodec for u64 {
    fn encode_key(&self) -> VarKey {
        VarKey::from(self.to_be_bytes().to_vec())
    }

    fn decode_key(key: &VarKey) -> Result<Self, EngineError> {
        let b = key.as_bytes();
        if b.len() != 8 {
            return Err(EngineError::KeyCodec {
                detail: format!("expected 8 bytes for u64, got {}", b.len()),
            });
        }
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
