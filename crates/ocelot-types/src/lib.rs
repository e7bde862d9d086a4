//! Cross-cutting types for the ocelot execution core.
//!
//! Identifier newtypes (`SerialId`, `EpochNr`, `NodeId`, `CoreId`), the
//! encoded key/value byte strings the index and version layers treat as
//! opaque, the key/value codec seam, and the engine error taxonomy.

pub mod error;
pub mod ids;
pub mod varstr;

pub use error::EngineError;
pub use ids::{CoreId, EpochNr, NodeId, SerialId, MAX_CORES, MAX_NODES};
pub use varstr::{KeyCodec, RowValue, ValueCodec, VarKey};
