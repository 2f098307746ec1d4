//! Pack codec for Silo.
//!
//! A pack bundles many small content-addressed payloads into one sequential
//! container with a checksum → position index, amortizing per-record storage
//! overhead. Packs are append-only while being built and immutable once
//! serialized; amending a serialized pack means producing a new one.

pub mod error;
pub mod pack;

pub use error::{PackError, PackResult};
pub use pack::Pack;
