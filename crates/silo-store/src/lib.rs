//! Storage seam for Silo repositories.
//!
//! A repository is, from the core's point of view, four namespaces keyed by
//! content checksum: chunks, objects, index records, and a single lock slot.
//! The [`Store`] trait is that seam; [`MemoryStore`] backs tests and
//! embedding, [`FsStore`] persists to a local directory tree.

pub mod error;
pub mod fs;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use traits::Store;
