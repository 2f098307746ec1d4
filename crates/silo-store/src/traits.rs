use silo_types::Checksum;

use crate::error::StoreResult;

/// Content-addressed repository storage.
///
/// All implementations must satisfy these invariants:
/// - Chunks and objects are immutable once written. Content-addressing
///   guarantees this: the same data always produces the same checksum.
/// - Puts are idempotent: writing a checksum that already exists is a no-op.
/// - Chunks and objects live in logically separate namespaces; the same
///   checksum may exist in both without either write observing the other.
/// - The store never interprets payloads.
/// - All I/O errors are propagated, never silently ignored.
pub trait Store: Send + Sync {
    /// Read a chunk payload. Returns `Ok(None)` if absent.
    fn get_chunk(&self, checksum: &Checksum) -> StoreResult<Option<Vec<u8>>>;

    /// Write a chunk payload under its checksum. No-op if already present.
    fn put_chunk(&self, checksum: &Checksum, data: &[u8]) -> StoreResult<()>;

    /// Check whether a chunk exists.
    fn has_chunk(&self, checksum: &Checksum) -> StoreResult<bool>;

    /// Read an object payload. Returns `Ok(None)` if absent.
    fn get_object(&self, checksum: &Checksum) -> StoreResult<Option<Vec<u8>>>;

    /// Write an object payload under its checksum. No-op if already present.
    fn put_object(&self, checksum: &Checksum, data: &[u8]) -> StoreResult<()>;

    /// Check whether an object exists.
    fn has_object(&self, checksum: &Checksum) -> StoreResult<bool>;

    /// Read an index record. Returns `Ok(None)` if absent.
    fn get_index(&self, id: &Checksum) -> StoreResult<Option<Vec<u8>>>;

    /// Write an index record under the given id.
    fn put_index(&self, id: &Checksum, data: &[u8]) -> StoreResult<()>;

    /// List the ids of all stored index records, sorted.
    fn indexes(&self) -> StoreResult<Vec<Checksum>>;

    /// Remove an index record. Returns `true` if it existed.
    fn purge(&self, id: &Checksum) -> StoreResult<bool>;

    /// Read the repository lock slot. Returns `Ok(None)` if no lock is held.
    fn read_lock(&self) -> StoreResult<Option<Vec<u8>>>;

    /// Overwrite the repository lock slot.
    fn write_lock(&self, data: &[u8]) -> StoreResult<()>;

    /// Clear the repository lock slot.
    fn clear_lock(&self) -> StoreResult<()>;
}
