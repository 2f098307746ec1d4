use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use silo_types::Checksum;

use crate::error::StoreResult;
use crate::traits::Store;

/// In-memory, HashMap-based repository store.
///
/// Intended for tests and embedding. All payloads are held in memory behind
/// `RwLock`s for safe concurrent access and are cloned on read.
pub struct MemoryStore {
    chunks: RwLock<HashMap<Checksum, Vec<u8>>>,
    objects: RwLock<HashMap<Checksum, Vec<u8>>>,
    indexes: RwLock<HashMap<Checksum, Vec<u8>>>,
    lock_slot: Mutex<Option<Vec<u8>>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(HashMap::new()),
            objects: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            lock_slot: Mutex::new(None),
        }
    }

    /// Number of chunks currently stored.
    pub fn chunk_count(&self) -> usize {
        self.chunks.read().expect("lock poisoned").len()
    }

    /// Number of objects currently stored.
    pub fn object_count(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Total bytes across all stored chunks.
    pub fn chunk_bytes(&self) -> u64 {
        self.chunks
            .read()
            .expect("lock poisoned")
            .values()
            .map(|data| data.len() as u64)
            .sum()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn get_chunk(&self, checksum: &Checksum) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.chunks.read().expect("lock poisoned").get(checksum).cloned())
    }

    fn put_chunk(&self, checksum: &Checksum, data: &[u8]) -> StoreResult<()> {
        let mut map = self.chunks.write().expect("lock poisoned");
        // Idempotent: content-addressing guarantees the same checksum always
        // maps to the same content.
        map.entry(*checksum).or_insert_with(|| data.to_vec());
        Ok(())
    }

    fn has_chunk(&self, checksum: &Checksum) -> StoreResult<bool> {
        Ok(self.chunks.read().expect("lock poisoned").contains_key(checksum))
    }

    fn get_object(&self, checksum: &Checksum) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.objects.read().expect("lock poisoned").get(checksum).cloned())
    }

    fn put_object(&self, checksum: &Checksum, data: &[u8]) -> StoreResult<()> {
        let mut map = self.objects.write().expect("lock poisoned");
        map.entry(*checksum).or_insert_with(|| data.to_vec());
        Ok(())
    }

    fn has_object(&self, checksum: &Checksum) -> StoreResult<bool> {
        Ok(self.objects.read().expect("lock poisoned").contains_key(checksum))
    }

    fn get_index(&self, id: &Checksum) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.indexes.read().expect("lock poisoned").get(id).cloned())
    }

    fn put_index(&self, id: &Checksum, data: &[u8]) -> StoreResult<()> {
        self.indexes
            .write()
            .expect("lock poisoned")
            .insert(*id, data.to_vec());
        Ok(())
    }

    fn indexes(&self) -> StoreResult<Vec<Checksum>> {
        let map = self.indexes.read().expect("lock poisoned");
        let mut ids: Vec<Checksum> = map.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    fn purge(&self, id: &Checksum) -> StoreResult<bool> {
        Ok(self.indexes.write().expect("lock poisoned").remove(id).is_some())
    }

    fn read_lock(&self) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.lock_slot.lock().expect("lock poisoned").clone())
    }

    fn write_lock(&self, data: &[u8]) -> StoreResult<()> {
        *self.lock_slot.lock().expect("lock poisoned") = Some(data.to_vec());
        Ok(())
    }

    fn clear_lock(&self) -> StoreResult<()> {
        *self.lock_slot.lock().expect("lock poisoned") = None;
        Ok(())
    }
}
