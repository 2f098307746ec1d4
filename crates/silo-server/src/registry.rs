use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use silo_lock::Lock;
use silo_store::Store;
use silo_types::{Checksum, TransactionId};
use tracing::{debug, warn};

use crate::error::{ServerError, ServerResult};

/// Staged, not-yet-committed mutation state for one open transaction.
#[derive(Debug, Default)]
pub struct Transaction {
    chunks: HashMap<Checksum, Vec<u8>>,
    objects: HashMap<Checksum, Vec<u8>>,
    index: Option<Vec<u8>>,
}

impl Transaction {
    /// Number of staged chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Number of staged objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Whether an index manifest has been staged.
    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }
}

/// Per-connection table of open transactions.
///
/// The registry is constructed by the serving task for its own connection
/// and never shared across connections, so a transaction id issued here is
/// rejected everywhere else. The map is still mutex-guarded: background
/// tasks (log scraping, future notification dispatch) may inspect it.
pub struct TransactionRegistry {
    transactions: Mutex<HashMap<TransactionId, Transaction>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self {
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate and register a fresh transaction. Returns its id.
    pub fn open(&self) -> TransactionId {
        let tx = TransactionId::generate();
        self.transactions
            .lock()
            .expect("registry poisoned")
            .insert(tx, Transaction::default());
        debug!(%tx, "transaction opened");
        tx
    }

    /// Number of open transactions.
    pub fn len(&self) -> usize {
        self.transactions.lock().expect("registry poisoned").len()
    }

    /// Returns `true` if no transactions are open.
    pub fn is_empty(&self) -> bool {
        self.transactions.lock().expect("registry poisoned").is_empty()
    }

    /// Report, per key, whether the chunk is already present, either in the
    /// store or staged under this same transaction. Flags align positionally
    /// with `keys`; that alignment is the wire contract.
    pub fn reference_chunks(
        &self,
        tx: TransactionId,
        store: &dyn Store,
        keys: &[Checksum],
    ) -> ServerResult<Vec<bool>> {
        self.with_transaction(tx, |staged| {
            keys.iter()
                .map(|key| {
                    if staged.chunks.contains_key(key) {
                        return Ok(true);
                    }
                    store.has_chunk(key).map_err(ServerError::Store)
                })
                .collect()
        })
    }

    /// Report, per key, whether the object is already present, either in the
    /// store or staged under this same transaction.
    pub fn reference_objects(
        &self,
        tx: TransactionId,
        store: &dyn Store,
        keys: &[Checksum],
    ) -> ServerResult<Vec<bool>> {
        self.with_transaction(tx, |staged| {
            keys.iter()
                .map(|key| {
                    if staged.objects.contains_key(key) {
                        return Ok(true);
                    }
                    store.has_object(key).map_err(ServerError::Store)
                })
                .collect()
        })
    }

    /// Stage a chunk. Re-putting an already-staged checksum is a no-op.
    pub fn stage_chunk(
        &self,
        tx: TransactionId,
        checksum: Checksum,
        data: Vec<u8>,
    ) -> ServerResult<()> {
        self.with_transaction(tx, |staged| {
            staged.chunks.entry(checksum).or_insert(data);
            Ok(())
        })
    }

    /// Stage an object. Re-putting an already-staged checksum is a no-op.
    pub fn stage_object(
        &self,
        tx: TransactionId,
        checksum: Checksum,
        data: Vec<u8>,
    ) -> ServerResult<()> {
        self.with_transaction(tx, |staged| {
            staged.objects.entry(checksum).or_insert(data);
            Ok(())
        })
    }

    /// Stage the index manifest. A second call replaces the first: a
    /// transaction owns exactly one index, last write wins.
    pub fn stage_index(&self, tx: TransactionId, data: Vec<u8>) -> ServerResult<()> {
        self.with_transaction(tx, |staged| {
            staged.index = Some(data);
            Ok(())
        })
    }

    /// Atomically publish everything staged under `tx` to the store, under
    /// the repository's exclusive lock.
    ///
    /// On success the transaction is removed from the registry. On failure
    /// nothing is published and the transaction is left open, untouched, so
    /// the caller may retry or abandon it.
    pub fn commit(&self, tx: TransactionId, store: &dyn Store, ttl: Duration) -> ServerResult<()> {
        let staged = self
            .transactions
            .lock()
            .expect("registry poisoned")
            .remove(&tx)
            .ok_or(ServerError::TransactionNotFound(tx))?;

        match Self::publish(store, &staged, ttl) {
            Ok(()) => {
                debug!(%tx, chunks = staged.chunk_count(), objects = staged.object_count(), "transaction committed");
                Ok(())
            }
            Err(e) => {
                self.transactions
                    .lock()
                    .expect("registry poisoned")
                    .insert(tx, staged);
                Err(e)
            }
        }
    }

    /// Discard every open transaction, reporting how many were abandoned.
    /// Called when the owning connection goes away; abandoned writes are void.
    pub fn discard_all(&self) -> usize {
        let mut map = self.transactions.lock().expect("registry poisoned");
        let abandoned = map.len();
        map.clear();
        abandoned
    }

    fn with_transaction<T>(
        &self,
        tx: TransactionId,
        f: impl FnOnce(&mut Transaction) -> ServerResult<T>,
    ) -> ServerResult<T> {
        let mut map = self.transactions.lock().expect("registry poisoned");
        let staged = map
            .get_mut(&tx)
            .ok_or(ServerError::TransactionNotFound(tx))?;
        f(staged)
    }

    fn publish(store: &dyn Store, staged: &Transaction, ttl: Duration) -> ServerResult<()> {
        // Acquire: an unexpired lock held by anyone blocks the commit; an
        // expired one is abandoned and reclaimable.
        if let Some(bytes) = store.read_lock()? {
            let existing = Lock::from_bytes(&bytes)?;
            if !existing.expired(ttl) {
                return Err(ServerError::LockHeld {
                    holder: format!(
                        "{}@{} (pid {})",
                        existing.owner.username, existing.owner.hostname, existing.owner.pid
                    ),
                });
            }
            warn!("reclaiming expired repository lock from {}", existing.owner.hostname);
        }
        let lock = Lock::exclusive();
        store.write_lock(&lock.to_bytes()?)?;

        let outcome = Self::publish_locked(store, staged, &lock, ttl);
        if let Err(e) = store.clear_lock() {
            warn!("failed to clear repository lock: {e}");
        }
        outcome
    }

    fn publish_locked(
        store: &dyn Store,
        staged: &Transaction,
        lock: &Lock,
        ttl: Duration,
    ) -> ServerResult<()> {
        // The slot may have been overwritten by a racing holder between our
        // read and write; confirm it is still ours.
        match store.read_lock()? {
            Some(bytes) if Lock::from_bytes(&bytes)? == *lock => {}
            _ => {
                return Err(ServerError::LockHeld {
                    holder: "concurrent lock holder".into(),
                })
            }
        }

        // Chunks and objects are content-addressed and invisible until the
        // index lands, so writing them first cannot publish partial state.
        for (checksum, data) in &staged.chunks {
            store.put_chunk(checksum, data)?;
        }
        for (checksum, data) in &staged.objects {
            store.put_object(checksum, data)?;
        }

        // The index write is the publication point. A holder that outlived
        // its own TTL is racing reclamation and must not publish.
        if lock.expired(ttl) {
            return Err(ServerError::LockExpired);
        }
        if let Some(index) = &staged.index {
            store.put_index(&Checksum::of(index), index)?;
        }
        Ok(())
    }
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_lock::LockOwner;
    use silo_store::MemoryStore;

    const TTL: Duration = Duration::from_secs(60);

    fn foreign_lock(age_secs: i64) -> Vec<u8> {
        let stamp = chrono::Utc::now() - chrono::Duration::seconds(age_secs);
        let owner = LockOwner {
            hostname: "elsewhere".into(),
            username: "someone".into(),
            machine_id: "other-machine".into(),
            pid: 1,
        };
        Lock::with_timestamp(stamp, owner, true).to_bytes().unwrap()
    }

    #[test]
    fn open_registers_a_transaction() {
        let registry = TransactionRegistry::new();
        let tx = registry.open();
        assert_eq!(registry.len(), 1);
        registry.stage_chunk(tx, Checksum::of(b"c"), b"c".to_vec()).unwrap();
    }

    #[test]
    fn operations_on_unknown_transaction_fail() {
        let registry = TransactionRegistry::new();
        let tx = TransactionId::generate();
        let err = registry.stage_chunk(tx, Checksum::of(b"c"), vec![]).unwrap_err();
        assert!(matches!(err, ServerError::TransactionNotFound(_)));
    }

    #[test]
    fn reference_flags_align_with_keys() {
        let registry = TransactionRegistry::new();
        let store = MemoryStore::new();
        let present = Checksum::of(b"present");
        store.put_chunk(&present, b"present").unwrap();

        let tx = registry.open();
        let keys = vec![Checksum::of(b"absent"), present, Checksum::of(b"also absent")];
        let flags = registry.reference_chunks(tx, &store, &keys).unwrap();
        assert_eq!(flags, vec![false, true, false]);
    }

    #[test]
    fn staged_chunks_count_as_existing_within_their_transaction() {
        let registry = TransactionRegistry::new();
        let store = MemoryStore::new();
        let c = Checksum::of(b"staged");

        let tx = registry.open();
        assert_eq!(registry.reference_chunks(tx, &store, &[c]).unwrap(), vec![false]);
        registry.stage_chunk(tx, c, b"staged".to_vec()).unwrap();
        // Re-querying after the put reports it as existing, though the store
        // itself will not hold it until commit.
        assert_eq!(registry.reference_chunks(tx, &store, &[c]).unwrap(), vec![true]);
        assert!(!store.has_chunk(&c).unwrap());

        // Another transaction on the same registry does not see it.
        let other = registry.open();
        assert_eq!(registry.reference_chunks(other, &store, &[c]).unwrap(), vec![false]);
    }

    #[test]
    fn second_put_index_replaces_the_first() {
        let registry = TransactionRegistry::new();
        let store = MemoryStore::new();
        let tx = registry.open();
        registry.stage_index(tx, b"first".to_vec()).unwrap();
        registry.stage_index(tx, b"second".to_vec()).unwrap();
        registry.commit(tx, &store, TTL).unwrap();

        let ids = store.indexes().unwrap();
        assert_eq!(ids, vec![Checksum::of(b"second")]);
        assert_eq!(store.get_index(&ids[0]).unwrap().unwrap(), b"second");
    }

    #[test]
    fn commit_publishes_and_removes_the_transaction() {
        let registry = TransactionRegistry::new();
        let store = MemoryStore::new();
        let tx = registry.open();
        let c = Checksum::of(b"data");
        registry.stage_chunk(tx, c, b"data".to_vec()).unwrap();
        registry.stage_index(tx, b"manifest".to_vec()).unwrap();

        registry.commit(tx, &store, TTL).unwrap();
        assert!(registry.is_empty());
        assert_eq!(store.get_chunk(&c).unwrap().unwrap(), b"data");
        // The lock slot is released afterwards.
        assert!(store.read_lock().unwrap().is_none());

        let err = registry.commit(tx, &store, TTL).unwrap_err();
        assert!(matches!(err, ServerError::TransactionNotFound(_)));
    }

    #[test]
    fn unexpired_foreign_lock_blocks_commit_and_leaves_it_open() {
        let registry = TransactionRegistry::new();
        let store = MemoryStore::new();
        store.write_lock(&foreign_lock(5)).unwrap();

        let tx = registry.open();
        registry.stage_index(tx, b"manifest".to_vec()).unwrap();
        let err = registry.commit(tx, &store, TTL).unwrap_err();
        assert!(matches!(err, ServerError::LockHeld { .. }));

        // Nothing was published and the transaction is still open for retry.
        assert!(store.indexes().unwrap().is_empty());
        assert_eq!(registry.len(), 1);

        store.clear_lock().unwrap();
        registry.commit(tx, &store, TTL).unwrap();
        assert_eq!(store.indexes().unwrap().len(), 1);
    }

    #[test]
    fn expired_foreign_lock_is_reclaimed() {
        let registry = TransactionRegistry::new();
        let store = MemoryStore::new();
        store.write_lock(&foreign_lock(3600)).unwrap();

        let tx = registry.open();
        registry.stage_index(tx, b"manifest".to_vec()).unwrap();
        registry.commit(tx, &store, TTL).unwrap();
        assert_eq!(store.indexes().unwrap().len(), 1);
    }

    #[test]
    fn staging_is_idempotent_per_checksum() {
        let registry = TransactionRegistry::new();
        let tx = registry.open();
        let c = Checksum::of(b"dup");
        registry.stage_chunk(tx, c, b"dup".to_vec()).unwrap();
        registry.stage_chunk(tx, c, b"dup".to_vec()).unwrap();
        registry.with_transaction(tx, |staged| {
            assert_eq!(staged.chunk_count(), 1);
            Ok(())
        }).unwrap();
    }

    #[test]
    fn discard_all_reports_abandoned_count() {
        let registry = TransactionRegistry::new();
        registry.open();
        registry.open();
        assert_eq!(registry.discard_all(), 2);
        assert!(registry.is_empty());
    }
}
