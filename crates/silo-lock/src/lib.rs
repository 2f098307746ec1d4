//! Advisory repository lock for Silo.
//!
//! A [`Lock`] is a record persisted in the repository's lock slot that tells
//! other processes who is mutating the repository. Validity is purely
//! time-based: a lock older than the caller's TTL is considered abandoned
//! and reclaimable by anyone. There is no heartbeat renewal, so a holder
//! running longer than the TTL must re-validate before publishing.
//!
//! Enforcement (actually writing the slot atomically) belongs to the storage
//! layer; this crate only defines the record, its expiry predicate, and the
//! exclusive/shared conflict rules.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock serialization error: {0}")]
    Serialization(String),

    #[error("lock deserialization error: {0}")]
    Deserialization(String),
}

pub type LockResult<T> = Result<T, LockError>;

/// Identity of a lock holder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub hostname: String,
    pub username: String,
    pub machine_id: String,
    pub pid: u32,
}

impl LockOwner {
    /// Gather the identity of the current process.
    pub fn current() -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_else(|_| "unknown".into());
        let machine_id = std::fs::read_to_string("/etc/machine-id")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| hostname.clone());
        Self {
            hostname,
            username,
            machine_id,
            pid: std::process::id(),
        }
    }
}

/// A TTL-bearing exclusivity record.
///
/// The timestamp is stamped at creation and never renewed. Serialization is
/// a lossless round trip preserving every field, the timestamp included.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    pub timestamp: DateTime<Utc>,
    pub owner: LockOwner,
    pub exclusive: bool,
}

impl Lock {
    /// Create a lock stamped with the current time.
    pub fn new(owner: LockOwner, exclusive: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            owner,
            exclusive,
        }
    }

    /// Create an exclusive lock for the current process.
    pub fn exclusive() -> Self {
        Self::new(LockOwner::current(), true)
    }

    /// Create a shared lock for the current process.
    pub fn shared() -> Self {
        Self::new(LockOwner::current(), false)
    }

    /// Create a lock with an explicit timestamp (for reclaim testing and
    /// replaying persisted records).
    pub fn with_timestamp(timestamp: DateTime<Utc>, owner: LockOwner, exclusive: bool) -> Self {
        Self {
            timestamp,
            owner,
            exclusive,
        }
    }

    /// Returns `true` iff more than `ttl` has elapsed since the stamped
    /// timestamp. An expired lock must be ignored by every party, its owner
    /// included.
    pub fn expired(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.timestamp);
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => age > ttl,
            // A TTL too large to represent never expires anything.
            Err(_) => false,
        }
    }

    /// Conflict rule: an exclusive lock excludes everyone; a shared lock
    /// excludes only exclusive holders.
    pub fn conflicts_with(&self, other: &Lock) -> bool {
        self.exclusive || other.exclusive
    }

    /// Serialize the record for the repository lock slot.
    pub fn to_bytes(&self) -> LockResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| LockError::Serialization(e.to_string()))
    }

    /// Deserialize a record read from the repository lock slot.
    pub fn from_bytes(data: &[u8]) -> LockResult<Self> {
        bincode::deserialize(data).map_err(|e| LockError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> LockOwner {
        LockOwner {
            hostname: "host".into(),
            username: "user".into(),
            machine_id: "machine".into(),
            pid: 4242,
        }
    }

    #[test]
    fn fresh_lock_is_not_expired() {
        let lock = Lock::new(owner(), true);
        assert!(!lock.expired(Duration::from_secs(1)));
        assert!(!lock.expired(Duration::from_secs(3600)));
    }

    #[test]
    fn backdated_lock_is_expired() {
        let stamp = Utc::now() - chrono::Duration::seconds(120);
        let lock = Lock::with_timestamp(stamp, owner(), true);
        assert!(lock.expired(Duration::from_secs(60)));
        assert!(!lock.expired(Duration::from_secs(600)));
    }

    #[test]
    fn serialization_roundtrip_preserves_every_field() {
        let lock = Lock::new(owner(), true);
        let restored = Lock::from_bytes(&lock.to_bytes().unwrap()).unwrap();
        assert_eq!(lock, restored);
        assert_eq!(lock.timestamp, restored.timestamp);
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        // An empty slice cannot hold a timestamp.
        let err = Lock::from_bytes(&[]).unwrap_err();
        assert!(matches!(err, LockError::Deserialization(_)));
    }

    #[test]
    fn exclusive_conflicts_with_everything() {
        let exclusive = Lock::new(owner(), true);
        let shared = Lock::new(owner(), false);
        assert!(exclusive.conflicts_with(&exclusive));
        assert!(exclusive.conflicts_with(&shared));
        assert!(shared.conflicts_with(&exclusive));
    }

    #[test]
    fn shared_locks_coexist() {
        let a = Lock::new(owner(), false);
        let b = Lock::new(owner(), false);
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn current_owner_has_pid() {
        let owner = LockOwner::current();
        assert_eq!(owner.pid, std::process::id());
        assert!(!owner.hostname.is_empty());
    }
}
