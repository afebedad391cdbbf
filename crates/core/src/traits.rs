//! Storage and snapshot abstraction
//!
//! The `Storage` trait is the seam between the engine and its
//! backend. The bundled backend is an in-memory MVCC B-tree; an LSM
//! or any other store honoring this contract plugs in without
//! touching the concurrency or engine layers.
//!
//! The contract serves **committed** state only. Read-your-writes
//! inside a transaction is the concurrency layer's job; the backend
//! never sees staged data until `apply` publishes a whole write group
//! at one sequence number.

use crate::error::Result;
use crate::types::{CollectionId, Key, Sequence, ValueBytes, VersionedValue};

/// One staged mutation inside an atomic write group
///
/// `value` of `None` writes a tombstone.
#[derive(Debug, Clone)]
pub struct WriteOp {
    /// Target collection.
    pub collection: CollectionId,
    /// Target key.
    pub key: Key,
    /// New payload, or `None` to delete.
    pub value: Option<ValueBytes>,
}

impl WriteOp {
    /// Stage a put.
    pub fn put(collection: CollectionId, key: Key, value: ValueBytes) -> Self {
        WriteOp {
            collection,
            key,
            value: Some(value),
        }
    }

    /// Stage a delete.
    pub fn delete(collection: CollectionId, key: Key) -> Self {
        WriteOp {
            collection,
            key,
            value: None,
        }
    }
}

/// Backend storage contract
///
/// All methods must be safe to call concurrently from any number of
/// threads. `apply` is only ever invoked under the engine's commit
/// serialization point, so implementations may assume write groups
/// arrive one at a time with strictly increasing sequences.
pub trait Storage: Send + Sync {
    /// Newest committed version of `key` visible at `sequence`, or
    /// `None` if no version existed at that point. Tombstones are
    /// returned as versions so callers can observe their sequence.
    fn get_at(
        &self,
        collection: CollectionId,
        key: Key,
        sequence: Sequence,
    ) -> Result<Option<VersionedValue>>;

    /// Latest committed version of `key`.
    fn get(&self, collection: CollectionId, key: Key) -> Result<Option<VersionedValue>> {
        self.get_at(collection, key, self.current_sequence())
    }

    /// Point-in-time lookup for a whole batch. The default resolves
    /// each task independently; backends override to batch their
    /// internal locking.
    fn multi_get(
        &self,
        tasks: &[(CollectionId, Key)],
        sequence: Sequence,
    ) -> Result<Vec<Option<VersionedValue>>> {
        tasks
            .iter()
            .map(|&(collection, key)| self.get_at(collection, key, sequence))
            .collect()
    }

    /// Up to `limit` live entries with keys at or above `min_key`, in
    /// ascending key order, as `(key, value_len)` pairs. Tombstoned
    /// and absent keys are skipped. Backends with a block cache
    /// should treat scans as non-caching so bulk iteration does not
    /// evict the point-read working set.
    fn scan(
        &self,
        collection: CollectionId,
        min_key: Key,
        limit: usize,
        sequence: Sequence,
    ) -> Result<Vec<(Key, u32)>>;

    /// Sequence of the newest committed write (put or delete) to
    /// `key`, or 0 if the key was never written. Drives watch-set
    /// validation.
    fn last_write(&self, collection: CollectionId, key: Key) -> Result<Sequence>;

    /// Atomically publish a write group at `sequence`. Either every
    /// op becomes visible at `sequence` or none does. An empty group
    /// still advances the committed sequence (read-only commits are
    /// ordered too).
    fn apply(&self, ops: &[WriteOp], sequence: Sequence) -> Result<()>;

    /// Highest committed sequence.
    fn current_sequence(&self) -> Sequence;

    /// Pin the current sequence against version reclamation and
    /// return it. Every acquire must be paired with a release.
    fn snapshot_acquire(&self) -> Sequence;

    /// Release a pin taken by [`Storage::snapshot_acquire`].
    fn snapshot_release(&self, sequence: Sequence);

    /// Create the backing data for a freshly registered collection.
    /// Idempotent.
    fn collection_create(&self, collection: CollectionId) -> Result<()>;

    /// Drop a collection and all of its entries. Subsequent access
    /// through the stale handle is `not_found`.
    fn collection_drop(&self, collection: CollectionId) -> Result<()>;

    /// Approximate bytes of live data, for status reporting only.
    fn approximate_memory(&self) -> u64 {
        0
    }
}

/// Version-bounded read view of storage
///
/// A snapshot pins its sequence for its whole lifetime, so reads
/// through it are stable regardless of concurrent commits.
pub trait SnapshotView: Send + Sync {
    /// Value of `key` as it existed at the snapshot sequence.
    fn get(&self, collection: CollectionId, key: Key) -> Result<Option<VersionedValue>>;

    /// Bounded ascending scan as of the snapshot sequence.
    fn scan(
        &self,
        collection: CollectionId,
        min_key: Key,
        limit: usize,
    ) -> Result<Vec<(Key, u32)>>;

    /// The sequence this snapshot is pinned at.
    fn sequence(&self) -> Sequence;
}
