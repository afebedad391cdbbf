//! `MemStore`: the bundled in-memory MVCC backend
//!
//! Each collection is a `BTreeMap<Key, VersionChain>` behind its own
//! `RwLock`, with the collection table itself in a `DashMap` so
//! point reads on different collections never contend. A version
//! chain is an ascending list of `(sequence, payload)` entries;
//! lookups at a snapshot binary-search for the newest entry at or
//! below it.
//!
//! Chains are bounded: once a chain outgrows the configured limit,
//! versions invisible to every pinned snapshot are reclaimed on the
//! spot (the newest version always survives). Write groups arrive
//! only through [`MemStore::apply`] under the engine's commit
//! serialization point, so publication is single-writer by
//! construction while reads never block reads.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use lattice_core::{
    CollectionId, Key, LatticeError, Result, Sequence, Storage, ValueBytes, VersionedValue,
    WriteOp,
};

use crate::snapshot::{PinnedSnapshot, SnapshotTracker};

/// Default bound on per-key version chain length before reclamation
/// is attempted.
pub const DEFAULT_CHAIN_LIMIT: usize = 8;

#[derive(Debug, Clone)]
struct VersionEntry {
    sequence: Sequence,
    value: Option<ValueBytes>,
}

impl VersionEntry {
    fn payload_bytes(&self) -> u64 {
        self.value.as_ref().map(|v| v.len() as u64).unwrap_or(0)
    }
}

/// Ascending list of committed versions for one key.
#[derive(Debug, Default)]
struct VersionChain {
    versions: Vec<VersionEntry>,
}

impl VersionChain {
    fn version_at(&self, sequence: Sequence) -> Option<&VersionEntry> {
        let visible = self
            .versions
            .partition_point(|entry| entry.sequence <= sequence);
        visible.checked_sub(1).map(|index| &self.versions[index])
    }

    fn last_sequence(&self) -> Sequence {
        self.versions.last().map(|entry| entry.sequence).unwrap_or(0)
    }

    /// Drop versions no retained reader can observe. Readers exist
    /// only at or above `oldest_relevant`, so everything shadowed by
    /// the newest version at or below it is reclaimable — and that
    /// newest version itself is too when it is a tombstone, since a
    /// dropped tombstone and a stored one both read as absent.
    /// Returns the payload bytes reclaimed.
    fn prune(&mut self, oldest_relevant: Sequence) -> u64 {
        let visible = self
            .versions
            .partition_point(|entry| entry.sequence <= oldest_relevant);
        if visible == 0 {
            return 0;
        }
        let cut = if self.versions[visible - 1].value.is_none() && visible < self.versions.len()
        {
            visible
        } else {
            visible - 1
        };
        let reclaimed: u64 = self.versions[..cut]
            .iter()
            .map(VersionEntry::payload_bytes)
            .sum();
        self.versions.drain(..cut);
        reclaimed
    }
}

type CollectionTree = RwLock<BTreeMap<Key, VersionChain>>;

/// In-memory MVCC store implementing the backend contract
pub struct MemStore {
    collections: DashMap<CollectionId, CollectionTree>,
    sequence: AtomicU64,
    live_bytes: AtomicU64,
    chain_limit: usize,
    snapshots: SnapshotTracker,
}

impl MemStore {
    /// Create a store with the default version-chain bound. The
    /// default collection exists from construction.
    pub fn new() -> Self {
        Self::with_chain_limit(DEFAULT_CHAIN_LIMIT)
    }

    /// Create a store with an explicit version-chain bound.
    pub fn with_chain_limit(chain_limit: usize) -> Self {
        let store = MemStore {
            collections: DashMap::new(),
            sequence: AtomicU64::new(0),
            live_bytes: AtomicU64::new(0),
            chain_limit: chain_limit.max(1),
            snapshots: SnapshotTracker::new(),
        };
        store
            .collections
            .insert(CollectionId::DEFAULT, RwLock::new(BTreeMap::new()));
        store
    }

    /// Create a pinned point-in-time view. The pin is released when
    /// the snapshot is dropped.
    pub fn create_snapshot(self: &Arc<Self>) -> PinnedSnapshot {
        let sequence = self.snapshot_acquire();
        PinnedSnapshot::new(Arc::clone(self), sequence)
    }

    /// Number of currently pinned snapshots, for diagnostics.
    pub fn pinned_snapshots(&self) -> usize {
        self.snapshots.live_count()
    }

    fn missing_collection(collection: CollectionId) -> LatticeError {
        LatticeError::not_found(collection.to_string())
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemStore {
    fn get_at(
        &self,
        collection: CollectionId,
        key: Key,
        sequence: Sequence,
    ) -> Result<Option<VersionedValue>> {
        let tree = self
            .collections
            .get(&collection)
            .ok_or_else(|| Self::missing_collection(collection))?;
        let guard = tree.read();
        Ok(guard.get(&key).and_then(|chain| {
            chain.version_at(sequence).map(|entry| VersionedValue {
                value: entry.value.clone(),
                sequence: entry.sequence,
            })
        }))
    }

    fn multi_get(
        &self,
        tasks: &[(CollectionId, Key)],
        sequence: Sequence,
    ) -> Result<Vec<Option<VersionedValue>>> {
        // Group by collection so each tree lock is taken once.
        let mut results = vec![None; tasks.len()];
        let mut by_collection: BTreeMap<CollectionId, Vec<usize>> = BTreeMap::new();
        for (index, &(collection, _)) in tasks.iter().enumerate() {
            by_collection.entry(collection).or_default().push(index);
        }
        for (collection, indices) in by_collection {
            let tree = self
                .collections
                .get(&collection)
                .ok_or_else(|| Self::missing_collection(collection))?;
            let guard = tree.read();
            for index in indices {
                let key = tasks[index].1;
                results[index] = guard.get(&key).and_then(|chain| {
                    chain.version_at(sequence).map(|entry| VersionedValue {
                        value: entry.value.clone(),
                        sequence: entry.sequence,
                    })
                });
            }
        }
        Ok(results)
    }

    fn scan(
        &self,
        collection: CollectionId,
        min_key: Key,
        limit: usize,
        sequence: Sequence,
    ) -> Result<Vec<(Key, u32)>> {
        let tree = self
            .collections
            .get(&collection)
            .ok_or_else(|| Self::missing_collection(collection))?;
        let guard = tree.read();
        let mut found = Vec::with_capacity(limit.min(1024));
        for (&key, chain) in guard.range(min_key..) {
            if found.len() == limit {
                break;
            }
            if let Some(entry) = chain.version_at(sequence) {
                if let Some(value) = &entry.value {
                    found.push((key, value.len() as u32));
                }
            }
        }
        Ok(found)
    }

    fn last_write(&self, collection: CollectionId, key: Key) -> Result<Sequence> {
        let tree = self
            .collections
            .get(&collection)
            .ok_or_else(|| Self::missing_collection(collection))?;
        let guard = tree.read();
        Ok(guard
            .get(&key)
            .map(|chain| chain.last_sequence())
            .unwrap_or(0))
    }

    fn apply(&self, ops: &[WriteOp], sequence: Sequence) -> Result<()> {
        // Check every target first so a failing group mutates nothing.
        for op in ops {
            if !self.collections.contains_key(&op.collection) {
                return Err(Self::missing_collection(op.collection));
            }
        }

        // The horizon must not pass the pre-publish sequence: a pin
        // taken while this group is in flight pins exactly that value,
        // and pruning past it would drop versions the pin still needs.
        let current = self.current_sequence();
        let oldest_relevant = self
            .snapshots
            .oldest_pinned()
            .unwrap_or(current)
            .min(current);
        let mut added: u64 = 0;
        let mut reclaimed: u64 = 0;
        let mut by_collection: BTreeMap<CollectionId, Vec<&WriteOp>> = BTreeMap::new();
        for op in ops {
            by_collection.entry(op.collection).or_default().push(op);
        }

        for (collection, group) in by_collection {
            let tree = self
                .collections
                .get(&collection)
                .ok_or_else(|| Self::missing_collection(collection))?;
            let mut guard = tree.write();
            for op in group {
                let chain = guard.entry(op.key).or_default();
                added += op.value.as_ref().map(|v| v.len() as u64).unwrap_or(0);
                chain.versions.push(VersionEntry {
                    sequence,
                    value: op.value.clone(),
                });
                if chain.versions.len() > self.chain_limit {
                    reclaimed += chain.prune(oldest_relevant);
                }
            }
        }

        self.live_bytes.fetch_add(added, Ordering::Relaxed);
        self.live_bytes.fetch_sub(reclaimed, Ordering::Relaxed);
        self.sequence.fetch_max(sequence, Ordering::SeqCst);
        Ok(())
    }

    fn current_sequence(&self) -> Sequence {
        self.sequence.load(Ordering::SeqCst)
    }

    fn snapshot_acquire(&self) -> Sequence {
        let sequence = self.current_sequence();
        self.snapshots.pin(sequence);
        sequence
    }

    fn snapshot_release(&self, sequence: Sequence) {
        self.snapshots.unpin(sequence);
    }

    fn collection_create(&self, collection: CollectionId) -> Result<()> {
        self.collections
            .entry(collection)
            .or_insert_with(|| RwLock::new(BTreeMap::new()));
        Ok(())
    }

    fn collection_drop(&self, collection: CollectionId) -> Result<()> {
        if collection.is_default() {
            return Err(LatticeError::args_invalid(
                "the default collection cannot be dropped",
            ));
        }
        let (_, tree) = self
            .collections
            .remove(&collection)
            .ok_or_else(|| Self::missing_collection(collection))?;
        let dropped: u64 = tree
            .read()
            .values()
            .flat_map(|chain| chain.versions.iter())
            .map(VersionEntry::payload_bytes)
            .sum();
        self.live_bytes.fetch_sub(dropped, Ordering::Relaxed);
        debug!(
            collection = collection.as_u64(),
            dropped_bytes = dropped,
            "collection data dropped"
        );
        Ok(())
    }

    fn approximate_memory(&self) -> u64 {
        self.live_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::SnapshotView;

    fn value(bytes: &[u8]) -> ValueBytes {
        ValueBytes::from(bytes)
    }

    fn put_one(store: &MemStore, key: Key, bytes: &[u8], sequence: Sequence) {
        store
            .apply(
                &[WriteOp::put(CollectionId::DEFAULT, key, value(bytes))],
                sequence,
            )
            .unwrap();
    }

    #[test]
    fn test_get_latest_after_put() {
        let store = MemStore::new();
        put_one(&store, 7, b"hi", 1);

        let found = store.get(CollectionId::DEFAULT, 7).unwrap().unwrap();
        assert_eq!(found.value.as_deref(), Some(&b"hi"[..]));
        assert_eq!(found.sequence, 1);
        assert_eq!(store.current_sequence(), 1);
    }

    #[test]
    fn test_get_at_respects_snapshot_sequence() {
        let store = MemStore::new();
        put_one(&store, 7, b"old", 1);
        put_one(&store, 7, b"new", 2);

        let at_one = store.get_at(CollectionId::DEFAULT, 7, 1).unwrap().unwrap();
        assert_eq!(at_one.value.as_deref(), Some(&b"old"[..]));

        let at_two = store.get_at(CollectionId::DEFAULT, 7, 2).unwrap().unwrap();
        assert_eq!(at_two.value.as_deref(), Some(&b"new"[..]));

        assert!(store.get_at(CollectionId::DEFAULT, 7, 0).unwrap().is_none());
    }

    #[test]
    fn test_tombstone_is_a_version() {
        let store = MemStore::new();
        put_one(&store, 5, b"x", 1);
        store
            .apply(&[WriteOp::delete(CollectionId::DEFAULT, 5)], 2)
            .unwrap();

        let latest = store.get(CollectionId::DEFAULT, 5).unwrap().unwrap();
        assert!(latest.is_tombstone());
        assert_eq!(latest.sequence, 2);

        // The pre-delete version is still visible at its snapshot.
        let old = store.get_at(CollectionId::DEFAULT, 5, 1).unwrap().unwrap();
        assert_eq!(old.value.as_deref(), Some(&b"x"[..]));
    }

    #[test]
    fn test_apply_publishes_atomically() {
        let store = MemStore::new();
        store
            .apply(
                &[
                    WriteOp::put(CollectionId::DEFAULT, 1, value(b"a")),
                    WriteOp::put(CollectionId::DEFAULT, 2, value(b"b")),
                ],
                1,
            )
            .unwrap();

        let one = store.get(CollectionId::DEFAULT, 1).unwrap().unwrap();
        let two = store.get(CollectionId::DEFAULT, 2).unwrap().unwrap();
        assert_eq!(one.sequence, two.sequence);
    }

    #[test]
    fn test_apply_to_missing_collection_mutates_nothing() {
        let store = MemStore::new();
        let ghost = CollectionId::from_raw(99);
        let err = store
            .apply(
                &[
                    WriteOp::put(CollectionId::DEFAULT, 1, value(b"a")),
                    WriteOp::put(ghost, 2, value(b"b")),
                ],
                1,
            )
            .unwrap_err();
        assert_eq!(err.kind(), lattice_core::ErrorKind::NotFound);
        assert!(store.get(CollectionId::DEFAULT, 1).unwrap().is_none());
        assert_eq!(store.current_sequence(), 0);
    }

    #[test]
    fn test_empty_apply_advances_sequence() {
        let store = MemStore::new();
        store.apply(&[], 3).unwrap();
        assert_eq!(store.current_sequence(), 3);
    }

    #[test]
    fn test_multi_get_mixed_collections() {
        let store = MemStore::new();
        let extra = CollectionId::from_raw(1);
        store.collection_create(extra).unwrap();
        put_one(&store, 1, b"default", 1);
        store
            .apply(&[WriteOp::put(extra, 1, value(b"extra"))], 2)
            .unwrap();

        let results = store
            .multi_get(
                &[
                    (CollectionId::DEFAULT, 1),
                    (extra, 1),
                    (CollectionId::DEFAULT, 42),
                ],
                2,
            )
            .unwrap();
        assert_eq!(results[0].as_ref().unwrap().value.as_deref(), Some(&b"default"[..]));
        assert_eq!(results[1].as_ref().unwrap().value.as_deref(), Some(&b"extra"[..]));
        assert!(results[2].is_none());
    }

    #[test]
    fn test_scan_ascending_and_bounded() {
        let store = MemStore::new();
        for (sequence, key) in [30u64, 10, 20, 40].into_iter().enumerate() {
            put_one(&store, key, b"v", sequence as u64 + 1);
        }
        store
            .apply(&[WriteOp::delete(CollectionId::DEFAULT, 20)], 5)
            .unwrap();

        let found = store.scan(CollectionId::DEFAULT, 0, 10, 5).unwrap();
        let keys: Vec<Key> = found.iter().map(|(key, _)| *key).collect();
        assert_eq!(keys, vec![10, 30, 40], "tombstoned key skipped, ascending");

        let bounded = store.scan(CollectionId::DEFAULT, 15, 1, 5).unwrap();
        assert_eq!(bounded.len(), 1);
        assert_eq!(bounded[0].0, 30);
    }

    #[test]
    fn test_scan_at_old_sequence_sees_old_state() {
        let store = MemStore::new();
        put_one(&store, 1, b"a", 1);
        put_one(&store, 2, b"b", 2);

        let early = store.scan(CollectionId::DEFAULT, 0, 10, 1).unwrap();
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].0, 1);
    }

    #[test]
    fn test_last_write_tracks_puts_and_deletes() {
        let store = MemStore::new();
        assert_eq!(store.last_write(CollectionId::DEFAULT, 9).unwrap(), 0);
        put_one(&store, 9, b"x", 4);
        assert_eq!(store.last_write(CollectionId::DEFAULT, 9).unwrap(), 4);
        store
            .apply(&[WriteOp::delete(CollectionId::DEFAULT, 9)], 6)
            .unwrap();
        assert_eq!(store.last_write(CollectionId::DEFAULT, 9).unwrap(), 6);
    }

    #[test]
    fn test_chain_pruning_respects_pins() {
        let store = Arc::new(MemStore::with_chain_limit(2));
        put_one(&store, 1, b"v1", 1);

        let pinned = store.create_snapshot();
        assert_eq!(pinned.sequence(), 1);

        // Overwrite enough times to trigger pruning.
        for sequence in 2..8u64 {
            put_one(&store, 1, format!("v{sequence}").as_bytes(), sequence);
        }

        // The pinned version must survive reclamation.
        let at_pin = store.get_at(CollectionId::DEFAULT, 1, 1).unwrap().unwrap();
        assert_eq!(at_pin.value.as_deref(), Some(&b"v1"[..]));

        drop(pinned);
        put_one(&store, 1, b"v8", 8);
        put_one(&store, 1, b"v9", 9);
        // With the pin gone, old versions may be reclaimed.
        assert!(store.get_at(CollectionId::DEFAULT, 1, 1).unwrap().is_none());
        let latest = store.get(CollectionId::DEFAULT, 1).unwrap().unwrap();
        assert_eq!(latest.value.as_deref(), Some(&b"v9"[..]));
    }

    #[test]
    fn test_shadowed_versions_and_tombstones_reclaimed() {
        let store = MemStore::with_chain_limit(1);
        put_one(&store, 3, b"x", 1);
        store
            .apply(&[WriteOp::delete(CollectionId::DEFAULT, 3)], 2)
            .unwrap();
        // A later write prunes both the shadowed value and the
        // tombstone that shadowed it.
        store
            .apply(&[WriteOp::delete(CollectionId::DEFAULT, 3)], 3)
            .unwrap();

        assert_eq!(store.approximate_memory(), 0, "payload bytes reclaimed");
        assert!(store.get_at(CollectionId::DEFAULT, 3, 2).unwrap().is_none());
        // The newest tombstone survives so conflict detection still
        // sees the delete.
        assert_eq!(store.last_write(CollectionId::DEFAULT, 3).unwrap(), 3);
        let latest = store.get(CollectionId::DEFAULT, 3).unwrap().unwrap();
        assert!(latest.is_tombstone());
    }

    #[test]
    fn test_collection_lifecycle() {
        let store = MemStore::new();
        let extra = CollectionId::from_raw(5);
        store.collection_create(extra).unwrap();
        store
            .apply(&[WriteOp::put(extra, 1, value(b"x"))], 1)
            .unwrap();

        store.collection_drop(extra).unwrap();
        let err = store.get(extra, 1).unwrap_err();
        assert_eq!(err.kind(), lattice_core::ErrorKind::NotFound);

        let err = store.collection_drop(CollectionId::DEFAULT).unwrap_err();
        assert_eq!(err.kind(), lattice_core::ErrorKind::ArgsInvalid);
    }

    #[test]
    fn test_memory_accounting_moves_with_data() {
        let store = MemStore::new();
        assert_eq!(store.approximate_memory(), 0);
        put_one(&store, 1, &[0u8; 100], 1);
        assert_eq!(store.approximate_memory(), 100);

        let extra = CollectionId::from_raw(2);
        store.collection_create(extra).unwrap();
        store
            .apply(&[WriteOp::put(extra, 1, value(&[0u8; 50]))], 2)
            .unwrap();
        assert_eq!(store.approximate_memory(), 150);

        store.collection_drop(extra).unwrap();
        assert_eq!(store.approximate_memory(), 100);
    }
}
