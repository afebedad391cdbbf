//! Transaction context: staged state of one in-flight transaction
//!
//! A transaction reads at the snapshot captured when it began, stages
//! its writes privately, and records every watched read so commit
//! validation can enforce serializability. The backend never sees
//! staged data; publication happens in one atomic `apply` inside the
//! manager's serialization point.
//!
//! Failure keeps state: a commit that returns `conflict` (or any
//! other error) leaves the write and watch sets intact so the caller
//! can `reset` to a fresh snapshot and retry. Only a successful
//! commit or an explicit `abort` clears them.

use std::collections::{BTreeMap, HashMap};

use lattice_core::{
    CollectionId, Key, LatticeError, Result, Sequence, Storage, ValueBytes, LEN_MISSING, WriteOp,
};

/// Lifecycle state of a [`TransactionContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Accepting reads and staged writes.
    Active,
    /// Published at the carried commit sequence; now invalid until
    /// reset.
    Committed(Sequence),
    /// Explicitly discarded; may be reset and reused.
    Aborted,
}

/// Per-read behavior switches
///
/// `transparent` bypasses the snapshot and reads latest committed
/// state (read-your-writes staging still applies). `watch` controls
/// watch-set insertion for this read; the transaction-level
/// `dont_watch` default wins when it is stricter.
#[derive(Debug, Clone, Copy)]
pub struct ReadAccess {
    /// Read latest committed state instead of the snapshot.
    pub transparent: bool,
    /// Record this read in the watch set.
    pub watch: bool,
}

impl Default for ReadAccess {
    fn default() -> Self {
        ReadAccess {
            transparent: false,
            watch: true,
        }
    }
}

/// Staged state of one in-flight transaction
#[derive(Debug)]
pub struct TransactionContext {
    /// Identifier assigned at begin; stable across resets.
    pub txn_id: u64,
    snapshot: Sequence,
    status: TransactionStatus,
    pub(crate) write_set: HashMap<(CollectionId, Key), Option<ValueBytes>>,
    pub(crate) watch_set: HashMap<(CollectionId, Key), Sequence>,
    watch_by_default: bool,
}

impl TransactionContext {
    /// Create an active context reading at `snapshot`.
    pub fn new(txn_id: u64, snapshot: Sequence, watch_by_default: bool) -> Self {
        TransactionContext {
            txn_id,
            snapshot,
            status: TransactionStatus::Active,
            write_set: HashMap::new(),
            watch_set: HashMap::new(),
            watch_by_default,
        }
    }

    /// The snapshot sequence this transaction reads at.
    pub fn snapshot(&self) -> Sequence {
        self.snapshot
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Commit sequence, if this transaction committed.
    pub fn commit_sequence(&self) -> Option<Sequence> {
        match self.status {
            TransactionStatus::Committed(sequence) => Some(sequence),
            _ => None,
        }
    }

    /// Whether no writes are staged.
    pub fn is_read_only(&self) -> bool {
        self.write_set.is_empty()
    }

    /// Number of staged writes.
    pub fn staged_writes(&self) -> usize {
        self.write_set.len()
    }

    /// Number of watched reads.
    pub fn watched_reads(&self) -> usize {
        self.watch_set.len()
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        match self.status {
            TransactionStatus::Active => Ok(()),
            TransactionStatus::Committed(_) => Err(LatticeError::args_invalid(
                "transaction already committed; reset before reuse",
            )),
            TransactionStatus::Aborted => Err(LatticeError::args_invalid(
                "transaction aborted; reset before reuse",
            )),
        }
    }

    /// Read one key with read-your-writes semantics.
    ///
    /// Staged writes win; otherwise the backend is consulted at the
    /// snapshot (or at latest committed state for a transparent
    /// read), and the observation enters the watch set unless
    /// watching is suppressed.
    pub fn get<S: Storage>(
        &mut self,
        store: &S,
        collection: CollectionId,
        key: Key,
        access: ReadAccess,
    ) -> Result<Option<ValueBytes>> {
        self.ensure_active()?;
        if let Some(staged) = self.write_set.get(&(collection, key)) {
            return Ok(staged.clone());
        }

        let sequence = if access.transparent {
            store.current_sequence()
        } else {
            self.snapshot
        };
        let found = store.get_at(collection, key, sequence)?;
        if self.watch_by_default && access.watch {
            let observed = found.as_ref().map(|vv| vv.sequence).unwrap_or(0);
            self.watch_set.entry((collection, key)).or_insert(observed);
        }
        Ok(found.and_then(|vv| vv.value))
    }

    /// Stage a put, replacing any earlier staging for the same key.
    pub fn put(&mut self, collection: CollectionId, key: Key, value: ValueBytes) -> Result<()> {
        self.ensure_active()?;
        if value.len() >= LEN_MISSING as usize {
            return Err(LatticeError::args_invalid(
                "value length collides with the missing-length sentinel",
            ));
        }
        self.write_set.insert((collection, key), Some(value));
        Ok(())
    }

    /// Stage a tombstone, replacing any earlier staging for the key.
    pub fn delete(&mut self, collection: CollectionId, key: Key) -> Result<()> {
        self.ensure_active()?;
        self.write_set.insert((collection, key), None);
        Ok(())
    }

    /// Bounded ascending scan at the snapshot, merged with staged
    /// state: staged tombstones hide keys, staged puts appear. Every
    /// key observed from the backend is watched.
    pub fn scan<S: Storage>(
        &mut self,
        store: &S,
        collection: CollectionId,
        min_key: Key,
        limit: usize,
    ) -> Result<Vec<(Key, u32)>> {
        self.scan_with(store, collection, min_key, limit, ReadAccess::default())
    }

    /// Scan with explicit per-operation behavior.
    pub fn scan_with<S: Storage>(
        &mut self,
        store: &S,
        collection: CollectionId,
        min_key: Key,
        limit: usize,
        access: ReadAccess,
    ) -> Result<Vec<(Key, u32)>> {
        self.ensure_active()?;

        // Staged tombstones can each hide one backend entry, so
        // over-fetch by that many to keep the bound exact.
        let staged_tombstones = self
            .write_set
            .iter()
            .filter(|(&(col, key), staged)| {
                col == collection && key >= min_key && staged.is_none()
            })
            .count();
        let sequence = if access.transparent {
            store.current_sequence()
        } else {
            self.snapshot
        };
        let fetched = store.scan(
            collection,
            min_key,
            limit.saturating_add(staged_tombstones),
            sequence,
        )?;

        let mut merged: BTreeMap<Key, u32> = BTreeMap::new();
        for (key, len) in fetched {
            if self.watch_by_default && access.watch {
                self.watch_set.entry((collection, key)).or_insert(sequence);
            }
            merged.insert(key, len);
        }
        for (&(col, key), staged) in &self.write_set {
            if col != collection || key < min_key {
                continue;
            }
            match staged {
                Some(value) => {
                    merged.insert(key, value.len() as u32);
                }
                None => {
                    merged.remove(&key);
                }
            }
        }

        Ok(merged.into_iter().take(limit).collect())
    }

    /// The staged writes as an ordered atomic group.
    pub fn write_ops(&self) -> Vec<WriteOp> {
        let ordered: BTreeMap<_, _> = self.write_set.iter().collect();
        ordered
            .into_iter()
            .map(|(&(collection, key), value)| WriteOp {
                collection,
                key,
                value: value.clone(),
            })
            .collect()
    }

    pub(crate) fn mark_committed(&mut self, sequence: Sequence) {
        self.status = TransactionStatus::Committed(sequence);
        self.write_set.clear();
        self.watch_set.clear();
    }

    /// Discard all staged state. The context may be reset afterwards.
    pub fn abort(&mut self) {
        self.write_set.clear();
        self.watch_set.clear();
        self.status = TransactionStatus::Aborted;
    }

    /// Re-arm the context at a new snapshot. After a failed commit
    /// the write and watch sets are still present, so resetting and
    /// recommitting is the retry path; after an abort or a commit the
    /// sets are empty and the context starts fresh.
    pub fn reset(&mut self, snapshot: Sequence) {
        self.snapshot = snapshot;
        self.status = TransactionStatus::Active;
    }
}
