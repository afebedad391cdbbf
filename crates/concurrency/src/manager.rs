//! Transaction manager: the commit serialization point
//!
//! Exactly one place orders successful commits: the manager's commit
//! mutex. Inside it, watch-set validation, sequence assignment, and
//! atomic publication happen with no interleaving writer, which rules
//! out the validate-then-apply race entirely. Non-transactional
//! atomic write groups are sequenced through the same point so every
//! mutation of the database carries a unique, totally ordered
//! sequence number.
//!
//! ## Commit sequence
//!
//! ```text
//! 1. lock the commit mutex
//! 2. validate the watch set (first-committer-wins)
//! 3. conflicts? -> return `conflict`, state preserved for retry
//! 4. allocate C = current_sequence + 1
//! 5. apply the write set atomically at C (empty sets still advance C)
//! 6. unlock; return C
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use lattice_core::{LatticeError, Result, Sequence, Storage, WriteOp};

use crate::transaction::TransactionContext;
use crate::validation::validate_watch_set;

/// Coordinates transaction lifecycle and atomic commits
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    live_transactions: AtomicU64,
    commit_lock: Mutex<()>,
}

impl TransactionManager {
    /// Create a manager. Transaction ids start at 1.
    pub fn new() -> Self {
        TransactionManager {
            next_txn_id: AtomicU64::new(1),
            live_transactions: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
        }
    }

    /// Begin a transaction against `store`.
    ///
    /// `at_sequence` requests an explicit snapshot; `None` captures
    /// the latest committed sequence. Requesting a snapshot newer
    /// than the current sequence is `args_invalid`.
    pub fn begin<S: Storage>(
        &self,
        store: &S,
        watch_by_default: bool,
        at_sequence: Option<Sequence>,
    ) -> Result<TransactionContext> {
        let current = store.current_sequence();
        let snapshot = match at_sequence {
            Some(requested) if requested > current => {
                return Err(LatticeError::args_invalid(format!(
                    "requested snapshot {requested} is newer than committed sequence {current}"
                )));
            }
            Some(requested) => requested,
            None => current,
        };
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        self.live_transactions.fetch_add(1, Ordering::SeqCst);
        debug!(txn_id, snapshot, "transaction started");
        Ok(TransactionContext::new(txn_id, snapshot, watch_by_default))
    }

    /// Note that a transaction handed out by [`Self::begin`] reached
    /// the end of its life (committed, aborted, or dropped).
    pub fn release(&self) {
        let previous = self.live_transactions.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "release without a matching begin");
    }

    /// Number of transactions currently alive.
    pub fn live_transactions(&self) -> u64 {
        self.live_transactions.load(Ordering::SeqCst)
    }

    /// Commit `txn` atomically against `store`.
    ///
    /// On `conflict` — and on any other error — the transaction's
    /// write and watch sets survive so the caller can reset to a new
    /// snapshot and retry. On success they are cleared and the
    /// assigned commit sequence is returned. Read-only transactions
    /// still consume a sequence so every successful commit is
    /// totally ordered.
    pub fn commit<S: Storage>(
        &self,
        txn: &mut TransactionContext,
        store: &S,
    ) -> Result<Sequence> {
        txn.ensure_active()?;
        let _serialization_point = self.commit_lock.lock();

        let outcome = validate_watch_set(&txn.watch_set, txn.snapshot(), store)?;
        if let Some(violation) = outcome.first() {
            debug!(
                txn_id = txn.txn_id,
                collection = violation.collection.as_u64(),
                key = violation.key,
                observed = violation.observed,
                committed = violation.committed,
                "commit lost the serialization race"
            );
            return Err(LatticeError::conflict(format!(
                "watched key {} in {} was written at sequence {} after snapshot {}",
                violation.key,
                violation.collection,
                violation.committed,
                txn.snapshot()
            )));
        }

        let sequence = store
            .current_sequence()
            .checked_add(1)
            .ok_or_else(|| LatticeError::corruption("commit sequence counter overflow"))?;
        let ops = txn.write_ops();
        store.apply(&ops, sequence)?;
        txn.mark_committed(sequence);
        debug!(
            txn_id = txn.txn_id,
            commit_sequence = sequence,
            writes = ops.len(),
            "transaction committed"
        );
        Ok(sequence)
    }

    /// Sequence a non-transactional atomic write group through the
    /// serialization point. Blind by definition: nothing to validate.
    pub fn write_group<S: Storage>(&self, store: &S, ops: &[WriteOp]) -> Result<Sequence> {
        let _serialization_point = self.commit_lock.lock();
        let sequence = store
            .current_sequence()
            .checked_add(1)
            .ok_or_else(|| LatticeError::corruption("commit sequence counter overflow"))?;
        store.apply(ops, sequence)?;
        Ok(sequence)
    }

    /// Run `operation` inside the serialization point. Used for
    /// structural changes (collection drops) that must not interleave
    /// with commits.
    pub fn serialized<T>(&self, operation: impl FnOnce() -> Result<T>) -> Result<T> {
        let _serialization_point = self.commit_lock.lock();
        operation()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::ReadAccess;
    use lattice_core::{CollectionId, ErrorKind, Key, ValueBytes};
    use lattice_storage::MemStore;
    use std::sync::Arc;

    fn bytes(data: &[u8]) -> ValueBytes {
        ValueBytes::from(data)
    }

    fn commit_put(
        manager: &TransactionManager,
        store: &MemStore,
        key: Key,
        data: &[u8],
    ) -> Sequence {
        let mut txn = manager.begin(store, true, None).unwrap();
        txn.put(CollectionId::DEFAULT, key, bytes(data)).unwrap();
        manager.commit(&mut txn, store).unwrap()
    }

    #[test]
    fn test_commit_sequences_strictly_increase() {
        let store = MemStore::new();
        let manager = TransactionManager::new();
        let first = commit_put(&manager, &store, 1, b"a");
        let second = commit_put(&manager, &store, 2, b"b");
        let third = commit_put(&manager, &store, 1, b"c");
        assert!(first < second && second < third);
    }

    #[test]
    fn test_watched_read_conflicts_with_interleaved_write() {
        let store = MemStore::new();
        let manager = TransactionManager::new();
        commit_put(&manager, &store, 7, b"original");

        let mut reader = manager.begin(&store, true, None).unwrap();
        reader
            .get(&store, CollectionId::DEFAULT, 7, ReadAccess::default())
            .unwrap();
        reader
            .put(CollectionId::DEFAULT, 8, bytes(b"derived"))
            .unwrap();

        // A second transaction wins the race to key 7.
        commit_put(&manager, &store, 7, b"overwritten");

        let err = manager.commit(&mut reader, &store).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        // The losing write never landed.
        assert!(store.get(CollectionId::DEFAULT, 8).unwrap().is_none());
    }

    #[test]
    fn test_unwatched_read_commits_despite_interleaved_write() {
        let store = MemStore::new();
        let manager = TransactionManager::new();
        commit_put(&manager, &store, 7, b"original");

        let mut reader = manager.begin(&store, false, None).unwrap();
        reader
            .get(&store, CollectionId::DEFAULT, 7, ReadAccess::default())
            .unwrap();
        reader
            .put(CollectionId::DEFAULT, 8, bytes(b"derived"))
            .unwrap();

        commit_put(&manager, &store, 7, b"overwritten");

        assert!(manager.commit(&mut reader, &store).is_ok());
    }

    #[test]
    fn test_blind_writes_never_conflict() {
        let store = MemStore::new();
        let manager = TransactionManager::new();
        commit_put(&manager, &store, 7, b"original");

        let mut blind = manager.begin(&store, true, None).unwrap();
        blind
            .put(CollectionId::DEFAULT, 7, bytes(b"blind"))
            .unwrap();

        commit_put(&manager, &store, 7, b"racer");

        assert!(manager.commit(&mut blind, &store).is_ok());
        let final_value = store.get(CollectionId::DEFAULT, 7).unwrap().unwrap();
        assert_eq!(final_value.value.as_deref(), Some(&b"blind"[..]));
    }

    #[test]
    fn test_conflict_preserves_state_for_retry() {
        let store = MemStore::new();
        let manager = TransactionManager::new();
        commit_put(&manager, &store, 1, b"v1");

        let mut txn = manager.begin(&store, true, None).unwrap();
        txn.get(&store, CollectionId::DEFAULT, 1, ReadAccess::default())
            .unwrap();
        txn.put(CollectionId::DEFAULT, 2, bytes(b"result")).unwrap();

        commit_put(&manager, &store, 1, b"v2");

        let err = manager.commit(&mut txn, &store).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(txn.staged_writes(), 1, "write set preserved");
        assert_eq!(txn.watched_reads(), 1, "watch set preserved");

        // Re-snapshot and retry; the racing write is now before the
        // snapshot, so the same state commits.
        txn.reset(store.current_sequence());
        let sequence = manager.commit(&mut txn, &store).unwrap();
        assert!(sequence > 0);
        let landed = store.get(CollectionId::DEFAULT, 2).unwrap().unwrap();
        assert_eq!(landed.value.as_deref(), Some(&b"result"[..]));
    }

    #[test]
    fn test_committed_transaction_cannot_recommit() {
        let store = MemStore::new();
        let manager = TransactionManager::new();
        let mut txn = manager.begin(&store, true, None).unwrap();
        txn.put(CollectionId::DEFAULT, 1, bytes(b"x")).unwrap();
        manager.commit(&mut txn, &store).unwrap();

        let err = manager.commit(&mut txn, &store).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgsInvalid);
    }

    #[test]
    fn test_read_only_commit_consumes_a_sequence() {
        let store = MemStore::new();
        let manager = TransactionManager::new();
        commit_put(&manager, &store, 1, b"x");

        let mut reader = manager.begin(&store, true, None).unwrap();
        reader
            .get(&store, CollectionId::DEFAULT, 1, ReadAccess::default())
            .unwrap();
        let sequence = manager.commit(&mut reader, &store).unwrap();
        assert_eq!(sequence, 2);
        assert_eq!(store.current_sequence(), 2);
    }

    #[test]
    fn test_explicit_snapshot_request() {
        let store = MemStore::new();
        let manager = TransactionManager::new();
        commit_put(&manager, &store, 1, b"v1");
        commit_put(&manager, &store, 1, b"v2");

        let mut historical = manager.begin(&store, true, Some(1)).unwrap();
        let seen = historical
            .get(&store, CollectionId::DEFAULT, 1, ReadAccess::default())
            .unwrap();
        assert_eq!(seen.as_deref(), Some(&b"v1"[..]));

        let err = manager.begin(&store, true, Some(99)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgsInvalid);
    }

    #[test]
    fn test_live_transaction_accounting() {
        let store = MemStore::new();
        let manager = TransactionManager::new();
        assert_eq!(manager.live_transactions(), 0);

        let txn_a = manager.begin(&store, true, None).unwrap();
        let txn_b = manager.begin(&store, true, None).unwrap();
        assert_eq!(manager.live_transactions(), 2);
        assert_ne!(txn_a.txn_id, txn_b.txn_id);

        manager.release();
        manager.release();
        assert_eq!(manager.live_transactions(), 0);
    }

    #[test]
    fn test_parallel_commits_get_unique_sequences() {
        let store = Arc::new(MemStore::new());
        let manager = Arc::new(TransactionManager::new());

        let handles: Vec<_> = (0..8u64)
            .map(|thread| {
                let store = Arc::clone(&store);
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || {
                    let mut txn = manager.begin(store.as_ref(), true, None).unwrap();
                    txn.put(CollectionId::DEFAULT, thread, bytes(b"t")).unwrap();
                    manager.commit(&mut txn, store.as_ref()).unwrap()
                })
            })
            .collect();

        let mut sequences: Vec<Sequence> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        sequences.sort_unstable();
        sequences.dedup();
        assert_eq!(sequences.len(), 8, "sequences are unique");
        assert_eq!(*sequences.last().unwrap(), 8, "and dense");
    }

    #[test]
    fn test_write_group_is_atomic_and_sequenced() {
        let store = MemStore::new();
        let manager = TransactionManager::new();

        let sequence = manager
            .write_group(
                &store,
                &[
                    WriteOp::put(CollectionId::DEFAULT, 1, bytes(b"a")),
                    WriteOp::put(CollectionId::DEFAULT, 2, bytes(b"b")),
                ],
            )
            .unwrap();
        assert_eq!(sequence, 1);

        let next = commit_put(&manager, &store, 3, b"c");
        assert_eq!(next, 2, "groups and commits share one order");
    }
}
