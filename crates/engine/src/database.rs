//! Database facade: open/close, collections, transactions, status
//!
//! `Database` owns the shared state (store, registry, transaction
//! manager) behind an `Arc`, and every derived object — transactions,
//! snapshots — holds that `Arc`, so the database structurally
//! outlives everything it handed out.
//!
//! Configuration arrives as one opaque string. The bundled backend
//! understands a minimal `key=value;` form and ignores pairs it does
//! not know, so a config written for a richer backend still opens.

use std::sync::Arc;

use tracing::{debug, info};

use lattice_concurrency::{ReadAccess, TransactionContext, TransactionManager, TransactionStatus};
use lattice_core::{
    Arena, CollectionId, Key, LatticeError, ReadTape, Result, ScanTape, Sequence, Storage,
    ValueBytes, WriteOp,
};
use lattice_storage::{CollectionRegistry, MemStore};

use crate::batch::{dispatch_read, dispatch_scan, dispatch_write, ReadTasks, ScanTasks, WriteTasks};
use crate::options::{ReadOptions, TransactionOptions, WriteOptions};

/// Parsed engine configuration
#[derive(Debug, Clone)]
struct Config {
    version_chain_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            version_chain_limit: lattice_storage::store::DEFAULT_CHAIN_LIMIT,
        }
    }
}

impl Config {
    /// Parse the opaque configuration string. Unknown keys are
    /// ignored; known keys with unparseable values are errors.
    fn parse(raw: &str) -> Result<Self> {
        let mut config = Config::default();
        for pair in raw.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((key, value)) = pair.split_once('=') else {
                return Err(LatticeError::args_invalid(format!(
                    "config entry '{pair}' is not key=value"
                )));
            };
            if key.trim() == "version_chain_limit" {
                config.version_chain_limit = value.trim().parse().map_err(|_| {
                    LatticeError::args_invalid(format!(
                        "version_chain_limit '{}' is not an integer",
                        value.trim()
                    ))
                })?;
            }
        }
        Ok(config)
    }
}

struct DbShared {
    store: Arc<MemStore>,
    registry: CollectionRegistry,
    manager: TransactionManager,
}

/// Engine metadata, advisory only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Major version of the engine.
    pub version_major: u32,
    /// Minor version of the engine.
    pub version_minor: u32,
    /// Approximate bytes of live data.
    pub memory_usage: u64,
    /// Bytes on disk; zero for the in-memory backend.
    pub disk_usage: u64,
    /// Transactions currently alive.
    pub live_transactions: u64,
}

/// A Lattice database instance
///
/// Cheap to clone; clones share state. All entry points are safe to
/// call concurrently from any number of threads.
#[derive(Clone)]
pub struct Database {
    shared: Arc<DbShared>,
}

impl Database {
    /// Open a database from an opaque configuration string.
    pub fn open(config: &str) -> Result<Self> {
        let config = Config::parse(config)?;
        let store = Arc::new(MemStore::with_chain_limit(config.version_chain_limit));
        info!(
            version_chain_limit = config.version_chain_limit,
            "database opened"
        );
        Ok(Database {
            shared: Arc::new(DbShared {
                store,
                registry: CollectionRegistry::new(),
                manager: TransactionManager::new(),
            }),
        })
    }

    /// Resolve or create a named collection. `None` or the empty
    /// name refers to the default collection.
    pub fn collection_open(&self, name: Option<&str>) -> Result<CollectionId> {
        let name = match name {
            None | Some("") => return Ok(CollectionId::DEFAULT),
            Some(name) => name,
        };
        let (id, created) = self.shared.registry.open(name)?;
        if created {
            self.shared.store.collection_create(id)?;
            info!(name, id = id.as_u64(), "collection created");
        }
        Ok(id)
    }

    /// Drop a named collection: all entries are deleted and the
    /// handle becomes invalid. Serialized against commits so no
    /// write group straddles the drop.
    pub fn collection_drop(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(LatticeError::args_invalid(
                "the default collection cannot be dropped",
            ));
        }
        self.shared.manager.serialized(|| {
            let id = self.shared.registry.remove(name)?;
            self.shared.store.collection_drop(id)
        })?;
        info!(name, "collection dropped");
        Ok(())
    }

    /// Batch point reads, materialized into `arena`. The returned
    /// tape borrows the arena and is invalidated by its next use.
    pub fn read<'a>(
        &self,
        txn: Option<&mut Transaction>,
        tasks: &ReadTasks<'_>,
        options: ReadOptions,
        arena: &'a mut Arena,
    ) -> Result<ReadTape<'a>> {
        let ctx = self.transaction_context(txn)?;
        dispatch_read(self.shared.store.as_ref(), ctx, tasks, options, arena)
    }

    /// Batch writes. Without a transaction the batch applies
    /// atomically and its commit sequence is returned; with one it is
    /// staged and `None` comes back.
    pub fn write(
        &self,
        txn: Option<&mut Transaction>,
        tasks: &WriteTasks<'_>,
        options: WriteOptions,
    ) -> Result<Option<Sequence>> {
        let ctx = self.transaction_context(txn)?;
        dispatch_write(
            self.shared.store.as_ref(),
            &self.shared.manager,
            ctx,
            tasks,
            options,
        )
    }

    /// Batch bounded range scans, materialized into `arena`.
    pub fn scan<'a>(
        &self,
        txn: Option<&mut Transaction>,
        tasks: &ScanTasks<'_>,
        options: ReadOptions,
        arena: &'a mut Arena,
    ) -> Result<ScanTape<'a>> {
        let ctx = self.transaction_context(txn)?;
        dispatch_scan(self.shared.store.as_ref(), ctx, tasks, options, arena)
    }

    /// Read one key outside any transaction.
    pub fn get(&self, collection: CollectionId, key: Key) -> Result<Option<ValueBytes>> {
        Ok(self
            .shared
            .store
            .get(collection, key)?
            .and_then(|vv| vv.value))
    }

    /// Write one key outside any transaction.
    pub fn put(&self, collection: CollectionId, key: Key, value: &[u8]) -> Result<Sequence> {
        self.shared.manager.write_group(
            self.shared.store.as_ref(),
            &[WriteOp::put(collection, key, ValueBytes::from(value))],
        )
    }

    /// Delete one key outside any transaction.
    pub fn delete(&self, collection: CollectionId, key: Key) -> Result<Sequence> {
        self.shared
            .manager
            .write_group(self.shared.store.as_ref(), &[WriteOp::delete(collection, key)])
    }

    /// Begin a transaction.
    pub fn begin_transaction(&self, options: TransactionOptions) -> Result<Transaction> {
        let store = self.shared.store.as_ref();
        let pinned = store.snapshot_acquire();
        let snapshot = options.requested_sequence().or(Some(pinned));
        match self
            .shared
            .manager
            .begin(store, options.watch_by_default(), snapshot)
        {
            Ok(ctx) => Ok(Transaction {
                shared: Arc::clone(&self.shared),
                ctx,
                pinned: Some(pinned),
            }),
            Err(err) => {
                store.snapshot_release(pinned);
                Err(err)
            }
        }
    }

    /// Engine metadata for logging and support tooling. Advisory;
    /// not part of the durability path.
    pub fn status(&self) -> Status {
        Status {
            version_major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            version_minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            memory_usage: self.shared.store.approximate_memory(),
            disk_usage: 0,
            live_transactions: self.shared.manager.live_transactions(),
        }
    }

    fn transaction_context<'t>(
        &self,
        txn: Option<&'t mut Transaction>,
    ) -> Result<Option<&'t mut TransactionContext>> {
        match txn {
            None => Ok(None),
            Some(txn) => {
                if !Arc::ptr_eq(&txn.shared, &self.shared) {
                    return Err(LatticeError::args_invalid(
                        "transaction belongs to a different database",
                    ));
                }
                Ok(Some(&mut txn.ctx))
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("sequence", &self.shared.store.current_sequence())
            .field("live_transactions", &self.shared.manager.live_transactions())
            .finish()
    }
}

/// A serializable transaction handle
///
/// Holds its snapshot pin for its whole life; dropping the handle
/// aborts implicitly (staged writes are lost) and releases the pin.
pub struct Transaction {
    shared: Arc<DbShared>,
    ctx: TransactionContext,
    pinned: Option<Sequence>,
}

impl Transaction {
    /// Identifier assigned at begin.
    pub fn id(&self) -> u64 {
        self.ctx.txn_id
    }

    /// The snapshot sequence this transaction reads at.
    pub fn snapshot(&self) -> Sequence {
        self.ctx.snapshot()
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TransactionStatus {
        self.ctx.status()
    }

    /// Read one key with default options.
    pub fn get(&mut self, collection: CollectionId, key: Key) -> Result<Option<ValueBytes>> {
        self.get_with(collection, key, ReadOptions::new())
    }

    /// Read one key with explicit options.
    pub fn get_with(
        &mut self,
        collection: CollectionId,
        key: Key,
        options: ReadOptions,
    ) -> Result<Option<ValueBytes>> {
        self.ctx.get(
            self.shared.store.as_ref(),
            collection,
            key,
            ReadAccess {
                transparent: options.is_transparent(),
                watch: !options.is_dont_watch(),
            },
        )
    }

    /// Stage a put.
    pub fn put(&mut self, collection: CollectionId, key: Key, value: &[u8]) -> Result<()> {
        self.ctx.put(collection, key, ValueBytes::from(value))
    }

    /// Stage a delete.
    pub fn delete(&mut self, collection: CollectionId, key: Key) -> Result<()> {
        self.ctx.delete(collection, key)
    }

    /// Bounded ascending scan merged with this transaction's staged
    /// writes.
    pub fn scan(
        &mut self,
        collection: CollectionId,
        min_key: Key,
        limit: usize,
    ) -> Result<Vec<(Key, u32)>> {
        self.ctx
            .scan(self.shared.store.as_ref(), collection, min_key, limit)
    }

    /// Commit atomically. On success the commit sequence is returned
    /// and the handle becomes invalid until [`Transaction::reset`].
    /// On `conflict` — and any other error — staged state survives
    /// for a retry.
    pub fn commit(&mut self) -> Result<Sequence> {
        let sequence = self
            .shared
            .manager
            .commit(&mut self.ctx, self.shared.store.as_ref())?;
        self.release_pin();
        Ok(sequence)
    }

    /// Discard staged state. The handle may be reset and reused.
    pub fn abort(&mut self) {
        self.ctx.abort();
        self.release_pin();
        debug!(txn_id = self.ctx.txn_id, "transaction aborted");
    }

    /// Re-arm at a fresh snapshot. After a failed commit this is the
    /// retry path: staged state is still present and revalidates
    /// against the new snapshot.
    pub fn reset(&mut self) {
        let pinned = self.shared.store.snapshot_acquire();
        self.release_pin();
        self.pinned = Some(pinned);
        self.ctx.reset(pinned);
    }

    fn release_pin(&mut self) {
        if let Some(pinned) = self.pinned.take() {
            self.shared.store.snapshot_release(pinned);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.release_pin();
        self.shared.manager.release();
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.ctx.txn_id)
            .field("snapshot", &self.ctx.snapshot())
            .field("status", &self.ctx.status())
            .field("staged_writes", &self.ctx.staged_writes())
            .field("watched_reads", &self.ctx.watched_reads())
            .finish()
    }
}
