//! Strided task batches and their dispatch into the backend
//!
//! Batches arrive as structure-of-arrays views: one [`StridedSlice`]
//! per argument, stride 0 broadcasting a single element, an absent
//! collections array selecting the default collection for every
//! task. Resolution happens fully before any mutation, so a batch
//! that fails validation leaves the database untouched.
//!
//! Reads and scans come in two shapes: a single-task fast path that
//! issues one direct backend call and writes one tape entry, and a
//! multi-task path that gathers resolutions, hits the backend's
//! multi-operation entry point under one pinned snapshot, and
//! scatters results into the arena tape.

use lattice_core::codec::KEY_BYTES;
use lattice_core::{
    Arena, CollectionId, Key, LatticeError, ReadTape, Result, ScanTape, Sequence, Storage,
    StridedSlice, ValueBytes, LEN_MISSING, WriteOp,
};
use lattice_core::arena::ScanTaskSpan;
use lattice_concurrency::{ReadAccess, TransactionContext, TransactionManager, TransactionStatus};

use crate::options::{ReadOptions, WriteOptions};

fn check_task_width(name: &str, width: usize, count: usize) -> Result<()> {
    if width != count {
        return Err(LatticeError::args_invalid(format!(
            "{name} array covers {width} tasks, batch has {count}"
        )));
    }
    Ok(())
}

/// A batch of point-read tasks
#[derive(Debug, Clone, Copy)]
pub struct ReadTasks<'a> {
    collections: StridedSlice<'a, CollectionId>,
    keys: StridedSlice<'a, Key>,
    count: usize,
}

impl<'a> ReadTasks<'a> {
    /// One task per key, all in the default collection.
    pub fn new(keys: &'a [Key]) -> Self {
        ReadTasks {
            collections: StridedSlice::absent(keys.len()),
            keys: StridedSlice::dense(keys),
            count: keys.len(),
        }
    }

    /// Assemble from explicit strided views.
    pub fn from_parts(
        collections: StridedSlice<'a, CollectionId>,
        keys: StridedSlice<'a, Key>,
    ) -> Result<Self> {
        let count = keys.len();
        check_task_width("collections", collections.len(), count)?;
        Ok(ReadTasks {
            collections,
            keys,
            count,
        })
    }

    /// Route every task at the given collections view.
    pub fn with_collections(
        mut self,
        collections: StridedSlice<'a, CollectionId>,
    ) -> Result<Self> {
        check_task_width("collections", collections.len(), self.count)?;
        self.collections = collections;
        Ok(self)
    }

    /// Number of tasks in the batch.
    pub fn count(&self) -> usize {
        self.count
    }

    fn resolve(&self, index: usize) -> Result<(CollectionId, Key)> {
        let key = *self
            .keys
            .get(index)
            .ok_or_else(|| LatticeError::args_invalid("read task without a key"))?;
        Ok((self.collections.get_or(index, CollectionId::DEFAULT), key))
    }
}

/// A batch of write tasks (puts and deletes)
///
/// Each task's payload is `values[i][offsets[i] .. offsets[i] +
/// lengths[i]]`. An absent values array, a `None` value slot, or a
/// length of [`LEN_MISSING`] stages a tombstone.
#[derive(Debug, Clone, Copy)]
pub struct WriteTasks<'a> {
    collections: StridedSlice<'a, CollectionId>,
    keys: StridedSlice<'a, Key>,
    values: StridedSlice<'a, Option<&'a [u8]>>,
    offsets: StridedSlice<'a, u32>,
    lengths: StridedSlice<'a, u32>,
    count: usize,
}

impl<'a> WriteTasks<'a> {
    /// One put per key in the default collection, payloads taken
    /// whole. `None` slots stage tombstones.
    pub fn puts(keys: &'a [Key], values: &'a [Option<&'a [u8]>]) -> Result<Self> {
        check_task_width("values", values.len(), keys.len())?;
        Ok(WriteTasks {
            collections: StridedSlice::absent(keys.len()),
            keys: StridedSlice::dense(keys),
            values: StridedSlice::dense(values),
            offsets: StridedSlice::absent(keys.len()),
            lengths: StridedSlice::absent(keys.len()),
            count: keys.len(),
        })
    }

    /// One tombstone per key in the default collection.
    pub fn deletes(keys: &'a [Key]) -> Self {
        WriteTasks {
            collections: StridedSlice::absent(keys.len()),
            keys: StridedSlice::dense(keys),
            values: StridedSlice::absent(keys.len()),
            offsets: StridedSlice::absent(keys.len()),
            lengths: StridedSlice::absent(keys.len()),
            count: keys.len(),
        }
    }

    /// Assemble from explicit strided views.
    pub fn from_parts(
        collections: StridedSlice<'a, CollectionId>,
        keys: StridedSlice<'a, Key>,
        values: StridedSlice<'a, Option<&'a [u8]>>,
        offsets: StridedSlice<'a, u32>,
        lengths: StridedSlice<'a, u32>,
    ) -> Result<Self> {
        let count = keys.len();
        check_task_width("collections", collections.len(), count)?;
        check_task_width("values", values.len(), count)?;
        check_task_width("offsets", offsets.len(), count)?;
        check_task_width("lengths", lengths.len(), count)?;
        Ok(WriteTasks {
            collections,
            keys,
            values,
            offsets,
            lengths,
            count,
        })
    }

    /// Route every task at the given collections view.
    pub fn with_collections(
        mut self,
        collections: StridedSlice<'a, CollectionId>,
    ) -> Result<Self> {
        check_task_width("collections", collections.len(), self.count)?;
        self.collections = collections;
        Ok(self)
    }

    /// Slice payloads with explicit offsets.
    pub fn with_offsets(mut self, offsets: StridedSlice<'a, u32>) -> Result<Self> {
        check_task_width("offsets", offsets.len(), self.count)?;
        self.offsets = offsets;
        Ok(self)
    }

    /// Slice payloads with explicit lengths.
    pub fn with_lengths(mut self, lengths: StridedSlice<'a, u32>) -> Result<Self> {
        check_task_width("lengths", lengths.len(), self.count)?;
        self.lengths = lengths;
        Ok(self)
    }

    /// Number of tasks in the batch.
    pub fn count(&self) -> usize {
        self.count
    }

    fn resolve(&self, index: usize) -> Result<(CollectionId, Key, Option<&'a [u8]>)> {
        let key = *self
            .keys
            .get(index)
            .ok_or_else(|| LatticeError::args_invalid("write task without a key"))?;
        let collection = self.collections.get_or(index, CollectionId::DEFAULT);

        let base = match self.values.get(index) {
            None | Some(None) => return Ok((collection, key, None)),
            Some(Some(base)) => *base,
        };
        let offset = self.offsets.get_or(index, 0) as usize;
        let length = match self.lengths.get(index) {
            Some(&LEN_MISSING) => return Ok((collection, key, None)),
            Some(&length) => length as usize,
            None => base.len().checked_sub(offset).ok_or_else(|| {
                LatticeError::args_invalid(format!(
                    "write task {index}: offset {offset} past the value buffer"
                ))
            })?,
        };
        if length >= LEN_MISSING as usize {
            return Err(LatticeError::args_invalid(format!(
                "write task {index}: value length collides with the missing-length sentinel"
            )));
        }
        let payload = base
            .get(offset..offset + length)
            .ok_or_else(|| {
                LatticeError::args_invalid(format!(
                    "write task {index}: range {offset}..{} past the value buffer",
                    offset + length
                ))
            })?;
        Ok((collection, key, Some(payload)))
    }
}

/// A batch of bounded range-scan tasks
#[derive(Debug, Clone, Copy)]
pub struct ScanTasks<'a> {
    collections: StridedSlice<'a, CollectionId>,
    min_keys: StridedSlice<'a, Key>,
    lengths: StridedSlice<'a, u32>,
    count: usize,
}

impl<'a> ScanTasks<'a> {
    /// One task per `(min_key, length)` pair in the default
    /// collection.
    pub fn new(min_keys: &'a [Key], lengths: &'a [u32]) -> Result<Self> {
        check_task_width("lengths", lengths.len(), min_keys.len())?;
        Ok(ScanTasks {
            collections: StridedSlice::absent(min_keys.len()),
            min_keys: StridedSlice::dense(min_keys),
            lengths: StridedSlice::dense(lengths),
            count: min_keys.len(),
        })
    }

    /// Assemble from explicit strided views.
    pub fn from_parts(
        collections: StridedSlice<'a, CollectionId>,
        min_keys: StridedSlice<'a, Key>,
        lengths: StridedSlice<'a, u32>,
    ) -> Result<Self> {
        let count = min_keys.len();
        check_task_width("collections", collections.len(), count)?;
        check_task_width("lengths", lengths.len(), count)?;
        Ok(ScanTasks {
            collections,
            min_keys,
            lengths,
            count,
        })
    }

    /// Route every task at the given collections view.
    pub fn with_collections(
        mut self,
        collections: StridedSlice<'a, CollectionId>,
    ) -> Result<Self> {
        check_task_width("collections", collections.len(), self.count)?;
        self.collections = collections;
        Ok(self)
    }

    /// Number of tasks in the batch.
    pub fn count(&self) -> usize {
        self.count
    }

    fn resolve(&self, index: usize) -> Result<(CollectionId, Key, usize)> {
        let min_key = *self
            .min_keys
            .get(index)
            .ok_or_else(|| LatticeError::args_invalid("scan task without a minimum key"))?;
        let length = *self
            .lengths
            .get(index)
            .ok_or_else(|| LatticeError::args_invalid("scan task without a length"))?;
        Ok((
            self.collections.get_or(index, CollectionId::DEFAULT),
            min_key,
            length as usize,
        ))
    }
}

/// Releases a pinned snapshot when the batch is done, error paths
/// included.
struct PinGuard<'s, S: Storage> {
    store: &'s S,
    sequence: Sequence,
}

impl<'s, S: Storage> PinGuard<'s, S> {
    fn acquire(store: &'s S) -> Self {
        let sequence = store.snapshot_acquire();
        PinGuard { store, sequence }
    }
}

impl<S: Storage> Drop for PinGuard<'_, S> {
    fn drop(&mut self) {
        self.store.snapshot_release(self.sequence);
    }
}

fn push_tape_entry(arena: &mut Arena, value: Option<&[u8]>) -> Result<()> {
    match value {
        Some(bytes) => arena.push_u32_le(bytes.len() as u32).map(|_| ()),
        None => arena.push_u32_le(LEN_MISSING).map(|_| ()),
    }
}

fn read_access(options: ReadOptions) -> ReadAccess {
    ReadAccess {
        transparent: options.is_transparent(),
        watch: !options.is_dont_watch(),
    }
}

/// Resolve a read batch and materialize the result tape.
pub(crate) fn dispatch_read<'a, S: Storage>(
    store: &S,
    txn: Option<&mut TransactionContext>,
    tasks: &ReadTasks<'_>,
    options: ReadOptions,
    arena: &'a mut Arena,
) -> Result<ReadTape<'a>> {
    arena.reset();
    let count = tasks.count();
    let access = read_access(options);

    match txn {
        Some(ctx) => {
            let mut found = Vec::with_capacity(count);
            for index in 0..count {
                let (collection, key) = tasks.resolve(index)?;
                found.push(ctx.get(store, collection, key, access)?);
            }
            for value in &found {
                push_tape_entry(arena, value.as_deref())?;
            }
            for value in found.iter().flatten() {
                arena.push_bytes(value)?;
            }
        }
        None if count == 1 => {
            // Single-task fast path: one direct call, no gathering.
            let (collection, key) = tasks.resolve(0)?;
            let value = store.get(collection, key)?.and_then(|vv| vv.value);
            push_tape_entry(arena, value.as_deref())?;
            if let Some(bytes) = value {
                arena.push_bytes(&bytes)?;
            }
        }
        None => {
            let mut resolved = Vec::with_capacity(count);
            for index in 0..count {
                resolved.push(tasks.resolve(index)?);
            }
            let pin = PinGuard::acquire(store);
            let fetched = store.multi_get(&resolved, pin.sequence)?;
            let found: Vec<Option<ValueBytes>> = fetched
                .into_iter()
                .map(|vv| vv.and_then(|vv| vv.value))
                .collect();
            for value in &found {
                push_tape_entry(arena, value.as_deref())?;
            }
            for value in found.iter().flatten() {
                arena.push_bytes(value)?;
            }
        }
    }

    ReadTape::new(arena.bytes(), count)
}

/// Resolve a write batch and either stage it into a transaction or
/// publish it as one atomic group. Returns the commit sequence for
/// the non-transactional path.
pub(crate) fn dispatch_write<S: Storage>(
    store: &S,
    manager: &TransactionManager,
    txn: Option<&mut TransactionContext>,
    tasks: &WriteTasks<'_>,
    options: WriteOptions,
) -> Result<Option<Sequence>> {
    // The flush hint is accepted everywhere; the in-memory backend
    // simply has nothing to sync.
    let _ = options.is_flush();

    // Resolve the whole batch before staging or publishing anything.
    let mut ops = Vec::with_capacity(tasks.count());
    for index in 0..tasks.count() {
        let (collection, key, payload) = tasks.resolve(index)?;
        ops.push(WriteOp {
            collection,
            key,
            value: payload.map(ValueBytes::from),
        });
    }

    match txn {
        Some(ctx) => {
            if ctx.status() != TransactionStatus::Active {
                return Err(LatticeError::args_invalid(
                    "cannot write through a finished transaction",
                ));
            }
            for op in ops {
                match op.value {
                    Some(value) => ctx.put(op.collection, op.key, value)?,
                    None => ctx.delete(op.collection, op.key)?,
                }
            }
            Ok(None)
        }
        None => Ok(Some(manager.write_group(store, &ops)?)),
    }
}

/// Resolve a scan batch and materialize the key/length tape.
pub(crate) fn dispatch_scan<'a, S: Storage>(
    store: &S,
    mut txn: Option<&mut TransactionContext>,
    tasks: &ScanTasks<'_>,
    options: ReadOptions,
    arena: &'a mut Arena,
) -> Result<ScanTape<'a>> {
    arena.reset();
    let access = read_access(options);
    let mut spans = Vec::with_capacity(tasks.count());

    // Non-transactional tasks share one pinned snapshot so a batch
    // observes a single point in the commit order.
    let pin = match txn {
        Some(_) => None,
        None => Some(PinGuard::acquire(store)),
    };

    for index in 0..tasks.count() {
        let (collection, min_key, length) = tasks.resolve(index)?;
        let rows = match txn.as_mut() {
            Some(ctx) => ctx.scan_with(store, collection, min_key, length, access)?,
            None => {
                let sequence = pin
                    .as_ref()
                    .map(|pin| pin.sequence)
                    .unwrap_or_else(|| store.current_sequence());
                store.scan(collection, min_key, length, sequence)?
            }
        };

        let keys_offset = arena.push_zeroed(length * KEY_BYTES)?;
        let lens_offset = arena.push_zeroed(length * 4)?;
        for (slot, (key, value_len)) in rows.iter().enumerate() {
            arena.patch_key(keys_offset + slot * KEY_BYTES, *key)?;
            arena.patch_u32_le(lens_offset + slot * 4, *value_len)?;
        }
        spans.push(ScanTaskSpan::new(
            keys_offset,
            lens_offset,
            length,
            rows.len(),
        ));
    }

    drop(pin);
    ScanTape::new(arena.bytes(), spans)
}
