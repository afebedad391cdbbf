//! Pinned snapshots over the live store
//!
//! A snapshot does not clone anything: it reads through the live
//! store with its sequence as the visibility bound, and pins that
//! sequence in the [`SnapshotTracker`] so version reclamation never
//! drops an entry the snapshot could still observe. Dropping the
//! snapshot releases the pin.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use lattice_core::{CollectionId, Key, Result, Sequence, SnapshotView, Storage, VersionedValue};

use crate::store::MemStore;

/// Refcounted registry of pinned snapshot sequences
///
/// The oldest pinned sequence is the reclamation horizon: versions
/// only a younger reader could observe are safe to drop.
#[derive(Debug, Default)]
pub struct SnapshotTracker {
    pins: Mutex<BTreeMap<Sequence, usize>>,
}

impl SnapshotTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `sequence`. Pins are counted, so the same sequence may be
    /// pinned by several snapshots.
    pub fn pin(&self, sequence: Sequence) {
        *self.pins.lock().entry(sequence).or_insert(0) += 1;
    }

    /// Release one pin on `sequence`. Releasing a sequence that was
    /// never pinned is a caller bug and is ignored.
    pub fn unpin(&self, sequence: Sequence) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&sequence);
            }
        }
    }

    /// The oldest sequence any live snapshot is pinned at.
    pub fn oldest_pinned(&self) -> Option<Sequence> {
        self.pins.lock().keys().next().copied()
    }

    /// Number of live pins.
    pub fn live_count(&self) -> usize {
        self.pins.lock().values().sum()
    }
}

/// A sequence-bounded read view over a [`MemStore`]
///
/// Reads through the live store; writes committed after the pin
/// sequence are invisible. The pin is released on drop.
pub struct PinnedSnapshot {
    store: Arc<MemStore>,
    sequence: Sequence,
}

impl PinnedSnapshot {
    pub(crate) fn new(store: Arc<MemStore>, sequence: Sequence) -> Self {
        PinnedSnapshot { store, sequence }
    }
}

impl SnapshotView for PinnedSnapshot {
    fn get(&self, collection: CollectionId, key: Key) -> Result<Option<VersionedValue>> {
        self.store.get_at(collection, key, self.sequence)
    }

    fn scan(
        &self,
        collection: CollectionId,
        min_key: Key,
        limit: usize,
    ) -> Result<Vec<(Key, u32)>> {
        self.store.scan(collection, min_key, limit, self.sequence)
    }

    fn sequence(&self) -> Sequence {
        self.sequence
    }
}

impl Drop for PinnedSnapshot {
    fn drop(&mut self) {
        self.store.snapshot_release(self.sequence);
    }
}
