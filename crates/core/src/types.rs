//! Identity types and sentinels shared across the engine
//!
//! Keys and sequence numbers are plain `u64`s: they cross the batch
//! API as flat arrays and gain nothing from wrapping. Collection
//! handles are a newtype because their only valid source is the
//! registry.

use std::sync::Arc;

/// A key within one collection. Unsigned 64-bit; byte order for
/// backends that need ordered byte keys is defined in [`crate::codec`].
pub type Key = u64;

/// A global commit sequence number. Strictly increasing per
/// successful commit; reads observe all writes with a commit number
/// at or below their snapshot.
pub type Sequence = u64;

/// Sentinel key meaning "no key" in task slots that allow absence.
pub const KEY_UNKNOWN: Key = u64::MAX;

/// Sentinel length marking an absent entry in a read tape. Distinct
/// from a present zero-length value.
pub const LEN_MISSING: u32 = u32::MAX;

/// Reserved edge identifier denoting an anonymous edge in the graph
/// overlay. Callers may not use it as a real edge id.
pub const EDGE_ID_ANONYMOUS: u64 = u64::MAX;

/// Value payloads are shared, immutable byte blobs so snapshot reads
/// and tape materialization never copy the store's buffers twice.
pub type ValueBytes = Arc<[u8]>;

/// Stable handle for a named collection
///
/// Valid from `collection_open` until the collection is dropped or the
/// database is closed. The default collection always exists and is
/// what an absent collections array in a batch refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionId(u64);

impl CollectionId {
    /// The default collection, present from open and never droppable.
    pub const DEFAULT: CollectionId = CollectionId(0);

    /// Construct a handle from its raw value. Only the registry mints
    /// new handles; this exists for tests and wire layers.
    pub fn from_raw(raw: u64) -> Self {
        CollectionId(raw)
    }

    /// The raw handle value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is the default collection.
    pub fn is_default(&self) -> bool {
        self.0 == 0
    }
}

impl Default for CollectionId {
    fn default() -> Self {
        CollectionId::DEFAULT
    }
}

impl std::fmt::Display for CollectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_default() {
            write!(f, "collection(default)")
        } else {
            write!(f, "collection({})", self.0)
        }
    }
}

/// A committed value together with the sequence number that wrote it
///
/// `value` of `None` is a tombstone: the key was deleted at
/// `sequence`. Readers treat tombstones as absent; the sequence still
/// matters for watch-set bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    /// The payload, or `None` for a tombstone.
    pub value: Option<ValueBytes>,
    /// The commit sequence that published this version.
    pub sequence: Sequence,
}

impl VersionedValue {
    /// Whether this version is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Length of the payload, or [`LEN_MISSING`] for a tombstone.
    pub fn payload_len(&self) -> u32 {
        match &self.value {
            Some(bytes) => bytes.len() as u32,
            None => LEN_MISSING,
        }
    }
}

/// Option flags accepted by the batch and transaction entry points
///
/// Flags compose as a bit set; unknown bits are rejected as
/// `args_invalid` by the layers that consume them.
pub type OptionFlags = u32;

/// No options requested.
pub const OPTION_DEFAULT: OptionFlags = 0;

/// Sync to durable storage on commit/write. The in-memory backend
/// accepts and ignores it; persistent backends map it to an fsync.
pub const OPTION_WRITE_FLUSH: OptionFlags = 1 << 0;

/// Read through the backend's latest committed state, bypassing the
/// transaction snapshot. Read-your-writes staging still applies.
pub const OPTION_READ_TRANSPARENT: OptionFlags = 1 << 1;

/// Suppress watch-set insertion for the current operation, making it
/// read-committed rather than serializable.
pub const OPTION_TXN_DONT_WATCH: OptionFlags = 1 << 2;

/// All bits currently defined; anything outside is unknown.
pub const OPTION_KNOWN_MASK: OptionFlags =
    OPTION_WRITE_FLUSH | OPTION_READ_TRANSPARENT | OPTION_TXN_DONT_WATCH;
