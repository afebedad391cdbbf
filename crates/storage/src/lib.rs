//! In-memory MVCC storage backend for Lattice
//!
//! - `MemStore`: per-collection B-trees of bounded version chains,
//!   implementing the core `Storage` trait
//! - `PinnedSnapshot` / `SnapshotTracker`: sequence-bounded read views
//!   that pin their sequence against version reclamation
//! - `CollectionRegistry`: name-to-handle table for named collections

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod registry;
pub mod snapshot;
pub mod store;

pub use registry::CollectionRegistry;
pub use snapshot::{PinnedSnapshot, SnapshotTracker};
pub use store::MemStore;
