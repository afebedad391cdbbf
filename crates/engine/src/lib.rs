//! Database engine for Lattice
//!
//! This crate ties the lower layers together:
//! - `Database`: open/close, collection lifecycle, status
//! - Batch dispatch: strided read/write/scan task batches resolved
//!   into backend calls and materialized into arena tapes
//! - `Transaction`: the public handle over the optimistic
//!   concurrency layer, with snapshot pinning and live accounting

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod database;
pub mod options;

pub use batch::{ReadTasks, ScanTasks, WriteTasks};
pub use database::{Database, Status, Transaction};
pub use options::{ReadOptions, TransactionOptions, WriteOptions};

// Callers assembling batches and tapes need these without a second
// dependency line.
pub use lattice_core::{
    Arena, CollectionId, ErrorKind, Key, LatticeError, ReadTape, Result, ScanTape, Sequence,
    StridedSlice, ValueBytes, KEY_UNKNOWN, LEN_MISSING,
};
