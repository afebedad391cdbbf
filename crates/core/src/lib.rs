//! Core layer for the Lattice engine
//!
//! This crate defines everything the upper layers agree on:
//! - Error taxonomy (`LatticeError`, `ErrorKind`)
//! - Key, sequence, and collection identity types with their sentinels
//! - The fixed-width key codec
//! - The `Storage` and `SnapshotView` traits that let backends be
//!   swapped without breaking the concurrency or engine layers
//! - The caller-owned `Arena` and the tape layouts materialized into it
//! - Strided structure-of-arrays views for batch arguments

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod codec;
pub mod error;
pub mod strided;
pub mod traits;
pub mod types;

pub use arena::{Arena, ReadTape, ScanTape};
pub use error::{ErrorKind, LatticeError, Result};
pub use strided::StridedSlice;
pub use traits::{SnapshotView, Storage, WriteOp};
pub use types::{
    CollectionId, Key, Sequence, ValueBytes, VersionedValue, EDGE_ID_ANONYMOUS, KEY_UNKNOWN,
    LEN_MISSING,
};
