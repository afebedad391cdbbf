//! Optimistic concurrency layer for Lattice
//!
//! - `TransactionContext`: snapshot, write set, and watch set of one
//!   in-flight transaction, with read-your-writes semantics
//! - `validate_watch_set`: first-committer-wins conflict detection
//!   folded over the watch set
//! - `TransactionManager`: the single commit serialization point
//!   where validation, sequence assignment, and publication happen
//!   atomically

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod transaction;
pub mod validation;

pub use manager::TransactionManager;
pub use transaction::{ReadAccess, TransactionContext, TransactionStatus};
pub use validation::{validate_watch_set, ValidationOutcome, WatchViolation};
