//! Option flags for the batch and transaction entry points
//!
//! Every entry point takes a small options value built over the
//! shared flag bits. Unknown bits are rejected up front so a flag
//! typo fails loudly instead of silently changing semantics.

use lattice_core::types::{
    OptionFlags, OPTION_DEFAULT, OPTION_KNOWN_MASK, OPTION_READ_TRANSPARENT, OPTION_TXN_DONT_WATCH,
    OPTION_WRITE_FLUSH,
};
use lattice_core::{LatticeError, Result, Sequence};

fn reject_unknown(flags: OptionFlags) -> Result<OptionFlags> {
    if flags & !OPTION_KNOWN_MASK != 0 {
        return Err(LatticeError::args_invalid(format!(
            "unknown option bits {:#x}",
            flags & !OPTION_KNOWN_MASK
        )));
    }
    Ok(flags)
}

/// Options for `read` and `scan`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    flags: OptionFlags,
}

impl ReadOptions {
    /// Default read behavior: snapshot reads, watched inside
    /// transactions.
    pub fn new() -> Self {
        ReadOptions {
            flags: OPTION_DEFAULT,
        }
    }

    /// Build from raw flag bits, rejecting unknown ones.
    pub fn from_flags(flags: OptionFlags) -> Result<Self> {
        Ok(ReadOptions {
            flags: reject_unknown(flags)?,
        })
    }

    /// Bypass the transaction snapshot and read latest committed
    /// state.
    pub fn transparent(mut self) -> Self {
        self.flags |= OPTION_READ_TRANSPARENT;
        self
    }

    /// Keep this operation's reads out of the watch set.
    pub fn dont_watch(mut self) -> Self {
        self.flags |= OPTION_TXN_DONT_WATCH;
        self
    }

    pub(crate) fn is_transparent(&self) -> bool {
        self.flags & OPTION_READ_TRANSPARENT != 0
    }

    pub(crate) fn is_dont_watch(&self) -> bool {
        self.flags & OPTION_TXN_DONT_WATCH != 0
    }
}

/// Options for `write`
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    flags: OptionFlags,
}

impl WriteOptions {
    /// Default write behavior.
    pub fn new() -> Self {
        WriteOptions {
            flags: OPTION_DEFAULT,
        }
    }

    /// Build from raw flag bits, rejecting unknown ones.
    pub fn from_flags(flags: OptionFlags) -> Result<Self> {
        Ok(WriteOptions {
            flags: reject_unknown(flags)?,
        })
    }

    /// Request a sync to durable storage. The in-memory backend
    /// accepts the hint and has nothing to sync.
    pub fn flush(mut self) -> Self {
        self.flags |= OPTION_WRITE_FLUSH;
        self
    }

    pub(crate) fn is_flush(&self) -> bool {
        self.flags & OPTION_WRITE_FLUSH != 0
    }
}

/// Options for `begin_transaction`
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionOptions {
    flags: OptionFlags,
    at_sequence: Option<Sequence>,
}

impl TransactionOptions {
    /// Default transaction behavior: latest snapshot, watched reads.
    pub fn new() -> Self {
        TransactionOptions {
            flags: OPTION_DEFAULT,
            at_sequence: None,
        }
    }

    /// Suppress watch-set insertion for every read in the
    /// transaction, making all of them read-committed.
    pub fn dont_watch(mut self) -> Self {
        self.flags |= OPTION_TXN_DONT_WATCH;
        self
    }

    /// Request an explicit snapshot sequence instead of "latest".
    pub fn at_sequence(mut self, sequence: Sequence) -> Self {
        self.at_sequence = Some(sequence);
        self
    }

    pub(crate) fn watch_by_default(&self) -> bool {
        self.flags & OPTION_TXN_DONT_WATCH == 0
    }

    pub(crate) fn requested_sequence(&self) -> Option<Sequence> {
        self.at_sequence
    }
}
