//! Error types for the Lattice engine
//!
//! A single error enum covers the whole API surface. Every public
//! entry point returns [`Result`]; lower-level failures are translated
//! into one of these kinds at the engine boundary, and no panic ever
//! crosses it.
//!
//! ## Error Classification
//!
//! - **`Conflict`** is temporal: the transaction lost a serialization
//!   race and may succeed after a re-snapshot. It is the only
//!   retryable kind.
//! - **`ArgsInvalid`**, **`NotFound`**, and **`Unsupported`** are
//!   structural: the caller must change its input.
//! - **`Io`** and **`Corruption`** come from the backend; `Corruption`
//!   is fatal for the affected database.

use std::io;
use thiserror::Error;

/// Convenience alias used across all Lattice crates.
pub type Result<T> = std::result::Result<T, LatticeError>;

/// Canonical error kinds
///
/// These map 1:1 onto the variants of [`LatticeError`] and are the
/// stable classification callers should match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller violated an input precondition
    ArgsInvalid,
    /// Requested name or entity is not registered
    NotFound,
    /// Transaction lost the serialization race
    Conflict,
    /// Arena growth or an internal allocation failed
    OutOfMemory,
    /// Backend I/O failure
    Io,
    /// Backend reports a data integrity failure
    Corruption,
    /// Backend lacks the requested capability
    Unsupported,
}

impl ErrorKind {
    /// Stable string form of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ArgsInvalid => "args_invalid",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::OutOfMemory => "out_of_memory",
            ErrorKind::Io => "io",
            ErrorKind::Corruption => "corruption",
            ErrorKind::Unsupported => "unsupported",
        }
    }

    /// Whether an operation failing with this kind may succeed if
    /// simply retried with fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Conflict)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unified error type for all Lattice APIs
#[derive(Debug, Error)]
pub enum LatticeError {
    /// Caller violated an input precondition.
    #[error("invalid argument: {0}")]
    ArgsInvalid(String),

    /// A requested name is not registered.
    #[error("{0} not found")]
    NotFound(String),

    /// The transaction lost a serialization race and must retry
    /// after a re-snapshot.
    #[error("serialization conflict: {0}")]
    Conflict(String),

    /// Arena growth or an internal allocation failed.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Backend I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The backend reported a data integrity failure. Fatal.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// The backend lacks the requested capability.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl LatticeError {
    /// The canonical kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LatticeError::ArgsInvalid(_) => ErrorKind::ArgsInvalid,
            LatticeError::NotFound(_) => ErrorKind::NotFound,
            LatticeError::Conflict(_) => ErrorKind::Conflict,
            LatticeError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            LatticeError::Io(_) => ErrorKind::Io,
            LatticeError::Corruption(_) => ErrorKind::Corruption,
            LatticeError::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    /// Whether the failed operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Shortcut constructor for [`LatticeError::ArgsInvalid`].
    pub fn args_invalid(msg: impl Into<String>) -> Self {
        LatticeError::ArgsInvalid(msg.into())
    }

    /// Shortcut constructor for [`LatticeError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        LatticeError::NotFound(what.into())
    }

    /// Shortcut constructor for [`LatticeError::Conflict`].
    pub fn conflict(msg: impl Into<String>) -> Self {
        LatticeError::Conflict(msg.into())
    }

    /// Shortcut constructor for [`LatticeError::OutOfMemory`].
    pub fn out_of_memory(msg: impl Into<String>) -> Self {
        LatticeError::OutOfMemory(msg.into())
    }

    /// Shortcut constructor for [`LatticeError::Corruption`].
    pub fn corruption(msg: impl Into<String>) -> Self {
        LatticeError::Corruption(msg.into())
    }

    /// Shortcut constructor for [`LatticeError::Unsupported`].
    pub fn unsupported(msg: impl Into<String>) -> Self {
        LatticeError::Unsupported(msg.into())
    }
}
