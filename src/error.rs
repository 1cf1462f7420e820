//! Crate-wide error taxonomy
use std::io;
use thiserror::Error;

/// A `Result` type carrying the pool error taxonomy
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while working with a pool
///
/// Pool-level failures (`AlreadyExists`, `NotFound`, `InvalidSize`,
/// `LayoutMismatch`, `Corrupted`, `IOFailure`) surface from [`Pool::create`]
/// and [`Pool::open`] and are always fatal to that call; no partially
/// initialized pool is ever returned. The remaining variants surface from
/// dereferencing and transactional operations, and inside a transaction any
/// of them triggers a full rollback before propagating to the caller.
///
/// [`Pool::create`]: ../struct.Pool.html#method.create
/// [`Pool::open`]: ../struct.Pool.html#method.open
#[derive(Debug, Error)]
pub enum Error {
    /// The pool file already exists and `create` refuses to clobber it
    #[error("pool file already exists: {0}")]
    AlreadyExists(String),

    /// The pool file does not exist
    #[error("pool file not found: {0}")]
    NotFound(String),

    /// Requested pool size is below the minimum viable size
    #[error("pool size {size} below minimum of {min} bytes")]
    InvalidSize { size: u64, min: u64 },

    /// The stored layout identity differs from the requested one
    #[error("pool layout mismatch: stored `{stored}`, requested `{requested}`")]
    LayoutMismatch { stored: String, requested: String },

    /// A consistency check on the pool image failed
    #[error("pool image is corrupted: {0}")]
    Corrupted(&'static str),

    /// An underlying filesystem operation failed
    #[error("pool I/O failure")]
    IOFailure(#[from] io::Error),

    /// The owning pool has been closed or detached
    #[error("pool is closed")]
    PoolClosed,

    /// Dereference of a null persistent pointer
    #[error("null persistent pointer dereference")]
    NullDereference,

    /// An offset or index fell outside the addressed region
    #[error("persistent access out of bounds")]
    OutOfBounds,

    /// A persistent pointer was used against a pool other than its origin
    #[error("persistent pointer belongs to a foreign pool")]
    ForeignPool,

    /// The pool's free space (or the journal arena) is exhausted
    #[error("pool out of memory")]
    OutOfMemory,

    /// A transactional operation ran outside an active transaction scope
    #[error("operation requires an active transaction")]
    NotInTransaction,

    /// Deallocation of memory that is not currently allocated
    #[error("invalid free of persistent memory")]
    InvalidFree,
}
