//! *Spinel* is a crate with an idiomatic persistent memory programming
//! interface. Data objects live in a memory-mapped file (a *pool*) and
//! survive process restarts and power loss. Their entire lifetime --
//! allocation, mutation, and deallocation -- is governed by transactions,
//! so that a crash at any point leaves the pool in either the
//! pre-transaction or the fully-committed state, never a partially-written
//! one.
//!
//! # Programming Model
//!
//! A pool is a file containing a root object and a free-space arena. Objects
//! inside the pool are referenced by [`PPtr`], an offset-based pointer that
//! is only meaningful against its originating pool. All modifications go
//! through a [`Journal`] handle which an active transaction passes to its
//! body closure; the journal captures a pre-image of every byte range before
//! it is first overwritten, and replays those pre-images backwards if the
//! transaction aborts.
//!
//! ```no_run
//! use spinel::{PArray, PPtr, Pool, S_IRWXU};
//!
//! #[derive(Clone, Copy, Default)]
//! struct Root {
//!     seq: PPtr<PArray<f64, 3>>,
//! }
//! unsafe impl spinel::PSafe for Root {}
//!
//! fn main() -> spinel::Result<()> {
//!     let pool = Pool::create::<Root>("foo.pool", "demo", spinel::MIN_POOL_SIZE, S_IRWXU)?;
//!     let root = pool.root::<Root>()?;
//!
//!     pool.transaction(|j| {
//!         let seq = pool.alloc(PArray::new([1.0, 2.0, 3.5]), j)?;
//!         pool.deref_mut(root, j)?.seq = seq;
//!         Ok(())
//!     })?;
//!
//!     let seq = pool.deref(root)?.seq;
//!     assert_eq!(pool.deref(seq)?.front(), &1.0);
//!     pool.close()
//! }
//! ```
//!
//! # Crash Consistency
//!
//! Undo-log entries are made durable before the data they cover is touched,
//! and the commit point is a single 8-byte log truncation. Reopening a pool
//! after a crash replays any leftover log backwards before the pool is
//! exposed, so an interrupted transaction is indistinguishable from one that
//! never ran.
//!
//! # Concurrency
//!
//! A [`Pool`] handle is bound to one thread (`!Sync`); the crate provides
//! atomicity per transaction, not isolation between concurrent transactions.
//! Opening one pool file from several processes at once is unsupported.
//! Dereferencing hands out `RefCell`-style guards, so conflicting borrows of
//! overlapping ranges are caught at run time with a panic.
//!
//! [`PPtr`]: ./ptr/struct.PPtr.html
//! [`Journal`]: ./stm/struct.Journal.html
//! [`Pool`]: ./alloc/struct.Pool.html

pub mod ll;
pub mod ptr;
pub mod stm;
pub mod utils;

mod alloc;
mod array;
mod error;
mod marker;
mod tests;

pub use crate::alloc::{PMut, PRef, Pool, MIN_POOL_SIZE, S_IRUSR, S_IRWXU, S_IWUSR};
pub use crate::array::PArray;
pub use crate::error::{Error, Result};
pub use crate::marker::PSafe;
pub use crate::ptr::PPtr;
pub use crate::stm::{Journal, TxState};
