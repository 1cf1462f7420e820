//! Software transactional memory APIs

mod journal;
mod log;

pub use journal::Journal;
pub use log::TxState;

pub(crate) use journal::recover;

use crate::alloc::Pool;
use crate::error::Result;

/// Atomically executes `body` against `pool`
///
/// See [`Pool::transaction()`](../struct.Pool.html#method.transaction) for
/// more details.
pub fn transaction<T, F>(pool: &Pool, body: F) -> Result<T>
where
    F: FnOnce(&Journal) -> Result<T>,
{
    pool.transaction(body)
}
