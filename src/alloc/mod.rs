//! Persistent pool and transactional allocation

pub(crate) mod freelist;
mod guard;
mod pool;

pub use guard::*;
pub use pool::*;
