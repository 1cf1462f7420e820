//! The journal object for keeping undo logs
use crate::alloc::Pool;
use crate::error::{Error, Result};
use crate::ll;
use crate::log;
use crate::stm::log::{entry_size, scan, TxState};
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::ptr;

/// A transaction scope's undo log handle
///
/// A `Journal` cannot be constructed directly; [`Pool::transaction`] creates
/// one and passes a reference to the body closure. Every mutation of pool
/// memory takes that reference explicitly -- [`Pool::deref_mut`],
/// [`Pool::alloc`], and [`Pool::dealloc`] all require it -- so a write
/// outside an active transaction is unrepresentable rather than merely
/// checked at run time.
///
/// Before a byte range is first overwritten inside the outermost scope, the
/// journal appends a `(src, len, pre-image)` record to a persistent arena in
/// the pool and makes it durable; the record's visibility is controlled by a
/// single persistent tail cursor, advanced only after the record is on
/// stable storage. Redundant overwrites of a range already captured in the
/// same scope append nothing. On abort the captured records are replayed
/// backwards, newest first; on commit the tail is reset to zero, which is
/// the transaction's single atomic commit point.
///
/// Savepoint-style nesting is available through [`nested`]: an inner scope
/// that fails replays only its own suffix of the log, while an inner commit
/// stays provisional until the outermost scope commits.
///
/// [`Pool::transaction`]: ../struct.Pool.html#method.transaction
/// [`Pool::deref_mut`]: ../struct.Pool.html#method.deref_mut
/// [`Pool::alloc`]: ../struct.Pool.html#method.alloc
/// [`Pool::dealloc`]: ../struct.Pool.html#method.dealloc
/// [`nested`]: #method.nested
pub struct Journal<'a> {
    pool: &'a Pool,
    state: Cell<TxState>,
    depth: Cell<usize>,

    /// Ranges captured so far, as `(off, len, log tail at capture)`. Dedup
    /// is per scope: a range first captured by an enclosing scope is
    /// captured again on first touch inside a nested one, so a savepoint
    /// rollback can restore the savepoint state rather than the outermost
    /// pre-image.
    logged: RefCell<Vec<(u64, u64, u64)>>,

    /// Log tail at entry to the innermost active scope
    scope_start: Cell<u64>,

    /// Ranges to flush durably at commit
    dirty: RefCell<Vec<(u64, u64)>>,

    /// Deallocations deferred to outer commit
    frees: RefCell<Vec<u64>>,
}

/// Volatile marks taken at a savepoint: log tail plus the lengths of the
/// three volatile lists
type Savepoint = (u64, usize, usize, usize);

impl<'a> Journal<'a> {
    pub(crate) fn start(pool: &'a Pool) -> Result<Self> {
        pool.base()?;
        assert_eq!(
            pool.tx_depth(),
            0,
            "a transaction is already active on this pool handle; use Journal::nested"
        );
        // Recovery on open guarantees an empty journal between transactions.
        if pool.journal_tail()? != 0 {
            return Err(Error::Corrupted("undo log not empty at transaction start"));
        }
        pool.begin_tx();
        Ok(Self {
            pool,
            state: Cell::new(TxState::Uncommitted),
            depth: Cell::new(1),
            scope_start: Cell::new(0),
            logged: RefCell::new(Vec::new()),
            dirty: RefCell::new(Vec::new()),
            frees: RefCell::new(Vec::new()),
        })
    }

    /// Returns the state of the current scope
    pub fn state(&self) -> TxState {
        self.state.get()
    }

    /// Returns the nesting depth of the current scope (outermost is 1)
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    #[inline]
    pub(crate) fn pool_ptr(&self) -> *const Pool {
        self.pool
    }

    /// Bytes currently occupied in the persistent journal arena
    pub(crate) fn log_bytes_used(&self) -> Result<u64> {
        self.pool.journal_tail()
    }

    /// Runs `body` as a savepoint-style nested scope
    ///
    /// A failure (error return or panic) of the inner scope replays only the
    /// writes made since the savepoint and leaves the outer scope running. A
    /// success keeps the inner writes in the outer log, so a later abort of
    /// any ancestor undoes them as well.
    pub fn nested<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&Journal) -> Result<T>,
    {
        if self.state.get() != TxState::Uncommitted {
            return Err(Error::NotInTransaction);
        }
        let mark: Savepoint = (
            self.pool.journal_tail()?,
            self.logged.borrow().len(),
            self.dirty.borrow().len(),
            self.frees.borrow().len(),
        );
        let enclosing = self.scope_start.replace(mark.0);
        self.depth.set(self.depth.get() + 1);
        let res = catch_unwind(AssertUnwindSafe(|| body(self)));
        self.depth.set(self.depth.get() - 1);
        self.scope_start.set(enclosing);
        match res {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => {
                self.rollback_to(mark)?;
                Err(e)
            }
            Err(payload) => {
                let _ = self.rollback_to(mark);
                resume_unwind(payload)
            }
        }
    }

    /// Captures the pre-image of `off..off + len` unless the range is
    /// already covered by an earlier capture in the current scope
    ///
    /// The record is made durable before the tail cursor advances, so the
    /// caller may overwrite the range the moment this returns.
    pub(crate) fn log_range(&self, off: u64, len: u64) -> Result<()> {
        if self.state.get() != TxState::Uncommitted || self.pool.tx_depth() == 0 {
            return Err(Error::NotInTransaction);
        }
        if len == 0 {
            return Ok(());
        }
        self.dirty.borrow_mut().push((off, len));
        // Only captures taken in the current scope suppress a fresh one: an
        // enclosing scope's capture predates the savepoint, and a savepoint
        // rollback replays nothing before it.
        let scope = self.scope_start.get();
        if self
            .logged
            .borrow()
            .iter()
            .any(|&(o, l, at)| at >= scope && o <= off && off + len <= o + l)
        {
            return Ok(());
        }

        let base = self.pool.base()?;
        let (data_off, cap) = self.pool.journal_geometry();
        let tail = self.pool.journal_tail()?;
        if tail + entry_size(len) > cap {
            return Err(Error::OutOfMemory);
        }
        log!(BrightCyan, "LOG", "({:>6x}:{:<6x}) = {:<6}", off, off + len - 1, len);
        unsafe {
            let at = base.add((data_off + tail) as usize);
            ptr::write_unaligned(at as *mut u64, off);
            ptr::write_unaligned(at.add(8) as *mut u64, len);
            ptr::copy_nonoverlapping(
                base.add(off as usize) as *const u8,
                at.add(16),
                len as usize,
            );
            ll::persist(at, entry_size(len) as usize, false);
        }
        self.pool.set_journal_tail(tail + entry_size(len))?;
        self.logged.borrow_mut().push((off, len, tail));
        Ok(())
    }

    /// Queues a freshly written range for the commit-time durability flush
    pub(crate) fn mark_dirty(&self, off: u64, len: u64) {
        if len > 0 {
            self.dirty.borrow_mut().push((off, len));
        }
    }

    /// Defers the free of the block holding `payload_off` to outer commit
    ///
    /// Freed blocks must not be reused while the transaction can still
    /// abort, otherwise a reuse would clobber the dead object's bytes with
    /// unlogged data.
    pub(crate) fn defer_free(&self, payload_off: u64) -> Result<()> {
        if self.state.get() != TxState::Uncommitted {
            return Err(Error::NotInTransaction);
        }
        if self.frees.borrow().contains(&payload_off) {
            return Err(Error::InvalidFree);
        }
        self.frees.borrow_mut().push(payload_off);
        Ok(())
    }

    /// Commits the outermost scope
    ///
    /// Performs deferred frees, flushes every dirty range durably, then
    /// truncates the log. The tail reset is the commit point: a crash any
    /// time before it rolls the whole transaction back on reopen, a crash
    /// after it changes nothing.
    pub(crate) fn commit(&self) -> Result<()> {
        if self.state.get() != TxState::Uncommitted {
            return Err(Error::NotInTransaction);
        }
        let frees = self.frees.take();
        for off in frees {
            self.pool.perform_free(off, self)?;
        }

        let base = self.pool.base()?;
        let dirty = self.dirty.take();
        for &(off, len) in &dirty {
            unsafe { ll::persist(base.add(off as usize), len as usize, false) };
        }
        ll::sfence();

        self.pool.set_journal_tail(0)?;
        self.logged.borrow_mut().clear();
        self.state.set(TxState::Committed);
        self.pool.end_tx();
        log!(BrightGreen, "COMMIT", "{} range(s) flushed", dirty.len());
        Ok(())
    }

    /// Aborts the outermost scope, restoring every captured pre-image
    ///
    /// The scope ends and the pool handle is released even when the replay
    /// itself fails, so a later transaction can still start.
    pub(crate) fn rollback(&self) -> Result<()> {
        if self.state.get() != TxState::Uncommitted {
            return Err(Error::NotInTransaction);
        }
        let res = self.replay_to(0);
        self.logged.borrow_mut().clear();
        self.dirty.borrow_mut().clear();
        self.frees.borrow_mut().clear();
        self.state.set(TxState::Aborted);
        self.pool.end_tx();
        res
    }

    fn rollback_to(&self, (tail, logged, dirty, frees): Savepoint) -> Result<()> {
        self.replay_to(tail)?;
        self.logged.borrow_mut().truncate(logged);
        self.dirty.borrow_mut().truncate(dirty);
        self.frees.borrow_mut().truncate(frees);
        Ok(())
    }

    /// Replays the log suffix past `watermark` backwards and truncates it
    fn replay_to(&self, watermark: u64) -> Result<()> {
        let base = self.pool.base()?;
        let (data_off, _) = self.pool.journal_geometry();
        let tail = self.pool.journal_tail()?;
        let entries =
            unsafe { scan(base, data_off, watermark, tail, self.pool.len() as u64)? };
        for e in entries.iter().rev() {
            log!(BrightRed, "ROLLBACK", "({:>6x}:{:<6x}) = {:<6}", e.src, e.src + e.len - 1, e.len);
            unsafe {
                ptr::copy_nonoverlapping(
                    base.add(e.data as usize) as *const u8,
                    base.add(e.src as usize),
                    e.len as usize,
                );
                ll::persist(base.add(e.src as usize), e.len as usize, false);
            }
        }
        ll::sfence();
        self.pool.set_journal_tail(watermark)
    }
}

/// Replays and truncates a non-empty journal left behind by a crash
///
/// Called while opening a pool, before the pool is exposed. Returns true if
/// there was anything to recover.
///
/// # Safety
///
/// `base` must be the live mapping base and the journal geometry must have
/// been validated against `pool_len`.
pub(crate) unsafe fn recover(
    base: *mut u8,
    data_off: u64,
    cap: u64,
    pool_len: u64,
) -> Result<bool> {
    let tail = ptr::read(base.add((data_off - 8) as usize) as *const u64);
    if tail == 0 {
        return Ok(false);
    }
    if tail > cap {
        return Err(Error::Corrupted("undo-log tail out of range"));
    }
    let entries = scan(base, data_off, 0, tail, pool_len)?;
    for e in entries.iter().rev() {
        ptr::copy_nonoverlapping(
            base.add(e.data as usize) as *const u8,
            base.add(e.src as usize),
            e.len as usize,
        );
        ll::persist(base.add(e.src as usize), e.len as usize, false);
    }
    ll::sfence();
    ptr::write(base.add((data_off - 8) as usize) as *mut u64, 0);
    ll::persist(base.add((data_off - 8) as usize), 8, true);
    Ok(true)
}
