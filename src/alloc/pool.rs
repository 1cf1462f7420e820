use crate::alloc::guard::{PMut, PRef};
use crate::error::{Error, Result};
use crate::ll;
use crate::log;
use crate::marker::PSafe;
use crate::ptr::PPtr;
use crate::stm::{self, Journal};
use crate::utils::{align_up, rand_u64};
use memmap::{MmapMut, MmapOptions};
use std::cell::{Cell, RefCell};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::mem;
use std::os::unix::fs::OpenOptionsExt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::ptr;

/// Minimum viable pool size (mirrors `PMEMOBJ_MIN_POOL`)
pub const MIN_POOL_SIZE: u64 = 8 * 1024 * 1024;

/// Owner read permission for [`Pool::create`]
pub const S_IRUSR: u32 = libc::S_IRUSR as u32;
/// Owner write permission for [`Pool::create`]
pub const S_IWUSR: u32 = libc::S_IWUSR as u32;
/// Owner read/write/execute permissions for [`Pool::create`]
pub const S_IRWXU: u32 = libc::S_IRWXU as u32;

const MAGIC: u64 = u64::from_le_bytes(*b"SPINEL01");
const VERSION: u64 = 1;
const LAYOUT_LEN: usize = 64;

/// Capacity of the persistent undo-log arena
const JOURNAL_CAP: u64 = 1024 * 1024;

/// Shows that the pool has a root object
const FLAG_HAS_ROOT: u64 = 0x0000_0001;

/// On-file pool header
///
/// The mutable allocator state (`free_head`, `used`) sits after `checksum`;
/// the checksum covers only the immutable prefix.
#[repr(C)]
#[derive(Clone, Copy)]
struct Header {
    magic: u64,
    version: u64,
    uuid: u64,
    size: u64,
    journal_off: u64,
    journal_cap: u64,
    root_off: u64,
    root_size: u64,
    arena_off: u64,
    flags: u64,
    layout: [u8; LAYOUT_LEN],
    checksum: u64,
    free_head: u64,
    used: u64,
}

const CHECKSUM_COVER: usize = mem::size_of::<Header>() - 3 * 8;

/// Pool offset of the free-list head field
pub(crate) const FREE_HEAD_OFF: u64 = (mem::size_of::<Header>() - 2 * 8) as u64;

/// Pool offset of the allocated-bytes counter
pub(crate) const USED_OFF: u64 = (mem::size_of::<Header>() - 8) as u64;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

/// A memory-mapped persistent pool
///
/// A pool is a file holding a header, a fixed undo-log arena, a root-object
/// slot, and a free-space arena. [`create`] lays a fresh file out durably;
/// [`open`] validates the header, runs crash recovery on the undo log, and
/// maps the file back in at whatever address the OS picks -- which is why
/// objects inside the pool reference each other through offset-based
/// [`PPtr`]s rather than native pointers.
///
/// All mutation of pool memory happens inside [`transaction`], through the
/// [`Journal`] handle passed to the body. The handle requirement is the
/// write-interception discipline: there is no API that writes pool memory
/// without first capturing an undo record.
///
/// A `Pool` handle is not `Sync`; one handle serves one thread, and opening
/// the same pool file from several processes concurrently is unsupported
/// (external file locking is the caller's responsibility).
///
/// [`create`]: #method.create
/// [`open`]: #method.open
/// [`transaction`]: #method.transaction
/// [`PPtr`]: ./ptr/struct.PPtr.html
/// [`Journal`]: ./stm/struct.Journal.html
pub struct Pool {
    map: Option<MmapMut>,
    path: PathBuf,
    uuid: u64,
    size: u64,
    journal_off: u64,
    journal_cap: u64,
    root_off: u64,
    root_size: u64,
    arena_off: u64,
    tx_depth: Cell<usize>,

    /// Outstanding dereference guards, as `(id, off, len, mutable)`
    borrows: RefCell<Vec<(u64, u64, u64, bool)>>,
    next_borrow: Cell<u64>,
}

impl Pool {
    /// Creates a pool file at `path` and maps it in
    ///
    /// `layout` names the expected object graph (at most 63 bytes) and is
    /// revalidated on every [`open`]. `size` is the total file size; `mode`
    /// is the unix permission set for the new file, e.g.
    /// `S_IRUSR | S_IWUSR`. The root slot is sized for `Root` and
    /// zero-initialized, so a fresh root holds null [`PPtr`]s.
    ///
    /// The header, undo-log arena, root slot, and free-list arena are all
    /// durably persisted before this returns; on any failure the file is
    /// removed and no pool object is exposed.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if `path` exists, `InvalidSize` if `size` is below
    /// [`MIN_POOL_SIZE`] (or leaves no room for the arena), `IOFailure` for
    /// filesystem errors.
    ///
    /// [`open`]: #method.open
    /// [`PPtr`]: ./ptr/struct.PPtr.html
    /// [`MIN_POOL_SIZE`]: ./constant.MIN_POOL_SIZE.html
    pub fn create<Root: PSafe>(
        path: impl AsRef<Path>,
        layout: &str,
        size: u64,
        mode: u32,
    ) -> Result<Self> {
        let path = path.as_ref();
        assert!(layout.len() < LAYOUT_LEN, "layout name too long");
        if size < MIN_POOL_SIZE {
            return Err(Error::InvalidSize {
                size,
                min: MIN_POOL_SIZE,
            });
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(path)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    Error::AlreadyExists(path.display().to_string())
                } else {
                    Error::IOFailure(e)
                }
            })?;
        let res = Self::format::<Root>(&file, path, layout, size);
        if res.is_err() {
            let _ = std::fs::remove_file(path);
        }
        res
    }

    fn format<Root: PSafe>(
        file: &std::fs::File,
        path: &Path,
        layout: &str,
        size: u64,
    ) -> Result<Self> {
        let journal_off = align_up(mem::size_of::<Header>() as u64, 64);
        let journal_cap = JOURNAL_CAP;
        let root_off = align_up(journal_off + 8 + journal_cap, 64);
        let root_size = mem::size_of::<Root>() as u64;
        let arena_off = align_up(root_off + root_size, 64);
        if arena_off + crate::alloc::freelist::BLOCK_HDR + 8 > size {
            return Err(Error::InvalidSize {
                size,
                min: MIN_POOL_SIZE,
            });
        }

        file.set_len(size)?;
        let map = unsafe { MmapOptions::new().map_mut(file)? };

        let mut header = Header {
            magic: MAGIC,
            version: VERSION,
            uuid: rand_u64()? | 1,
            size,
            journal_off,
            journal_cap,
            root_off,
            root_size,
            arena_off,
            flags: FLAG_HAS_ROOT,
            layout: [0; LAYOUT_LEN],
            checksum: 0,
            free_head: 0,
            used: 0,
        };
        header.layout[..layout.len()].copy_from_slice(layout.as_bytes());
        header.checksum = fnv1a(&crate::utils::as_slice(&header)[..CHECKSUM_COVER]);

        let pool = Self {
            uuid: header.uuid,
            map: Some(map),
            path: path.to_path_buf(),
            size,
            journal_off,
            journal_cap,
            root_off,
            root_size,
            arena_off,
            tx_depth: Cell::new(0),
            borrows: RefCell::new(Vec::new()),
            next_borrow: Cell::new(0),
        };
        unsafe {
            let base = pool.base()?;
            ptr::write(base as *mut Header, header);
        }
        // Root slot and journal tail are already zero in a fresh file.
        pool.init_freelist()?;
        ll::persist(pool.base()?, size as usize, true);
        log!(BrightYellow, "CREATE", "{} ({} bytes)", path.display(), size);
        Ok(pool)
    }

    /// Opens an existing pool file and maps it in
    ///
    /// The header is validated (magic, version, checksum, geometry) and the
    /// stored layout string and root-object size are compared against
    /// `layout` and `Root`. A non-empty undo log left behind by a crash is
    /// replayed backwards before the pool is exposed, so an interrupted
    /// transaction is fully rolled back by the time this returns.
    ///
    /// # Errors
    ///
    /// `NotFound` if the file does not exist, `LayoutMismatch` if the stored
    /// layout identity differs, `Corrupted` if a consistency check fails,
    /// `IOFailure` for filesystem errors.
    pub fn open<Root: PSafe>(path: impl AsRef<Path>, layout: &str) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    Error::NotFound(path.display().to_string())
                } else {
                    Error::IOFailure(e)
                }
            })?;
        let file_len = file.metadata()?.len();
        if (file_len as usize) < mem::size_of::<Header>() {
            return Err(Error::Corrupted("pool file too small for a header"));
        }
        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        let header = unsafe { ptr::read(map.as_ptr() as *const Header) };

        if header.magic != MAGIC || header.version != VERSION {
            return Err(Error::Corrupted("bad magic or version"));
        }
        if header.checksum != fnv1a(&crate::utils::as_slice(&header)[..CHECKSUM_COVER]) {
            return Err(Error::Corrupted("header checksum mismatch"));
        }
        if header.size != file_len {
            return Err(Error::Corrupted("pool file was truncated or extended"));
        }
        if header.flags & FLAG_HAS_ROOT == 0 {
            return Err(Error::Corrupted("pool has no root object"));
        }
        if header.journal_off + 8 + header.journal_cap > header.root_off
            || header.root_off + header.root_size > header.arena_off
            || header.arena_off >= header.size
        {
            return Err(Error::Corrupted("inconsistent pool geometry"));
        }

        let stored = {
            let end = header.layout.iter().position(|&b| b == 0).unwrap_or(LAYOUT_LEN);
            String::from_utf8_lossy(&header.layout[..end]).into_owned()
        };
        if stored != layout {
            return Err(Error::LayoutMismatch {
                stored,
                requested: layout.to_string(),
            });
        }
        if header.root_size != mem::size_of::<Root>() as u64 {
            return Err(Error::LayoutMismatch {
                stored: format!("root object of {} bytes", header.root_size),
                requested: format!("root object of {} bytes", mem::size_of::<Root>()),
            });
        }

        let pool = Self {
            map: Some(map),
            path: path.to_path_buf(),
            uuid: header.uuid,
            size: header.size,
            journal_off: header.journal_off,
            journal_cap: header.journal_cap,
            root_off: header.root_off,
            root_size: header.root_size,
            arena_off: header.arena_off,
            tx_depth: Cell::new(0),
            borrows: RefCell::new(Vec::new()),
            next_borrow: Cell::new(0),
        };
        let recovered = unsafe {
            stm::recover(
                pool.base()?,
                header.journal_off + 8,
                header.journal_cap,
                header.size,
            )?
        };
        if recovered {
            log!(BrightRed, "RECOVER", "{} rolled back an interrupted transaction", path.display());
        }
        log!(BrightYellow, "OPEN", "{} ({} bytes)", path.display(), header.size);
        Ok(pool)
    }

    /// Returns a pointer to the pool's root object
    ///
    /// Side-effect-free and always valid while the pool is open. Fails with
    /// `LayoutMismatch` if `Root` does not match the size the pool was
    /// created with, or `PoolClosed` after [`close`].
    ///
    /// [`close`]: #method.close
    pub fn root<Root: PSafe>(&self) -> Result<PPtr<Root>> {
        self.base()?;
        if self.root_size != mem::size_of::<Root>() as u64 {
            return Err(Error::LayoutMismatch {
                stored: format!("root object of {} bytes", self.root_size),
                requested: format!("root object of {} bytes", mem::size_of::<Root>()),
            });
        }
        Ok(PPtr::from_raw_parts(self.uuid, self.root_off))
    }

    /// Immutably dereferences a persistent pointer
    ///
    /// Reads never touch the undo log. Fails with `NullDereference`,
    /// `ForeignPool` if `p` originated in another pool, `OutOfBounds` if the
    /// addressed range leaves the mapping, or `PoolClosed`.
    ///
    /// # Panics
    ///
    /// Borrows are checked dynamically per byte range, as `RefCell` checks
    /// them per cell: panics if the range is mutably borrowed.
    #[track_caller]
    pub fn deref<'a, T: PSafe>(&'a self, p: PPtr<T>) -> Result<PRef<'a, T>> {
        let base = self.base()?;
        self.check_ptr(p, mem::size_of::<T>() as u64)?;
        let id = self.acquire_borrow(p.off(), mem::size_of::<T>() as u64, false);
        Ok(PRef::new(
            unsafe { &*(base.add(p.off() as usize) as *const T) },
            self,
            id,
        ))
    }

    /// Mutably dereferences a persistent pointer inside a transaction
    ///
    /// The first mutable dereference of an object inside a transaction scope
    /// captures its pre-image in the undo log; later ones within the same
    /// scope are free. The range stays writable until the returned guard
    /// drops, and every byte written through it is flushed durably at commit
    /// or restored on abort.
    ///
    /// # Panics
    ///
    /// Borrows are checked dynamically per byte range, as `RefCell` checks
    /// them per cell: panics if the range overlaps any outstanding guard.
    #[track_caller]
    pub fn deref_mut<'a, T: PSafe>(&'a self, p: PPtr<T>, j: &Journal) -> Result<PMut<'a, T>> {
        self.same_journal(j)?;
        let base = self.base()?;
        self.check_ptr(p, mem::size_of::<T>() as u64)?;
        j.log_range(p.off(), mem::size_of::<T>() as u64)?;
        let id = self.acquire_borrow(p.off(), mem::size_of::<T>() as u64, true);
        Ok(PMut::new(
            unsafe { &mut *(base.add(p.off() as usize) as *mut T) },
            self,
            id,
        ))
    }

    /// Allocates `val` in the pool's arena, under transactional control
    ///
    /// Both the allocator bookkeeping and the object's bytes are covered by
    /// the enclosing undo log: a crash or abort mid-allocation rolls the
    /// free list back and the object never existed. Fails with
    /// `OutOfMemory` when no free block fits (or the undo-log arena is
    /// exhausted).
    pub fn alloc<T: PSafe>(&self, val: T, j: &Journal) -> Result<PPtr<T>> {
        self.same_journal(j)?;
        let base = self.base()?;
        debug_assert!(mem::align_of::<T>() <= 8, "arena payloads are 8-byte aligned");
        let len = mem::size_of::<T>() as u64;
        let off = self.alloc_bytes(len.max(1), j)?;
        unsafe {
            ptr::write(base.add(off as usize) as *mut T, val);
        }
        j.mark_dirty(off, len);
        Ok(PPtr::from_raw_parts(self.uuid, off))
    }

    /// Transactionally deallocates the object behind `p`
    ///
    /// The free is deferred to the commit of the outermost scope, so an
    /// abort can still restore the object's bytes without any risk of the
    /// block having been reused. Freeing a null pointer is a no-op; freeing
    /// a block that is not currently allocated (including a second free of
    /// the same pointer in one transaction) fails with `InvalidFree`.
    pub fn dealloc<T: PSafe>(&self, p: PPtr<T>, j: &Journal) -> Result<()> {
        self.same_journal(j)?;
        self.base()?;
        if p.is_null() {
            return Ok(());
        }
        if p.uuid() != self.uuid {
            return Err(Error::ForeignPool);
        }
        self.check_block(p.off())?;
        j.defer_free(p.off())
    }

    /// Atomically executes `body`
    ///
    /// Opens a transaction scope and passes its [`Journal`] to `body`. If
    /// `body` returns `Ok`, every write it made is flushed durably and the
    /// undo log is discarded; if it returns `Err` or panics, the log is
    /// replayed backwards first and the failure propagates unchanged.
    /// Writes inside the scope become durable, in program order, only at
    /// the commit point.
    ///
    /// Nested scopes go through [`Journal::nested`]; calling `transaction`
    /// again on a handle with an active scope is a programmer error and
    /// panics.
    ///
    /// A transaction that performs no writes commits without touching pool
    /// contents.
    ///
    /// [`Journal`]: ./stm/struct.Journal.html
    /// [`Journal::nested`]: ./stm/struct.Journal.html#method.nested
    pub fn transaction<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&Journal) -> Result<T>,
    {
        let j = Journal::start(self)?;
        let res = catch_unwind(AssertUnwindSafe(|| body(&j)));
        match res {
            Ok(Ok(v)) => match j.commit() {
                Ok(()) => Ok(v),
                Err(e) => {
                    let _ = j.rollback();
                    Err(e)
                }
            },
            Ok(Err(e)) => {
                j.rollback()?;
                Err(e)
            }
            Err(payload) => {
                let _ = j.rollback();
                resume_unwind(payload)
            }
        }
    }

    /// Flushes the pool durably and unmaps it
    ///
    /// Outstanding [`PPtr`] values keep their bits but cannot be
    /// dereferenced until the same file is opened again.
    ///
    /// [`PPtr`]: ./ptr/struct.PPtr.html
    pub fn close(mut self) -> Result<()> {
        if let Some(map) = self.map.take() {
            map.flush()?;
        }
        log!(BrightYellow, "CLOSE", "{}", self.path.display());
        Ok(())
    }

    /// Returns the pool's total size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the pool file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the pool's unique identity, as embedded in its pointers
    pub fn uuid(&self) -> u64 {
        self.uuid
    }

    /// Bytes currently allocated in the arena, block headers included
    pub fn used(&self) -> Result<u64> {
        self.read_u64(USED_OFF)
    }

    #[inline]
    pub(crate) fn base(&self) -> Result<*mut u8> {
        match &self.map {
            Some(m) => Ok(m.as_ptr() as *mut u8),
            None => Err(Error::PoolClosed),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.size as usize
    }

    #[inline]
    pub(crate) fn arena_off(&self) -> u64 {
        self.arena_off
    }

    fn check_ptr<T>(&self, p: PPtr<T>, len: u64) -> Result<()> {
        if p.is_null() {
            return Err(Error::NullDereference);
        }
        if p.uuid() != self.uuid {
            return Err(Error::ForeignPool);
        }
        if p.off() < self.root_off
            || p.off().checked_add(len).map_or(true, |end| end > self.size)
        {
            return Err(Error::OutOfBounds);
        }
        Ok(())
    }

    /// Registers a borrow of `off..off + len`, panicking on a conflict as
    /// `RefCell` does
    #[track_caller]
    fn acquire_borrow(&self, off: u64, len: u64, mutable: bool) -> u64 {
        for &(_, o, l, m) in self.borrows.borrow().iter() {
            if (mutable || m) && off < o + l && o < off + len {
                if m {
                    panic!("persistent range is already mutably borrowed");
                }
                panic!("persistent range is already borrowed");
            }
        }
        let id = self.next_borrow.get();
        self.next_borrow.set(id + 1);
        self.borrows.borrow_mut().push((id, off, len, mutable));
        id
    }

    pub(crate) fn release_borrow(&self, id: u64) {
        let mut borrows = self.borrows.borrow_mut();
        if let Some(i) = borrows.iter().position(|&(b, ..)| b == id) {
            borrows.swap_remove(i);
        }
    }

    fn same_journal(&self, j: &Journal) -> Result<()> {
        if ptr::eq(j.pool_ptr(), self) {
            Ok(())
        } else {
            Err(Error::ForeignPool)
        }
    }

    #[inline]
    pub(crate) fn read_u64(&self, off: u64) -> Result<u64> {
        let base = self.base()?;
        debug_assert!(off + 8 <= self.size);
        Ok(unsafe { ptr::read_unaligned(base.add(off as usize) as *const u64) })
    }

    #[inline]
    pub(crate) fn put_u64(&self, off: u64, v: u64) -> Result<()> {
        let base = self.base()?;
        debug_assert!(off + 8 <= self.size);
        unsafe { ptr::write_unaligned(base.add(off as usize) as *mut u64, v) };
        Ok(())
    }

    #[inline]
    pub(crate) fn journal_geometry(&self) -> (u64, u64) {
        (self.journal_off + 8, self.journal_cap)
    }

    pub(crate) fn journal_tail(&self) -> Result<u64> {
        self.read_u64(self.journal_off)
    }

    /// Advances the durable tail cursor; this is what makes an appended
    /// undo record visible to recovery (and, at zero, the commit point)
    pub(crate) fn set_journal_tail(&self, v: u64) -> Result<()> {
        let base = self.base()?;
        self.put_u64(self.journal_off, v)?;
        unsafe { ll::persist(base.add(self.journal_off as usize), 8, true) };
        Ok(())
    }

    #[inline]
    pub(crate) fn tx_depth(&self) -> usize {
        self.tx_depth.get()
    }

    pub(crate) fn begin_tx(&self) {
        self.tx_depth.set(self.tx_depth.get() + 1);
    }

    pub(crate) fn end_tx(&self) {
        self.tx_depth.set(self.tx_depth.get() - 1);
    }

    /// Drops the mapping without a final flush, leaving any live undo log
    /// in place; reopening then exercises crash recovery. Test-only.
    #[cfg(test)]
    pub(crate) fn detach(&mut self) {
        self.map = None;
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Some(map) = &self.map {
            let _ = map.flush();
        }
    }
}

#[cfg(test)]
mod layout {
    use super::*;

    #[test]
    fn header_field_offsets() {
        let h: Header = unsafe { mem::zeroed() };
        let base = &h as *const Header as usize;
        assert_eq!(&h.checksum as *const _ as usize - base, CHECKSUM_COVER);
        assert_eq!(&h.free_head as *const _ as usize - base, FREE_HEAD_OFF as usize);
        assert_eq!(&h.used as *const _ as usize - base, USED_OFF as usize);
        assert_eq!(mem::size_of::<Header>() % 8, 0);
    }
}
