use crate::marker::PSafe;
use std::cmp::Ordering;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// An offset-based pointer to an object inside a persistent pool
///
/// A `PPtr` is a `(pool uuid, byte offset)` pair, the same shape as
/// `libpmemobj`'s `PMEMoid`. Unlike a raw pointer, its value stays
/// meaningful across process restarts: the offset is relative to the pool
/// base, and the uuid ties it to the pool file that produced it.
/// Dereferencing goes through the owning [`Pool`], which revalidates the
/// pointer on every access; a `PPtr` can therefore be copied, compared, and
/// stored freely without ever becoming dangling in the raw-pointer sense.
///
/// Offset `0` addresses the pool header and never a live object, so the
/// all-zeroes bit pattern is the null pointer. A zero-initialized root slot
/// thus starts out holding null `PPtr`s.
///
/// `PPtr` has no ownership semantics of its own; the persistent object whose
/// field holds the pointer owns the referent, and exactly one such field
/// should exist per object. There is no persistent reference counting.
///
/// [`Pool`]: ../struct.Pool.html
#[repr(C)]
pub struct PPtr<T: ?Sized> {
    uuid: u64,
    off: u64,
    marker: PhantomData<*const T>,
}

unsafe impl<T: PSafe> PSafe for PPtr<T> {}

impl<T: ?Sized> PPtr<T> {
    /// The null pointer
    #[inline]
    pub const fn null() -> Self {
        Self {
            uuid: 0,
            off: 0,
            marker: PhantomData,
        }
    }

    /// Returns true if this is the null pointer
    #[inline]
    pub fn is_null(&self) -> bool {
        self.off == 0
    }

    /// Returns the pool-relative byte offset
    #[inline]
    pub fn off(&self) -> u64 {
        self.off
    }

    /// Returns the uuid of the originating pool
    #[inline]
    pub fn uuid(&self) -> u64 {
        self.uuid
    }

    #[inline]
    pub(crate) fn from_raw_parts(uuid: u64, off: u64) -> Self {
        Self {
            uuid,
            off,
            marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Default for PPtr<T> {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> Copy for PPtr<T> {}

impl<T: ?Sized> Clone for PPtr<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> PartialEq for PPtr<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.off == other.off && self.uuid == other.uuid
    }
}

impl<T: ?Sized> Eq for PPtr<T> {}

impl<T: ?Sized> PartialOrd for PPtr<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized> Ord for PPtr<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.off
            .cmp(&other.off)
            .then(self.uuid.cmp(&other.uuid))
    }
}

impl<T: ?Sized> Hash for PPtr<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.off.hash(state);
        self.uuid.hash(state);
    }
}

impl<T: ?Sized> Debug for PPtr<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "PPtr(null)")
        } else {
            write!(f, "PPtr({:x}:{:x})", self.uuid, self.off)
        }
    }
}
