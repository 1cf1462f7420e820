//! Dynamically checked borrow guards over pool memory

use crate::alloc::pool::Pool;
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::{Deref, DerefMut};

/// A shared borrow of one object inside a pool
///
/// Works like [`std::cell::Ref`]: the borrowed byte range stays registered
/// with the owning pool until the guard drops, and taking a mutable borrow
/// of an overlapping range panics in the meantime. Any number of shared
/// guards may overlap.
pub struct PRef<'a, T: ?Sized> {
    value: &'a T,
    pool: &'a Pool,
    id: u64,
}

impl<'a, T: ?Sized> PRef<'a, T> {
    pub(crate) fn new(value: &'a T, pool: &'a Pool, id: u64) -> Self {
        Self { value, pool, id }
    }
}

impl<T: ?Sized> Deref for PRef<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.value
    }
}

impl<T: ?Sized> Drop for PRef<'_, T> {
    fn drop(&mut self) {
        self.pool.release_borrow(self.id);
    }
}

impl<T: Debug + ?Sized> Debug for PRef<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: Display + ?Sized> Display for PRef<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

/// A mutable borrow of one object inside a pool
///
/// Works like [`std::cell::RefMut`]: exclusive for its byte range, so any
/// overlapping borrow while the guard lives panics. Obtained only through
/// [`Pool::deref_mut`], which captures the object's undo-log pre-image
/// before handing the guard out.
///
/// [`Pool::deref_mut`]: ./struct.Pool.html#method.deref_mut
pub struct PMut<'a, T: ?Sized> {
    value: &'a mut T,
    pool: &'a Pool,
    id: u64,
}

impl<'a, T: ?Sized> PMut<'a, T> {
    pub(crate) fn new(value: &'a mut T, pool: &'a Pool, id: u64) -> Self {
        Self { value, pool, id }
    }
}

impl<T: ?Sized> Deref for PMut<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.value
    }
}

impl<T: ?Sized> DerefMut for PMut<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        self.value
    }
}

impl<T: ?Sized> Drop for PMut<'_, T> {
    fn drop(&mut self) {
        self.pool.release_borrow(self.id);
    }
}

impl<T: Debug + ?Sized> Debug for PMut<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: Display + ?Sized> Display for PMut<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}
