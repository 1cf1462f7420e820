//! A fixed-capacity array stored inline in persistent objects
use crate::error::{Error, Result};
use crate::marker::PSafe;
use crate::ptr::PPtr;
use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::ops::{Index, IndexMut};
use std::slice;

/// A fixed-size sequence of `N` elements stored inline
///
/// `PArray` is the persistent counterpart of `[T; N]`: its storage lives
/// inside whatever persistent object declares it, it has no independent
/// allocation, and its length is the type-level constant `N` for the whole
/// lifetime of the object. There is no resize, insert, or erase.
///
/// Const-correctness falls out of borrowing: a shared reference only ever
/// yields `&T`, and the sole way to a `&mut PArray` inside a pool is
/// [`Pool::deref_mut`], which captures the array's pre-image in the undo
/// log the first time it is reached inside a transaction. Reading never
/// touches the log.
///
/// Indexing follows a trusted-caller contract: bounds are asserted in debug
/// builds and unchecked in release. [`front`]/[`back`] on `N = 0` are a
/// programmer error, not a recoverable failure; code guarded by
/// `len() > 0` is never reached for `N = 0` since `len()` is a constant
/// the compiler folds.
///
/// ```
/// use spinel::PArray;
///
/// let a = PArray::new([1.0, 2.0, 3.5]);
/// assert_eq!(a.len(), 3);
/// assert_eq!(a.front(), &1.0);
/// assert_eq!(a.back(), &3.5);
///
/// let empty: PArray<f64, 0> = PArray::new([]);
/// assert_eq!(empty.len(), 0);
/// ```
///
/// [`Pool::deref_mut`]: ./struct.Pool.html#method.deref_mut
/// [`front`]: #method.front
/// [`back`]: #method.back
#[repr(C)]
pub struct PArray<T, const N: usize> {
    data: [T; N],
}

unsafe impl<T: PSafe, const N: usize> PSafe for PArray<T, N> {}

impl<T, const N: usize> PArray<T, N> {
    /// The element count, as a type-level constant
    pub const LEN: usize = N;

    /// Wraps an ordinary array
    #[inline]
    pub const fn new(data: [T; N]) -> Self {
        Self { data }
    }

    /// Returns `N`; constant for the object's lifetime
    #[inline]
    pub const fn len(&self) -> usize {
        N
    }

    /// Returns `N`, under the container-style name
    #[inline]
    pub const fn size(&self) -> usize {
        N
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    /// Checked element access
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.data.get(index)
    }

    /// Checked mutable element access
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.data.get_mut(index)
    }

    /// First element; must not be called for `N = 0`
    #[inline]
    pub fn front(&self) -> &T {
        debug_assert!(N > 0, "front() on a zero-length array");
        unsafe { self.data.get_unchecked(0) }
    }

    /// First element, mutable; must not be called for `N = 0`
    #[inline]
    pub fn front_mut(&mut self) -> &mut T {
        debug_assert!(N > 0, "front_mut() on a zero-length array");
        unsafe { self.data.get_unchecked_mut(0) }
    }

    /// Last element; must not be called for `N = 0`
    #[inline]
    pub fn back(&self) -> &T {
        debug_assert!(N > 0, "back() on a zero-length array");
        unsafe { self.data.get_unchecked(N - 1) }
    }

    /// Last element, mutable; must not be called for `N = 0`
    #[inline]
    pub fn back_mut(&mut self) -> &mut T {
        debug_assert!(N > 0, "back_mut() on a zero-length array");
        unsafe { self.data.get_unchecked_mut(N - 1) }
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.data.iter()
    }

    #[inline]
    pub fn iter_mut(&mut self) -> slice::IterMut<'_, T> {
        self.data.iter_mut()
    }
}

impl<T, const N: usize> Index<usize> for PArray<T, N> {
    type Output = T;

    /// Trusted-caller indexing: asserted in debug builds, unchecked in
    /// release
    #[inline]
    fn index(&self, index: usize) -> &T {
        debug_assert!(index < N, "index {} out of bounds (len {})", index, N);
        unsafe { self.data.get_unchecked(index) }
    }
}

impl<T, const N: usize> IndexMut<usize> for PArray<T, N> {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut T {
        debug_assert!(index < N, "index {} out of bounds (len {})", index, N);
        unsafe { self.data.get_unchecked_mut(index) }
    }
}

impl<T, const N: usize> From<[T; N]> for PArray<T, N> {
    #[inline]
    fn from(data: [T; N]) -> Self {
        Self { data }
    }
}

impl<T: Default, const N: usize> Default for PArray<T, N> {
    fn default() -> Self {
        Self {
            data: std::array::from_fn(|_| T::default()),
        }
    }
}

impl<T: Copy, const N: usize> Copy for PArray<T, N> {}

impl<T: Clone, const N: usize> Clone for PArray<T, N> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

impl<T: PartialEq, const N: usize> PartialEq for PArray<T, N> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<T: Eq, const N: usize> Eq for PArray<T, N> {}

impl<T: Debug, const N: usize> Debug for PArray<T, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.data.iter()).finish()
    }
}

impl<'a, T, const N: usize> IntoIterator for &'a PArray<T, N> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

impl<T, const N: usize> PPtr<PArray<T, N>> {
    /// Addresses one element of the pointed-to array
    ///
    /// Element addressing is defined only against an array region, where
    /// the bound is known at the type level; an index past `N` fails with
    /// `OutOfBounds` and a null array pointer with `NullDereference`.
    pub fn elem(&self, index: usize) -> Result<PPtr<T>> {
        if self.is_null() {
            return Err(Error::NullDereference);
        }
        if index >= N {
            return Err(Error::OutOfBounds);
        }
        let off = self.off() + (index * mem::size_of::<T>()) as u64;
        Ok(PPtr::from_raw_parts(self.uuid(), off))
    }
}
