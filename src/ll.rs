//! Low-level durability barriers
#![allow(unused)]

use std::sync::atomic::{fence, Ordering};

/// Synchronizes a mapped range back to its file and acts like a write barrier
///
/// The range is widened to page boundaries, as required by `msync`. The
/// mapping base is page-aligned, so the widened range never leaves the
/// mapping.
#[inline]
pub fn persist<T: ?Sized>(ptr: *const T, len: usize, fence: bool) {
    unsafe {
        let off = ptr as *const T as *const u8 as usize;
        let end = off + len.max(1);
        let off = (off >> 12) << 12;
        let len = end - off;
        if libc::msync(
            off as *mut libc::c_void,
            len,
            libc::MS_SYNC | libc::MS_INVALIDATE,
        ) != 0
        {
            panic!("msync failed at {:x}:{:x}", off, len);
        }
    }
    if fence {
        sfence();
    }
}

/// Synchronizes one object and acts like a write barrier
#[inline]
pub fn persist_obj<T: ?Sized>(obj: &T, fence: bool) {
    persist(obj, std::mem::size_of_val(obj), fence);
}

/// Store fence
#[inline]
pub fn sfence() {
    fence(Ordering::Release);
}

/// Memory fence
#[inline]
pub fn mfence() {
    fence(Ordering::SeqCst);
}
