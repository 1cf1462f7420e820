//! Marker traits for persistent memory safety

/// Types that may safely live inside a persistent pool
///
/// A `PSafe` type must be plain data: fully meaningful after a crash and a
/// remap at the same offsets, with no volatile pointers, no destructor
/// side effects, and no interior references to process memory. Offset-based
/// [`PPtr`]s are `PSafe`; native references and raw pointers are not.
///
/// # Safety
///
/// Implementors must guarantee the above. Deriving structs should contain
/// `PSafe` fields only and use a stable layout (`#[repr(C)]` is advised).
///
/// [`PPtr`]: ./ptr/struct.PPtr.html
pub unsafe trait PSafe {}

macro_rules! psafe {
    ($($t:ty),*) => { $(unsafe impl PSafe for $t {})* };
}

psafe!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64, bool, char, ());

unsafe impl<T: PSafe, const N: usize> PSafe for [T; N] {}
unsafe impl<A: PSafe, B: PSafe> PSafe for (A, B) {}
unsafe impl<A: PSafe, B: PSafe, C: PSafe> PSafe for (A, B, C) {}
