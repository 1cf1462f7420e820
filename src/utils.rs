//! Small helpers shared across the crate
#![allow(unused)]

use std::fs::File;
use std::io::Read;
use std::sync::OnceLock;

/// Draws 8 random bytes from the OS, used for pool identities
pub(crate) fn rand_u64() -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    let mut f = File::open("/dev/urandom")?;
    f.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

/// Rounds `v` up to the next multiple of `a` (`a` must be a power of two)
#[inline]
pub const fn align_up(v: u64, a: u64) -> u64 {
    (v + a - 1) & !(a - 1)
}

/// Reinterprets an object as its raw bytes
pub fn as_slice<T: ?Sized>(x: &T) -> &[u8] {
    let ptr: *const T = x;
    let ptr: *const u8 = ptr as *const u8;
    unsafe { std::slice::from_raw_parts(ptr, std::mem::size_of_val(x)) }
}

#[doc(hidden)]
pub fn verbose() -> bool {
    static VERBOSE: OnceLock<bool> = OnceLock::new();
    *VERBOSE.get_or_init(|| matches!(std::env::var("VERBOSE"), Ok(v) if v == "1"))
}

/// Colored trace lines for pool and journal activity
///
/// Compiled in with the `verbose` feature and enabled at runtime with
/// `VERBOSE=1`.
#[macro_export]
macro_rules! log {
    ($c:tt, $tag:expr, $msg:expr, $($args:tt)*) => {
        #[cfg(feature = "verbose")] {
            use term_painter::Color::*;
            use term_painter::ToStyle;

            if $crate::utils::verbose() {
                println!("{}", $c.paint(
                    format!("{:>10}  {}", $tag, format!($msg, $($args)*))));
            }
        }
    };
}
