//! Offset-based persistent pointers

mod ptr;

pub use ptr::*;
