//! Undo-log entry format
use crate::error::{Error, Result};
use crate::utils::align_up;
use std::ptr;

/// Transaction scope states
///
/// A scope starts `Uncommitted` and ends in exactly one of the terminal
/// states. An inner scope's `Committed` is provisional: its writes become
/// irreversible only when the outermost scope commits, and they are undone
/// if any ancestor scope aborts.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TxState {
    Uncommitted,
    Committed,
    Aborted,
}

/// Fixed part of an undo-log entry: `(src, len)` preceding `len` pre-image
/// bytes, padded to 8 bytes
pub(crate) const ENTRY_HDR: u64 = 16;

#[inline]
pub(crate) fn entry_size(len: u64) -> u64 {
    ENTRY_HDR + align_up(len, 8)
}

/// One undo record: the pre-image of pool range `src..src + len` is kept at
/// `data..data + len` inside the journal arena
#[derive(Clone, Copy, Debug)]
pub(crate) struct LogEntry {
    pub src: u64,
    pub len: u64,
    pub data: u64,
}

/// Walks the journal data area from `from` up to `tail` and returns the
/// entries in append order
///
/// Offsets `from` and `tail` are relative to the start of the data area at
/// pool offset `data_off`. A walk that does not land exactly on `tail`, or
/// an entry whose source range leaves the pool, means the journal arena
/// itself was damaged.
///
/// # Safety
///
/// `base` must be the live mapping base and the journal geometry must have
/// been validated against the mapping length.
pub(crate) unsafe fn scan(
    base: *const u8,
    data_off: u64,
    from: u64,
    tail: u64,
    pool_len: u64,
) -> Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    let mut pos = from;
    while pos < tail {
        let at = data_off + pos;
        let src = ptr::read_unaligned(base.add(at as usize) as *const u64);
        let len = ptr::read_unaligned(base.add(at as usize + 8) as *const u64);
        if len == 0 || src == 0 || src.checked_add(len).map_or(true, |end| end > pool_len) {
            return Err(Error::Corrupted("damaged undo-log entry"));
        }
        entries.push(LogEntry {
            src,
            len,
            data: at + ENTRY_HDR,
        });
        pos += entry_size(len);
    }
    if pos != tail {
        return Err(Error::Corrupted("undo-log tail inside an entry"));
    }
    Ok(entries)
}
