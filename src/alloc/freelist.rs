//! First-fit free-list allocation over the pool arena
//!
//! Every block carries a 24-byte header: payload size, a status word
//! telling allocated from free apart, and the free-list link. All metadata
//! mutations go through the enclosing journal, so a crash mid-allocation
//! rolls the bookkeeping back together with the object.

use crate::alloc::pool::{Pool, FREE_HEAD_OFF, USED_OFF};
use crate::error::{Error, Result};
use crate::log;
use crate::stm::Journal;
use crate::utils::align_up;

pub(crate) const BLOCK_HDR: u64 = 24;

const STATUS_ALLOC: u64 = 0xa110_c8ed_a110_c8ed;
const STATUS_FREE: u64 = 0xf4ee_b10c_f4ee_b10c;

/// Smallest payload worth splitting a remainder block for
const MIN_SPLIT: u64 = 8;

impl Pool {
    /// Lays the arena out as one big free block. Create-time only, before
    /// the initial durability barrier.
    pub(crate) fn init_freelist(&self) -> Result<()> {
        let head = self.arena_off();
        self.put_u64(head, self.size() - head - BLOCK_HDR)?;
        self.put_u64(head + 8, STATUS_FREE)?;
        self.put_u64(head + 16, 0)?;
        self.put_u64(FREE_HEAD_OFF, head)?;
        self.put_u64(USED_OFF, 0)
    }

    /// Carves `len` bytes out of the arena and returns the payload offset
    pub(crate) fn alloc_bytes(&self, len: u64, j: &Journal) -> Result<u64> {
        let len = align_up(len.max(MIN_SPLIT), 8);

        let mut link = FREE_HEAD_OFF;
        let mut cur = self.read_u64(link)?;
        while cur != 0 {
            if cur < self.arena_off() || cur + BLOCK_HDR > self.size() {
                return Err(Error::Corrupted("free-list link out of range"));
            }
            let size = self.read_u64(cur)?;
            let status = self.read_u64(cur + 8)?;
            let next = self.read_u64(cur + 16)?;
            if status != STATUS_FREE {
                return Err(Error::Corrupted("allocated block on the free list"));
            }
            if size >= len {
                return self.take_block(link, cur, size, next, len, j);
            }
            link = cur + 16;
            cur = next;
        }
        Err(Error::OutOfMemory)
    }

    fn take_block(
        &self,
        link: u64,
        block: u64,
        size: u64,
        next: u64,
        len: u64,
        j: &Journal,
    ) -> Result<u64> {
        let (consumed, unlink_to) = if size >= len + BLOCK_HDR + MIN_SPLIT {
            // Split: the remainder header lands in formerly-free space, so
            // it needs no pre-image; rollback reverts this block's size and
            // the remainder is swallowed whole again.
            let rem = block + BLOCK_HDR + len;
            self.put_u64(rem, size - len - BLOCK_HDR)?;
            self.put_u64(rem + 8, STATUS_FREE)?;
            self.put_u64(rem + 16, next)?;
            j.mark_dirty(rem, BLOCK_HDR);
            (len, rem)
        } else {
            (size, next)
        };

        j.log_range(block, BLOCK_HDR)?;
        self.put_u64(block, consumed)?;
        self.put_u64(block + 8, STATUS_ALLOC)?;
        self.put_u64(block + 16, 0)?;

        j.log_range(link, 8)?;
        self.put_u64(link, unlink_to)?;

        j.log_range(USED_OFF, 8)?;
        self.put_u64(USED_OFF, self.read_u64(USED_OFF)? + consumed + BLOCK_HDR)?;

        log!(BrightBlue, "ALLOC", "({:>6x}) = {:<6}", block + BLOCK_HDR, consumed);
        Ok(block + BLOCK_HDR)
    }

    /// Returns the block holding `payload` to the free list; runs at outer
    /// commit, after which the transaction can no longer abort into the
    /// dead object's bytes
    pub(crate) fn perform_free(&self, payload: u64, j: &Journal) -> Result<()> {
        let block = payload - BLOCK_HDR;
        let size = self.read_u64(block)?;
        if self.read_u64(block + 8)? != STATUS_ALLOC {
            return Err(Error::Corrupted("deferred free of an unallocated block"));
        }

        // TODO: coalesce adjacent free blocks
        j.log_range(block + 8, 16)?;
        self.put_u64(block + 8, STATUS_FREE)?;
        self.put_u64(block + 16, self.read_u64(FREE_HEAD_OFF)?)?;

        j.log_range(FREE_HEAD_OFF, 8)?;
        self.put_u64(FREE_HEAD_OFF, block)?;

        j.log_range(USED_OFF, 8)?;
        self.put_u64(USED_OFF, self.read_u64(USED_OFF)? - size - BLOCK_HDR)?;

        log!(BrightBlue, "DEALLOC", "({:>6x}) = {:<6}", payload, size);
        Ok(())
    }

    /// Checks that `payload` names a live allocation
    pub(crate) fn check_block(&self, payload: u64) -> Result<()> {
        if payload < self.arena_off() + BLOCK_HDR || payload > self.size() {
            return Err(Error::OutOfBounds);
        }
        match self.read_u64(payload - BLOCK_HDR + 8)? {
            STATUS_ALLOC => Ok(()),
            STATUS_FREE => Err(Error::InvalidFree),
            _ => Err(Error::Corrupted("damaged block header")),
        }
    }

    /// Bytes available for allocation, summed over the free list
    pub fn available(&self) -> Result<u64> {
        let mut total = 0;
        let mut seen = 0u64;
        let mut cur = self.read_u64(FREE_HEAD_OFF)?;
        while cur != 0 {
            if cur < self.arena_off() || cur + BLOCK_HDR > self.size() {
                return Err(Error::Corrupted("free-list link out of range"));
            }
            total += self.read_u64(cur)?;
            cur = self.read_u64(cur + 16)?;
            seen += 1;
            if seen > self.size() / BLOCK_HDR {
                return Err(Error::Corrupted("cycle in the free list"));
            }
        }
        Ok(total)
    }
}
