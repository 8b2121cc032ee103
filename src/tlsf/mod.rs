//! Two-Level Segregated Fit allocator (C2) — the heart of this crate.
//!
//! `Tlsf` owns one managed pool: a byte slice handed to `create_with_pool`,
//! laid out as a chain of physically contiguous blocks terminated by a
//! zero-size sentinel, plus the segregated free-list `Control` table (kept
//! out of the pool bytes themselves — DESIGN.md decision #6).

mod block;
mod control;
mod mapping;

use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::config::{ALIGN_SIZE, FL_INDEX_COUNT, FL_INDEX_MAX, SL_INDEX_COUNT};
use crate::error::{PoolError, PoolResult};
use crate::log::{debug, trace};

pub(crate) use block::BlockHeader;
use block::{BLOCK_HEADER_OVERHEAD, BLOCK_SIZE_MIN};
use control::Control;
use mapping::mapping_insert;

/// Largest size a single block can represent, derived from `FL_INDEX_MAX`.
pub const BLOCK_SIZE_MAX: usize = (1usize << FL_INDEX_MAX) - ALIGN_SIZE;

bitflags::bitflags! {
    /// Invariant violations observed by [`Tlsf::check`] / [`Tlsf::check_pool`].
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct PoolIntegrity: u32 {
        /// A free list's emptiness disagrees with its bitmap bit.
        const BITMAP_MISMATCH = 0b0001;
        /// A block's `PREV_FREE` flag disagrees with its predecessor's `FREE`.
        const PREV_FREE_MISMATCH = 0b0010;
        /// Two physically adjacent blocks are both free (coalesce missed one).
        const ADJACENT_FREE_BLOCKS = 0b0100;
        /// A free block sits on a list its own size doesn't map to.
        const CLASS_MISMATCH = 0b1000;
    }
}

/// `(fl, sl)` class a block of this size files into — exposed for C4's
/// diagnostic `monitor()` report.
pub(crate) fn size_class(size: usize) -> (u8, u8) {
    let (fl, sl) = mapping_insert(size);
    (fl as u8, sl as u8)
}

/// Rounds a requested payload size up to `ALIGN_SIZE`, clamps it into
/// `[BLOCK_SIZE_MIN, BLOCK_SIZE_MAX)`, and rejects zero.
fn adjust_request_size(size: usize) -> Option<usize> {
    if size == 0 {
        return None;
    }
    let aligned = (size + ALIGN_SIZE - 1) & !(ALIGN_SIZE - 1);
    let aligned = aligned.max(BLOCK_SIZE_MIN);
    if aligned >= BLOCK_SIZE_MAX {
        None
    } else {
        Some(aligned)
    }
}

/// One TLSF-managed pool over a caller-owned byte slice.
///
/// `'p` ties the allocator to the lifetime of the backing slice; the C4
/// heap facade instantiates this once over a `'static` array.
pub struct Tlsf<'p> {
    control: Control,
    first_block: NonNull<BlockHeader>,
    total_bytes: usize,
    _marker: PhantomData<&'p mut [u8]>,
}

// The pool is a single contiguous allocation this struct exclusively owns
// for `'p`; nothing here is `Send`/`Sync` by default. The C4 heap facade
// wraps its singleton instance in a `spin::Mutex` instead of relying on
// auto traits.

impl<'p> Tlsf<'p> {
    /// Places a fresh pool inside `mem`.
    pub fn create_with_pool(mem: &'p mut [u8]) -> PoolResult<Self> {
        let base = mem.as_mut_ptr();
        if (base as usize) % ALIGN_SIZE != 0 {
            return Err(PoolError::UnalignedBase);
        }
        let min_bytes = 2 * BLOCK_HEADER_OVERHEAD + BLOCK_SIZE_MIN;
        if mem.len() < min_bytes {
            return Err(PoolError::RegionTooSmall);
        }
        let total_bytes = mem.len();

        let first = unsafe { NonNull::new_unchecked(base as *mut BlockHeader) };
        let first_size = (mem.len() - 2 * BLOCK_HEADER_OVERHEAD) & !(ALIGN_SIZE - 1);

        // The first block's physical predecessor lies outside the pool and
        // is never dereferenced; PREV_FREE stays clear (PREV_USED).
        BlockHeader::write(first, None, first_size, true, false);
        let sentinel = BlockHeader::next_phys(first);
        BlockHeader::write(sentinel, Some(first), 0, false, true);

        let mut control = Control::new();
        control.insert_for_size(first);

        debug!("pool created over {} usable bytes", first_size);

        Ok(Tlsf {
            control,
            first_block: first,
            total_bytes,
            _marker: PhantomData,
        })
    }

    /// Raw byte length of the backing region handed to `create_with_pool`,
    /// header overhead and sentinel included.
    pub fn total_size(&self) -> usize {
        self.total_bytes
    }

    /// Allocates `size` bytes, or `None` on out-of-memory / a request too
    /// large for any class.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let adjusted = adjust_request_size(size)?;
        let block = self.control.locate_free_block(adjusted).or_else(|| {
            debug!("out of memory: requested {size} bytes (adjusted {adjusted})");
            None
        })?;
        self.use_block(block, adjusted);
        Some(BlockHeader::payload_ptr(block))
    }

    /// Frees a pointer previously returned by `alloc`/`memalign`, returning
    /// the internal (flag-stripped) block size it held.
    pub fn free(&mut self, ptr: NonNull<u8>) -> usize {
        let block = BlockHeader::from_payload_ptr(ptr);
        let block = self.merge_prev(block);
        let block = self.merge_next(block);
        let size = unsafe { block.as_ref().size() };
        unsafe {
            (*block.as_ptr()).set_free(true);
        }
        let next = BlockHeader::next_phys(block);
        unsafe {
            (*next.as_ptr()).set_prev_free(true);
        }
        self.control.insert_for_size(block);
        trace!("freed block of size {size}");
        size
    }

    /// `(ptr, size)` edge cases and fast/slow paths.2 "Realloc".
    pub fn realloc(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        match (ptr, size) {
            (None, 0) => None,
            (None, _) => self.alloc(size),
            (Some(p), 0) => {
                self.free(p);
                None
            }
            (Some(p), _) => self.realloc_existing(p, size),
        }
    }

    fn realloc_existing(&mut self, p: NonNull<u8>, size: usize) -> Option<NonNull<u8>> {
        let adjusted = adjust_request_size(size)?;
        let block = BlockHeader::from_payload_ptr(p);
        let cur_size = unsafe { block.as_ref().size() };

        if cur_size >= adjusted {
            self.trim_free(block, adjusted);
            return Some(p);
        }

        let next = BlockHeader::next_phys(block);
        let next_is_free = unsafe { next.as_ref().is_free() };
        if next_is_free {
            let next_size = unsafe { next.as_ref().size() };
            if cur_size + BLOCK_HEADER_OVERHEAD + next_size >= adjusted {
                let (fl, sl) = mapping_insert(next_size);
                self.control.remove_block(next, fl, sl);
                let combined = cur_size + BLOCK_HEADER_OVERHEAD + next_size;
                unsafe {
                    (*block.as_ptr()).set_size(combined);
                }
                let after = BlockHeader::next_phys(block);
                unsafe {
                    (*after.as_ptr()).prev_phys_block = Some(block);
                }
                self.trim_free(block, adjusted);
                return Some(p);
            }
        }

        // Slow path: relocate. `alloc` runs before `free` so the source
        // bytes are still readable for the copy.
        let new_ptr = self.alloc(size)?;
        unsafe {
            let n = cur_size.min(size);
            core::ptr::copy_nonoverlapping(p.as_ptr(), new_ptr.as_ptr(), n);
        }
        self.free(p);
        Some(new_ptr)
    }

    /// Aligned allocation. `align` must be a
    /// power of two; alignments `<= ALIGN_SIZE` degrade to plain `alloc`.
    pub fn memalign(&mut self, align: usize, size: usize) -> Option<NonNull<u8>> {
        debug_assert!(align.is_power_of_two(), "align must be a power of two");
        if align <= ALIGN_SIZE {
            return self.alloc(size);
        }
        let adjusted = adjust_request_size(size)?;
        let over_alloc = adjusted.checked_add(align)?.checked_add(BLOCK_HEADER_OVERHEAD)?;
        if over_alloc >= BLOCK_SIZE_MAX {
            return None;
        }
        let block = self.control.locate_free_block(over_alloc)?;

        let payload = BlockHeader::payload_ptr(block).as_ptr() as usize;
        let mut aligned = (payload + align - 1) & !(align - 1);
        let mut gap = aligned - payload;
        if gap != 0 && gap < BLOCK_HEADER_OVERHEAD {
            let gap_remain = BLOCK_HEADER_OVERHEAD - gap;
            let advance = gap_remain.max(align);
            aligned = ((payload + gap + advance) + align - 1) & !(align - 1);
            gap = aligned - payload;
        }

        let block = if gap != 0 {
            self.trim_free_leading(block, gap)
        } else {
            block
        };
        self.use_block(block, adjusted);
        Some(BlockHeader::payload_ptr(block))
    }

    /// Internal block size backing a live allocation, flags stripped.
    pub fn block_size(&self, ptr: NonNull<u8>) -> usize {
        let block = BlockHeader::from_payload_ptr(ptr);
        unsafe { block.as_ref().size() }
    }

    /// Visits every physical block (used or free) from the pool's start up
    /// to, but excluding, the sentinel.
    pub fn walk_pool<F: FnMut(NonNull<u8>, usize, bool)>(&self, mut visitor: F) {
        let mut cur = self.first_block;
        loop {
            let size = unsafe { cur.as_ref().size() };
            if size == 0 {
                break;
            }
            let used = unsafe { !cur.as_ref().is_free() };
            visitor(BlockHeader::payload_ptr(cur), size, used);
            cur = BlockHeader::next_phys(cur);
        }
    }

    /// Walks the physical chain checking `PREV_FREE` consistency and the
    /// no-adjacent-free-blocks coalesce invariant.
    pub fn check_pool(&self) -> PoolIntegrity {
        let mut report = PoolIntegrity::empty();
        let mut cur = self.first_block;
        let mut prev_was_free = false;
        loop {
            let size = unsafe { cur.as_ref().size() };
            if size == 0 {
                break;
            }
            let is_free = unsafe { cur.as_ref().is_free() };
            let prev_free_flag = unsafe { cur.as_ref().is_prev_free() };
            if prev_free_flag != prev_was_free {
                report |= PoolIntegrity::PREV_FREE_MISMATCH;
            }
            if is_free && prev_was_free {
                report |= PoolIntegrity::ADJACENT_FREE_BLOCKS;
            }
            prev_was_free = is_free;
            cur = BlockHeader::next_phys(cur);
        }
        if !report.is_empty() {
            crate::log::error!("check_pool found violations: {report:?}");
        }
        report
    }

    /// Walks the FL/SL bitmaps and list heads checking that every non-empty
    /// list has its bitmap bits set, every listed block maps back to the
    /// list it's on, and vice versa.
    pub fn check(&self) -> PoolIntegrity {
        let mut report = PoolIntegrity::empty();
        for fl in 0..FL_INDEX_COUNT {
            let mut fl_has_list = false;
            for sl in 0..SL_INDEX_COUNT {
                let head = self.control.head(fl, sl);
                let bit_set = self.control.sl_bitmap(fl) & (1 << sl) != 0;
                if head.is_some() != bit_set {
                    report |= PoolIntegrity::BITMAP_MISMATCH;
                }
                let mut node = head;
                while let Some(b) = node {
                    fl_has_list = true;
                    let size = unsafe { b.as_ref().size() };
                    if mapping_insert(size) != (fl, sl) {
                        report |= PoolIntegrity::CLASS_MISMATCH;
                    }
                    node = unsafe { BlockHeader::next_free(b) };
                }
            }
            let fl_bit_set = self.control.fl_bitmap() & (1 << fl) != 0;
            if fl_has_list != fl_bit_set {
                report |= PoolIntegrity::BITMAP_MISMATCH;
            }
        }
        if !report.is_empty() {
            crate::log::error!("check found violations: {report:?}");
        }
        report
    }

    /// Marks `block` used and returns its leftover tail to the pool.
    fn use_block(&mut self, block: NonNull<BlockHeader>, size: usize) {
        unsafe {
            (*block.as_ptr()).set_free(false);
        }
        self.trim_free(block, size);
    }

    /// Shrinks `block` to `size` if the remainder is big enough to be its
    /// own free block; otherwise leaves it as-is.
    /// Either way, fixes up the physical successor's `PREV_FREE` flag.
    fn trim_free(&mut self, block: NonNull<BlockHeader>, size: usize) {
        let total = unsafe { block.as_ref().size() };
        if total >= size + BLOCK_HEADER_OVERHEAD + BLOCK_SIZE_MIN {
            unsafe {
                (*block.as_ptr()).set_size(size);
            }
            let remain_size = total - size - BLOCK_HEADER_OVERHEAD;
            let remain = BlockHeader::next_phys(block);
            BlockHeader::write(remain, Some(block), remain_size, true, false);
            let after = BlockHeader::next_phys(remain);
            unsafe {
                (*after.as_ptr()).prev_phys_block = Some(remain);
                (*after.as_ptr()).set_prev_free(true);
            }
            self.control.insert_for_size(remain);
        } else {
            let after = BlockHeader::next_phys(block);
            unsafe {
                (*after.as_ptr()).set_prev_free(false);
            }
        }
    }

    /// Splits a leading `gap`-byte slice off `block` and returns it to the
    /// pool as its own free block, returning the remaining (now-aligned)
    /// block.
    fn trim_free_leading(&mut self, block: NonNull<BlockHeader>, gap: usize) -> NonNull<BlockHeader> {
        let total = unsafe { block.as_ref().size() };
        let prev = unsafe { block.as_ref().prev_phys_block };
        let was_prev_free = unsafe { block.as_ref().is_prev_free() };
        let leading_size = gap - BLOCK_HEADER_OVERHEAD;

        BlockHeader::write(block, prev, leading_size, true, was_prev_free);
        let remain = BlockHeader::next_phys(block);
        let remain_size = total - gap;
        BlockHeader::write(remain, Some(block), remain_size, false, true);
        let after = BlockHeader::next_phys(remain);
        unsafe {
            (*after.as_ptr()).prev_phys_block = Some(remain);
        }
        self.control.insert_for_size(block);
        remain
    }

    /// Absorbs the physical predecessor into `block` if it's free, returning
    /// whichever header now represents the combined block.
    fn merge_prev(&mut self, block: NonNull<BlockHeader>) -> NonNull<BlockHeader> {
        if !unsafe { block.as_ref().is_prev_free() } {
            return block;
        }
        let prev = unsafe { block.as_ref().prev_phys_block }
            .expect("PREV_FREE set implies a physical predecessor exists");
        let prev_size = unsafe { prev.as_ref().size() };
        let (fl, sl) = mapping_insert(prev_size);
        self.control.remove_block(prev, fl, sl);
        let block_size = unsafe { block.as_ref().size() };
        let combined = prev_size + BLOCK_HEADER_OVERHEAD + block_size;
        unsafe {
            (*prev.as_ptr()).set_size(combined);
        }
        let after = BlockHeader::next_phys(prev);
        unsafe {
            (*after.as_ptr()).prev_phys_block = Some(prev);
        }
        prev
    }

    /// Absorbs the physical successor into `block` if it's free.
    fn merge_next(&mut self, block: NonNull<BlockHeader>) -> NonNull<BlockHeader> {
        let next = BlockHeader::next_phys(block);
        if !unsafe { next.as_ref().is_free() } {
            return block;
        }
        let next_size = unsafe { next.as_ref().size() };
        let (fl, sl) = mapping_insert(next_size);
        self.control.remove_block(next, fl, sl);
        let block_size = unsafe { block.as_ref().size() };
        let combined = block_size + BLOCK_HEADER_OVERHEAD + next_size;
        unsafe {
            (*block.as_ptr()).set_size(combined);
        }
        let after = BlockHeader::next_phys(block);
        unsafe {
            (*after.as_ptr()).prev_phys_block = Some(block);
        }
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_pool_has_one_free_block() {
        let mut mem = vec![0u8; 512];
        let tlsf = Tlsf::create_with_pool(&mut mem).unwrap();
        let mut free_blocks = 0;
        let mut used_blocks = 0;
        tlsf.walk_pool(|_, _, used| {
            if used {
                used_blocks += 1;
            } else {
                free_blocks += 1;
            }
        });
        assert_eq!(used_blocks, 0);
        assert_eq!(free_blocks, 1);
        assert!(tlsf.check().is_empty());
        assert!(tlsf.check_pool().is_empty());
    }

    #[test]
    fn alloc_then_free_restores_single_free_block() {
        let mut mem = vec![0u8; 512];
        let mut tlsf = Tlsf::create_with_pool(&mut mem).unwrap();
        let p = tlsf.alloc(64).expect("alloc should succeed");
        tlsf.free(p);
        let mut free_blocks = 0;
        tlsf.walk_pool(|_, _, used| {
            if !used {
                free_blocks += 1;
            }
        });
        assert_eq!(free_blocks, 1);
        assert!(tlsf.check_pool().is_empty());
    }

    #[test]
    fn fragmentation_then_coalesce_merges_freed_neighbors() {
        let mut mem = vec![0u8; 1024];
        let mut tlsf = Tlsf::create_with_pool(&mut mem).unwrap();
        let a = tlsf.alloc(64).unwrap();
        let b = tlsf.alloc(64).unwrap();
        let _c = tlsf.alloc(64).unwrap();
        tlsf.free(b);
        tlsf.free(a);

        let mut free_blocks = 0;
        tlsf.walk_pool(|_, _, used| {
            if !used {
                free_blocks += 1;
            }
        });
        // one merged a+b region, plus the unallocated tail of the pool
        assert_eq!(free_blocks, 2);
        assert!(tlsf.check_pool().is_empty());
    }

    #[test]
    fn realloc_grows_into_freed_neighbor_without_moving() {
        let mut mem = vec![0u8; 1024];
        let mut tlsf = Tlsf::create_with_pool(&mut mem).unwrap();
        let a = tlsf.alloc(64).unwrap();
        let b = tlsf.alloc(64).unwrap();
        tlsf.free(b);
        let a2 = tlsf.realloc(Some(a), 120).unwrap();
        assert_eq!(a.as_ptr(), a2.as_ptr());
    }

    #[test]
    fn memalign_returns_aligned_pointer() {
        let mut mem = vec![0u8; 1024];
        let mut tlsf = Tlsf::create_with_pool(&mut mem).unwrap();
        let p = tlsf.memalign(256, 100).expect("memalign should succeed");
        assert_eq!(p.as_ptr() as usize % 256, 0);
        tlsf.free(p);
        let mut free_blocks = 0;
        tlsf.walk_pool(|_, _, used| {
            if !used {
                free_blocks += 1;
            }
        });
        assert_eq!(free_blocks, 1);
    }

    #[test]
    fn pointers_are_always_align_size_aligned() {
        let mut mem = vec![0u8; 1024];
        let mut tlsf = Tlsf::create_with_pool(&mut mem).unwrap();
        for n in [1usize, 3, 17, 63, 100] {
            let p = tlsf.alloc(n).unwrap();
            assert_eq!(p.as_ptr() as usize % ALIGN_SIZE, 0);
        }
    }

    #[test]
    fn zero_size_alloc_is_rejected_at_this_layer() {
        let mut mem = vec![0u8; 512];
        let mut tlsf = Tlsf::create_with_pool(&mut mem).unwrap();
        assert!(tlsf.alloc(0).is_none());
    }

    #[test]
    fn unaligned_base_is_rejected() {
        let mut mem = vec![0u8; 513];
        // Force an odd base by taking a 1-byte-shifted sub-slice when the
        // allocation happens to start aligned.
        let base = mem.as_ptr() as usize;
        let shift = if base % ALIGN_SIZE == 0 { 1 } else { 0 };
        let sub = &mut mem[shift..];
        if (sub.as_ptr() as usize) % ALIGN_SIZE != 0 {
            assert!(matches!(
                Tlsf::create_with_pool(sub),
                Err(PoolError::UnalignedBase)
            ));
        }
    }

    #[test]
    fn region_too_small_is_rejected() {
        let mut mem = vec![0u8; 4];
        assert!(matches!(
            Tlsf::create_with_pool(&mut mem),
            Err(PoolError::RegionTooSmall)
        ));
    }
}
