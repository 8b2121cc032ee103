//! Block header layout.
//!
//! Every block in a managed region is prefixed by a header carrying a
//! back-pointer to its physical predecessor and a flag-packed size word.
//! `next_free`/`prev_free` only exist logically while the block is free;
//! physically they're written into the block's own payload bytes, since a
//! free block has no payload to protect.
//!
//! Deviation from the classic back-pointer-in-tail trick (see DESIGN.md
//! decision #6): `prev_phys_block` is stored unconditionally in this
//! block's own header rather than overlapped into the predecessor's last
//! bytes. That physical-layout trick is an optimization, not a logical
//! requirement, and keeping it out avoids writing through an unchecked
//! pointer into a neighboring block's nominal allocation.

use core::mem::size_of;
use core::ptr::NonNull;

use crate::config::ALIGN_SIZE;

bitflags::bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub(crate) struct BlockFlags: usize {
        /// This block is on a free list.
        const FREE = 0b01;
        /// The physically preceding block is free (and its `prev_phys_block`
        /// therefore safe to dereference for coalescing).
        const PREV_FREE = 0b10;
    }
}

const FLAG_MASK: usize = 0b11;

#[repr(C)]
pub(crate) struct BlockHeader {
    pub(crate) prev_phys_block: Option<NonNull<BlockHeader>>,
    size_and_flags: usize,
}

/// Bytes of header preceding every block's payload pointer.
pub(crate) const BLOCK_HEADER_OVERHEAD: usize =
    size_of::<Option<NonNull<BlockHeader>>>() + size_of::<usize>();

/// Smallest payload a free block may have: room for `next_free`/`prev_free`.
pub(crate) const BLOCK_SIZE_MIN: usize = {
    let raw = 2 * size_of::<usize>();
    (raw + ALIGN_SIZE - 1) & !(ALIGN_SIZE - 1)
};

impl BlockHeader {
    pub(crate) fn size(&self) -> usize {
        self.size_and_flags & !FLAG_MASK
    }

    pub(crate) fn set_size(&mut self, size: usize) {
        debug_assert_eq!(size & FLAG_MASK, 0, "block size must be ALIGN_SIZE-aligned");
        self.size_and_flags = size | (self.size_and_flags & FLAG_MASK);
    }

    pub(crate) fn flags(&self) -> BlockFlags {
        BlockFlags::from_bits_truncate(self.size_and_flags & FLAG_MASK)
    }

    pub(crate) fn is_free(&self) -> bool {
        self.flags().contains(BlockFlags::FREE)
    }

    pub(crate) fn is_prev_free(&self) -> bool {
        self.flags().contains(BlockFlags::PREV_FREE)
    }

    pub(crate) fn set_free(&mut self, free: bool) {
        self.set_flag(BlockFlags::FREE, free);
    }

    pub(crate) fn set_prev_free(&mut self, free: bool) {
        self.set_flag(BlockFlags::PREV_FREE, free);
    }

    fn set_flag(&mut self, flag: BlockFlags, on: bool) {
        let mut flags = self.flags();
        flags.set(flag, on);
        self.size_and_flags = self.size() | flags.bits();
    }

    /// Writes a brand new header in place. Used when carving a block out of
    /// raw bytes (pool creation, split) where `size_and_flags` has no prior
    /// valid value to preserve.
    pub(crate) fn write(
        this: NonNull<BlockHeader>,
        prev_phys_block: Option<NonNull<BlockHeader>>,
        size: usize,
        free: bool,
        prev_free: bool,
    ) {
        let mut flags = BlockFlags::empty();
        flags.set(BlockFlags::FREE, free);
        flags.set(BlockFlags::PREV_FREE, prev_free);
        unsafe {
            let ptr = this.as_ptr();
            (*ptr).prev_phys_block = prev_phys_block;
            (*ptr).size_and_flags = size | flags.bits();
        }
    }

    /// Pointer to this block's payload (what callers of `alloc` receive).
    pub(crate) fn payload_ptr(this: NonNull<BlockHeader>) -> NonNull<u8> {
        unsafe {
            NonNull::new_unchecked((this.as_ptr() as *mut u8).add(BLOCK_HEADER_OVERHEAD))
        }
    }

    /// Recovers the header from a payload pointer previously handed to a caller.
    pub(crate) fn from_payload_ptr(ptr: NonNull<u8>) -> NonNull<BlockHeader> {
        unsafe {
            NonNull::new_unchecked(ptr.as_ptr().sub(BLOCK_HEADER_OVERHEAD) as *mut BlockHeader)
        }
    }

    /// Address of the physically next block header.
    pub(crate) fn next_phys(this: NonNull<BlockHeader>) -> NonNull<BlockHeader> {
        let size = unsafe { this.as_ref().size() };
        unsafe {
            NonNull::new_unchecked(
                (this.as_ptr() as *mut u8).add(BLOCK_HEADER_OVERHEAD + size) as *mut BlockHeader,
            )
        }
    }

    /// Free-list successor, valid only while `FREE` is set.
    pub(crate) unsafe fn next_free(this: NonNull<BlockHeader>) -> Option<NonNull<BlockHeader>> {
        *(BlockHeader::payload_ptr(this).as_ptr() as *const Option<NonNull<BlockHeader>>)
    }

    pub(crate) unsafe fn set_next_free(
        this: NonNull<BlockHeader>,
        next: Option<NonNull<BlockHeader>>,
    ) {
        let slot = BlockHeader::payload_ptr(this).as_ptr() as *mut Option<NonNull<BlockHeader>>;
        slot.write(next);
    }

    pub(crate) unsafe fn prev_free(this: NonNull<BlockHeader>) -> Option<NonNull<BlockHeader>> {
        let slot = BlockHeader::payload_ptr(this)
            .as_ptr()
            .add(size_of::<usize>()) as *const Option<NonNull<BlockHeader>>;
        *slot
    }

    pub(crate) unsafe fn set_prev_free(
        this: NonNull<BlockHeader>,
        prev: Option<NonNull<BlockHeader>>,
    ) {
        let slot = BlockHeader::payload_ptr(this)
            .as_ptr()
            .add(size_of::<usize>()) as *mut Option<NonNull<BlockHeader>>;
        slot.write(prev);
    }
}
