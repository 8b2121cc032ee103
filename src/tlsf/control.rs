//! Segregated free-list control structure.
//!
//! DESIGN.md decision #6: unlike the classic TLSF layout, this table is a
//! plain field of `Tlsf` rather than bytes embedded at the front of the
//! managed pool — see `config::FL_INDEX_MAX`'s doc comment for why.
//!
//! There is no explicit "null block" sentinel object: an empty free list is
//! represented by `None`, which is the idiomatic Rust equivalent of "points
//! at a dummy that points at itself".

use core::ptr::NonNull;

use crate::config::{FL_INDEX_COUNT, SL_INDEX_COUNT};
use crate::tlsf::block::BlockHeader;
use crate::tlsf::mapping::{ffs, mapping_insert, mapping_search};

pub(crate) struct Control {
    fl_bitmap: u32,
    sl_bitmap: [u32; FL_INDEX_COUNT],
    blocks: [[Option<NonNull<BlockHeader>>; SL_INDEX_COUNT]; FL_INDEX_COUNT],
}

impl Control {
    pub(crate) const fn new() -> Self {
        Control {
            fl_bitmap: 0,
            sl_bitmap: [0; FL_INDEX_COUNT],
            blocks: [[None; SL_INDEX_COUNT]; FL_INDEX_COUNT],
        }
    }

    /// Links `block` onto `blocks[fl][sl]`, the list its own size maps to.
    pub(crate) fn insert_block(&mut self, block: NonNull<BlockHeader>, fl: usize, sl: usize) {
        let head = self.blocks[fl][sl];
        unsafe {
            BlockHeader::set_next_free(block, head);
            BlockHeader::set_prev_free(block, None);
            if let Some(head) = head {
                BlockHeader::set_prev_free(head, Some(block));
            }
        }
        self.blocks[fl][sl] = Some(block);
        self.fl_bitmap |= 1 << fl;
        self.sl_bitmap[fl] |= 1 << sl;
    }

    /// Removes `block` from `blocks[fl][sl]`. `block` must currently be a
    /// member of that list.
    pub(crate) fn remove_block(&mut self, block: NonNull<BlockHeader>, fl: usize, sl: usize) {
        unsafe {
            let prev = BlockHeader::prev_free(block);
            let next = BlockHeader::next_free(block);
            if let Some(prev) = prev {
                BlockHeader::set_next_free(prev, next);
            } else {
                self.blocks[fl][sl] = next;
            }
            if let Some(next) = next {
                BlockHeader::set_prev_free(next, prev);
            }
        }
        if self.blocks[fl][sl].is_none() {
            self.sl_bitmap[fl] &= !(1 << sl);
            if self.sl_bitmap[fl] == 0 {
                self.fl_bitmap &= !(1 << fl);
            }
        }
    }

    /// Files a freshly-freed block into the list its size maps to.
    pub(crate) fn insert_for_size(&mut self, block: NonNull<BlockHeader>) {
        let size = unsafe { block.as_ref().size() };
        let (fl, sl) = mapping_insert(size);
        self.insert_block(block, fl, sl);
    }

    /// Locates the smallest free block that can satisfy `size`, removing it
    /// from its free list. Returns `None` on out-of-memory.
    pub(crate) fn locate_free_block(&mut self, size: usize) -> Option<NonNull<BlockHeader>> {
        let (fl, sl) = mapping_search(size);
        let (fl, sl) = self.find_suitable(fl, sl)?;
        let block = self.blocks[fl][sl]?;
        self.remove_block(block, fl, sl);
        Some(block)
    }

    /// Given a starting class, finds the first non-empty class at or above
    /// it via the bitmaps.
    fn find_suitable(&self, fl: usize, sl: usize) -> Option<(usize, usize)> {
        let mut sl_map = self.sl_bitmap[fl] & (!0u32 << sl);
        let mut fl = fl;
        if sl_map == 0 {
            let fl_map = self.fl_bitmap & (!0u32 << (fl + 1));
            fl = ffs(fl_map)? as usize;
            sl_map = self.sl_bitmap[fl];
        }
        let sl = ffs(sl_map)? as usize;
        Some((fl, sl))
    }

    pub(crate) fn sl_bitmap(&self, fl: usize) -> u32 {
        self.sl_bitmap[fl]
    }

    pub(crate) fn fl_bitmap(&self) -> u32 {
        self.fl_bitmap
    }

    pub(crate) fn head(&self, fl: usize, sl: usize) -> Option<NonNull<BlockHeader>> {
        self.blocks[fl][sl]
    }
}
