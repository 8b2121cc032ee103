//! Size-class mapping.
//!
//! Maps a byte size to `(fl, sl)` first/second-level indices. `mapping_insert`
//! uses the size as-is (used when filing a freed block into its class);
//! `mapping_search` first rounds the size *up* within its class so the block
//! located is guaranteed to fit a request of that size.

use crate::config::{FL_INDEX_SHIFT, SL_INDEX_COUNT_LOG2, SMALL_BLOCK_SIZE};

/// Position of the highest set bit, 0-indexed. Undefined for `x == 0`;
/// callers never map a zero size.
#[inline]
fn fls(x: usize) -> u32 {
    debug_assert_ne!(x, 0);
    usize::BITS - 1 - x.leading_zeros()
}

/// Position of the lowest set bit in a 32-bit free-list bitmap word.
#[inline]
pub(crate) fn ffs(word: u32) -> Option<u32> {
    if word == 0 {
        None
    } else {
        Some(word.trailing_zeros())
    }
}

/// `(fl, sl)` for a size already rounded to the class it belongs in.
pub(crate) fn mapping_insert(size: usize) -> (usize, usize) {
    if size < SMALL_BLOCK_SIZE {
        let fl = 0;
        let sl = size / (SMALL_BLOCK_SIZE / (1 << SL_INDEX_COUNT_LOG2));
        (fl, sl)
    } else {
        let fl_bit = fls(size);
        let sl = (size >> (fl_bit - SL_INDEX_COUNT_LOG2)) ^ (1 << SL_INDEX_COUNT_LOG2);
        let fl = (fl_bit - (FL_INDEX_SHIFT - 1)) as usize;
        (fl, sl as usize)
    }
}

/// `(fl, sl)` for a size that must be satisfied by a block *at least* this
/// large: rounds up within the class before mapping.
pub(crate) fn mapping_search(mut size: usize) -> (usize, usize) {
    if size >= SMALL_BLOCK_SIZE {
        let round = (1usize << (fls(size) - SL_INDEX_COUNT_LOG2)) - 1;
        size = size.wrapping_add(round);
    }
    mapping_insert(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_blocks_map_into_fl_zero() {
        let (fl, sl) = mapping_insert(0);
        assert_eq!(fl, 0);
        assert_eq!(sl, 0);
        let (fl, _) = mapping_insert(SMALL_BLOCK_SIZE - 4);
        assert_eq!(fl, 0);
    }

    #[test]
    fn large_blocks_use_fl_sl() {
        let (fl, sl) = mapping_insert(SMALL_BLOCK_SIZE);
        assert_eq!(fl, 1);
        assert_eq!(sl, 0);
    }

    #[test]
    fn search_rounds_up_within_class() {
        let (fl, sl) = mapping_search(SMALL_BLOCK_SIZE + 1);
        let class_size = if fl == 0 {
            sl * (SMALL_BLOCK_SIZE / (1 << SL_INDEX_COUNT_LOG2))
        } else {
            (1usize << (fl + (FL_INDEX_SHIFT as usize - 1)))
                + sl * (1usize << (fl + FL_INDEX_SHIFT as usize - 1 - SL_INDEX_COUNT_LOG2 as usize))
        };
        assert!(class_size >= SMALL_BLOCK_SIZE + 1);
    }
}
