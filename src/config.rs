//! Compile-time knobs for the pool size, buffer-slot count, and timer
//! scheduler cadence.
//!
//! Rust has no preprocessor, so what would otherwise be build-time
//! `#define`s are plain `pub const` items. A downstream crate that needs a
//! different `OS_MEM_SIZE` forks this file; see DESIGN.md's Open Question
//! decisions for why this crate doesn't const-generify the pool.

/// Bytes backing the singleton heap (C4).
pub const OS_MEM_SIZE: usize = 1024;

/// Number of scoped temp-buffer slots the heap facade manages.
pub const OS_MEM_BUF_MAX_NUM: usize = 16;

/// log2 of the second-level index count. Valid range is 4..=5; anything
/// larger overflows the 32-bit `sl_bitmap` words per block.
pub const SL_INDEX_COUNT_LOG2: u32 = 5;

/// Measurement window, in ticks, over which the scheduler's idle
/// percentage is recomputed.
pub const IDLE_MEAS_PERIOD: u32 = 500;

/// Default period (ms) used by callers that don't specify one explicitly.
pub const DEF_PERIOD: u32 = 500;

/// Sentinel returned by `Scheduler::handler` when no timer is armed.
pub const OS_NO_TIMER_READY: u32 = 0xFFFF_FFFF;

pub const ALIGN_SIZE_LOG2: u32 = 2;
pub const ALIGN_SIZE: usize = 1 << ALIGN_SIZE_LOG2;

pub const SL_INDEX_COUNT: usize = 1 << SL_INDEX_COUNT_LOG2;
pub const FL_INDEX_SHIFT: u32 = SL_INDEX_COUNT_LOG2 + ALIGN_SIZE_LOG2;
pub const SMALL_BLOCK_SIZE: usize = 1 << FL_INDEX_SHIFT;

/// `ceil(log2(x))`, `x > 0`. Used to size `FL_INDEX_MAX` from a pool's byte
/// count.
pub const fn ceil_log2(x: usize) -> u32 {
    let bits = usize::BITS - x.leading_zeros();
    if x.is_power_of_two() {
        bits - 1
    } else {
        bits
    }
}

/// First-level class count for the crate's default singleton pool, derived
/// from `OS_MEM_SIZE`.
///
/// DESIGN.md decision #6: the control structure (these bitmaps plus the
/// `blocks[FL][SL]` free-list head table) is *not* embedded inside the
/// pool's own byte region the way the classic TLSF layout does — a table
/// sized for `OS_MEM_SIZE = 1024` already exceeds 1024 bytes once pointers
/// are 8 bytes wide, which makes that layout infeasible on a 64-bit host.
/// Keeping control state as a plain field of `Tlsf` instead keeps
/// `OS_MEM_SIZE` bytes fully available to the managed pool.
pub const FL_INDEX_MAX: u32 = ceil_log2(OS_MEM_SIZE);
pub const FL_INDEX_COUNT: usize = (FL_INDEX_MAX - FL_INDEX_SHIFT + 1) as usize;
