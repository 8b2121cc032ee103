//! Shared error and result vocabulary.
//!
//! This crate is `no_std`; rather than pulling in `thiserror`, fallible
//! operations return a plain hand-rolled enum.

use core::fmt;

/// Why a fallible pool operation could not complete.
///
/// Most allocator entry points (`Tlsf::alloc`, `Heap::alloc`, ...) just
/// return `None` on failure — out of memory, a zero-size request, and an
/// oversized request all collapse to the same "no" a caller can act on.
/// `PoolError` exists only for `Tlsf::create_with_pool`, which has to say
/// *why* a region was rejected outright before any allocation is possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The backing memory region's base address was not `ALIGN_SIZE`-aligned.
    UnalignedBase,
    /// The supplied region is smaller than the minimum viable pool.
    RegionTooSmall,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::UnalignedBase => write!(f, "pool base address is not 4-byte aligned"),
            PoolError::RegionTooSmall => write!(f, "region is smaller than the minimum viable pool"),
        }
    }
}

/// `OS_RES_OK` / `OS_RES_INV` result enum, returned by `Heap::test`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemTestResult {
    Ok,
    Inv,
}

impl From<MemTestResult> for i32 {
    fn from(r: MemTestResult) -> i32 {
        match r {
            MemTestResult::Ok => 1,
            MemTestResult::Inv => 0,
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
