//! Singleton heap facade (C4): wraps the C2 allocator over a static byte
//! array, adds usage accounting, a zero-byte sentinel object, memcpy/memset
//! fast paths, and (behind `buf-pool`) the scoped temp-buffer pool.
//!
//! A `spin::Mutex` behind a lazily-populated `spin::Once` backs the
//! singleton state; see DESIGN.md for why `lazy_static` isn't used here.

use core::ptr::NonNull;

use spin::{Mutex, Once};

use crate::config::{OS_MEM_BUF_MAX_NUM, OS_MEM_SIZE};
use crate::error::MemTestResult;
use crate::log::{debug, warn};
use crate::tlsf::{self, Tlsf};

const ZERO_SENTINEL_VALUE: u32 = 0xa1b2_c3d4;
static ZERO_SENTINEL: u32 = ZERO_SENTINEL_VALUE;

fn zero_sentinel_ptr() -> NonNull<u8> {
    unsafe { NonNull::new_unchecked(&ZERO_SENTINEL as *const u32 as *mut u8) }
}

fn is_zero_sentinel(p: NonNull<u8>) -> bool {
    p.as_ptr() as *const u32 == &ZERO_SENTINEL as *const u32
}

#[derive(Clone, Copy)]
struct BufSlot {
    ptr: Option<NonNull<u8>>,
    size: usize,
    used: bool,
}

impl BufSlot {
    const EMPTY: BufSlot = BufSlot {
        ptr: None,
        size: 0,
        used: false,
    };
}

struct HeapState {
    tlsf: Tlsf<'static>,
    cur_used: usize,
    max_used: usize,
    #[cfg(feature = "buf-pool")]
    bufs: [BufSlot; OS_MEM_BUF_MAX_NUM],
}

static mut POOL: [u8; OS_MEM_SIZE] = [0; OS_MEM_SIZE];
static STATE: Once<Mutex<HeapState>> = Once::new();

/// Reserves the static pool and brings up the TLSF instance. Idempotent;
/// later calls are no-ops. Must be called before any other function here.
pub fn init() {
    STATE.call_once(|| {
        let mem: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(POOL) };
        let tlsf = Tlsf::create_with_pool(mem).expect("static OS_MEM_SIZE pool is well-formed");
        debug!("heap facade initialized over {OS_MEM_SIZE} bytes");
        Mutex::new(HeapState {
            tlsf,
            cur_used: 0,
            max_used: 0,
            #[cfg(feature = "buf-pool")]
            bufs: [BufSlot::EMPTY; OS_MEM_BUF_MAX_NUM],
        })
    });
}

fn state() -> &'static Mutex<HeapState> {
    STATE.get().expect("heap::init must be called before use")
}

fn alloc_locked(state: &mut HeapState, size: usize) -> Option<NonNull<u8>> {
    let p = state.tlsf.alloc(size)?;
    state.cur_used += size;
    if state.cur_used > state.max_used {
        state.max_used = state.cur_used;
    }
    #[cfg(feature = "zero-on-alloc")]
    unsafe {
        core::ptr::write_bytes(p.as_ptr(), 0u8, size);
    }
    strict_check(state, "alloc");
    Some(p)
}

fn free_locked(state: &mut HeapState, p: NonNull<u8>) {
    let size = state.tlsf.free(p);
    state.cur_used = state.cur_used.saturating_sub(size);
    strict_check(state, "free");
}

cfg_if::cfg_if! {
    if #[cfg(feature = "strict-check")] {
        /// Debug aid behind the `strict-check` feature (Cargo.toml):
        /// re-walks the pool after every alloc/free and logs the
        /// violations `check`/`check_pool` found, instead of only
        /// surfacing them on the next `test()` call.
        fn strict_check(state: &HeapState, op: &str) {
            let violations = state.tlsf.check().union(state.tlsf.check_pool());
            if !violations.is_empty() {
                warn!("pool integrity violation after {op}: {violations:?}");
            }
        }
    } else {
        fn strict_check(_state: &HeapState, _op: &str) {}
    }
}

/// `size == 0` returns the immortal zero-sentinel.
pub fn alloc(size: usize) -> Option<NonNull<u8>> {
    if size == 0 {
        return Some(zero_sentinel_ptr());
    }
    let mut guard = state().lock();
    match alloc_locked(&mut guard, size) {
        Some(p) => Some(p),
        None => {
            warn!("heap out of memory: requested {size} bytes");
            None
        }
    }
}

/// The zero-sentinel or a null pointer are both no-ops.
pub fn free(ptr: Option<NonNull<u8>>) {
    let Some(p) = ptr else {
        return;
    };
    if is_zero_sentinel(p) {
        return;
    }
    let mut guard = state().lock();
    free_locked(&mut guard, p);
}

/// `size == 0` frees and hands back the sentinel; `ptr` pointing at the
/// sentinel degrades to a plain `alloc`.
///
/// DESIGN.md Open Question #2: the in-place/trim fast path (handled inside
/// `Tlsf::realloc`) does not touch `cur_used`/`max_used`; only an actual
/// relocation is accounted, by comparing the returned pointer to the input.
pub fn realloc(ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
    if size == 0 {
        free(ptr);
        return Some(zero_sentinel_ptr());
    }
    match ptr {
        None => alloc(size),
        Some(p) if is_zero_sentinel(p) => alloc(size),
        Some(p) => {
            let mut guard = state().lock();
            let old_size = guard.tlsf.block_size(p);
            let new_ptr = guard.tlsf.realloc(Some(p), size)?;
            if new_ptr != p {
                guard.cur_used = guard.cur_used.saturating_sub(old_size);
                guard.cur_used += size;
                if guard.cur_used > guard.max_used {
                    guard.max_used = guard.cur_used;
                }
            }
            Some(new_ptr)
        }
    }
}

/// Checks the sentinel's value and the allocator's own consistency checks.
pub fn test() -> MemTestResult {
    let guard = state().lock();
    let sentinel_ok = unsafe { core::ptr::read_volatile(&ZERO_SENTINEL) } == ZERO_SENTINEL_VALUE;
    let integrity_ok = guard.tlsf.check().is_empty() && guard.tlsf.check_pool().is_empty();
    if sentinel_ok && integrity_ok {
        MemTestResult::Ok
    } else {
        MemTestResult::Inv
    }
}

/// Pool usage snapshot returned by `monitor()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Monitor {
    pub total_size: usize,
    pub used_cnt: usize,
    pub free_cnt: usize,
    pub free_biggest_size: usize,
    pub used_pct: u32,
    pub frag_pct: u32,
    pub largest_free_fl_sl: (u8, u8),
}

pub fn monitor() -> Monitor {
    let guard = state().lock();
    let mut m = Monitor::default();
    m.total_size = guard.tlsf.total_size();
    let mut free_size_total = 0usize;
    guard.tlsf.walk_pool(|_, size, used| {
        if used {
            m.used_cnt += 1;
        } else {
            m.free_cnt += 1;
            free_size_total += size;
            if size > m.free_biggest_size {
                m.free_biggest_size = size;
                m.largest_free_fl_sl = tlsf::size_class(size);
            }
        }
    });
    m.used_pct = if m.total_size == 0 {
        0
    } else {
        100 - (100 * free_size_total / m.total_size) as u32
    };
    m.frag_pct = if free_size_total == 0 {
        0
    } else {
        100 - (100 * m.free_biggest_size / free_size_total) as u32
    };
    m
}

/// Byte copy, word-accelerated when `src`/`dst` share a 4-byte alignment
/// class.
pub fn memcpy(dst: *mut u8, src: *const u8, n: usize) {
    unsafe {
        if n == 0 {
            return;
        }
        if (dst as usize) % 4 != (src as usize) % 4 {
            core::ptr::copy(src, dst, n);
            return;
        }
        let mut d = dst;
        let mut s = src;
        let mut remaining = n;

        let pre = ((4 - (d as usize) % 4) % 4).min(remaining);
        core::ptr::copy_nonoverlapping(s, d, pre);
        d = d.add(pre);
        s = s.add(pre);
        remaining -= pre;

        while remaining >= 32 {
            core::ptr::copy_nonoverlapping(s, d, 32);
            d = d.add(32);
            s = s.add(32);
            remaining -= 32;
        }
        while remaining >= 4 {
            core::ptr::copy_nonoverlapping(s, d, 4);
            d = d.add(4);
            s = s.add(4);
            remaining -= 4;
        }
        core::ptr::copy_nonoverlapping(s, d, remaining);
    }
}

/// Byte-only copy loop for small transfers where alignment-chunking overhead
/// would dominate.
pub fn memcpy_small(dst: *mut u8, src: *const u8, n: usize) {
    unsafe {
        for i in 0..n {
            *dst.add(i) = *src.add(i);
        }
    }
}

pub fn memset(dst: *mut u8, val: u8, n: usize) {
    unsafe {
        core::ptr::write_bytes(dst, val, n);
    }
}

pub fn memset_00(dst: *mut u8, n: usize) {
    memset(dst, 0x00, n);
}

pub fn memset_ff(dst: *mut u8, n: usize) {
    memset(dst, 0xFF, n);
}

/// Scoped temp-buffer pool. Slot memory is allocator-owned but
/// deliberately kept out of `cur_used`/`max_used` accounting — those
/// counters describe caller-visible `alloc`/`free` traffic, not this
/// subsystem's internal bookkeeping.
#[cfg(feature = "buf-pool")]
pub fn buf_get(size: usize) -> Option<NonNull<u8>> {
    if size == 0 {
        return Some(zero_sentinel_ptr());
    }
    let mut guard = state().lock();

    let mut best: Option<usize> = None;
    for i in 0..OS_MEM_BUF_MAX_NUM {
        let slot = guard.bufs[i];
        if slot.used || slot.ptr.is_none() || slot.size < size {
            continue;
        }
        if slot.size == size {
            best = Some(i);
            break;
        }
        best = match best {
            None => Some(i),
            Some(b) if slot.size < guard.bufs[b].size => Some(i),
            Some(b) => Some(b),
        };
    }
    if let Some(i) = best {
        guard.bufs[i].used = true;
        return guard.bufs[i].ptr;
    }

    let idx = (0..OS_MEM_BUF_MAX_NUM).find(|&i| !guard.bufs[i].used)?;
    let old = guard.bufs[idx].ptr;
    let new_ptr = guard.tlsf.realloc(old, size)?;
    guard.bufs[idx] = BufSlot {
        ptr: Some(new_ptr),
        size,
        used: true,
    };
    Some(new_ptr)
}

#[cfg(feature = "buf-pool")]
pub fn buf_release(ptr: NonNull<u8>) {
    let mut guard = state().lock();
    for slot in guard.bufs.iter_mut() {
        if slot.ptr == Some(ptr) {
            slot.used = false;
            return;
        }
    }
}

#[cfg(feature = "buf-pool")]
pub fn buf_free_all() {
    let mut guard = state().lock();
    for i in 0..OS_MEM_BUF_MAX_NUM {
        if let Some(p) = guard.bufs[i].ptr.take() {
            free_locked(&mut guard, p);
        }
        guard.bufs[i].used = false;
        guard.bufs[i].size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_byte_alloc_returns_stable_sentinel() {
        let _g = crate::test_sync::GLOBAL.lock().unwrap();
        init();
        let p1 = alloc(0).unwrap();
        let p2 = alloc(0).unwrap();
        assert_eq!(p1, p2);
        free(Some(p1));
        unsafe {
            assert_eq!(*(p1.as_ptr() as *const u32), ZERO_SENTINEL_VALUE);
        }
        assert_eq!(test(), MemTestResult::Ok);
    }

    #[test]
    fn alloc_then_free_updates_cur_used() {
        let _g = crate::test_sync::GLOBAL.lock().unwrap();
        init();
        let before = state().lock().cur_used;
        let p = alloc(64).unwrap();
        assert_eq!(state().lock().cur_used, before + 64);
        free(Some(p));
        assert_eq!(state().lock().cur_used, before);
    }

    #[test]
    fn memcpy_roundtrip_for_various_alignments_and_lengths() {
        for n in [0usize, 1, 3, 4, 5, 31, 32, 33, 100] {
            let src: Vec<u8> = (0..n as u8).collect();
            let mut dst = vec![0u8; n];
            memcpy(dst.as_mut_ptr(), src.as_ptr(), n);
            assert_eq!(dst, src);
        }
    }

    #[test]
    fn memset_00_and_ff_match_generic_memset() {
        let mut a = vec![0xAAu8; 40];
        let mut b = vec![0xAAu8; 40];
        memset_00(a.as_mut_ptr(), a.len());
        memset(b.as_mut_ptr(), 0x00, b.len());
        assert_eq!(a, b);

        memset_ff(a.as_mut_ptr(), a.len());
        memset(b.as_mut_ptr(), 0xFF, b.len());
        assert_eq!(a, b);
    }

    #[test]
    fn monitor_on_fresh_pool_reports_one_free_block() {
        let _g = crate::test_sync::GLOBAL.lock().unwrap();
        init();
        buf_free_all_if_enabled();
        let m = monitor();
        assert_eq!(m.total_size, OS_MEM_SIZE);
        assert_eq!(m.used_cnt, 0);
        assert_eq!(m.free_cnt, 1);
        // one free block's payload, short of total_size by header overhead
        assert!(m.free_biggest_size > 0 && m.free_biggest_size < m.total_size);
        assert_eq!(m.frag_pct, 0);
    }

    cfg_if::cfg_if! {
        if #[cfg(feature = "buf-pool")] {
            fn buf_free_all_if_enabled() {
                buf_free_all();
            }
        } else {
            fn buf_free_all_if_enabled() {}
        }
    }

    #[cfg(feature = "buf-pool")]
    #[test]
    fn buf_pool_reuses_released_slot() {
        let _g = crate::test_sync::GLOBAL.lock().unwrap();
        init();
        buf_free_all();
        let a = buf_get(32).unwrap();
        buf_release(a);
        let b = buf_get(16).unwrap();
        assert_eq!(a, b);
        buf_free_all();
    }
}
