//! Monotonic millisecond tick source (C1).
//!
//! The physical tick source — an interrupt or RTOS task incrementing the
//! counter — is an external collaborator; this module only
//! owns the counter storage and the torn-read-safe reader contract.
//!
//! `tick_inc` may run in an interrupt context concurrent with `tick_get`
//! running in task context. On a target where a `u32` store/load isn't
//! atomic end-to-end, a reader could observe a half-written value; the
//! flag-based re-read loop below recovers from that without a lock.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

static SYS_TIME: AtomicU32 = AtomicU32::new(0);
static TICK_IRQ_FLAG: AtomicBool = AtomicBool::new(true);

/// Called by the platform's tick interrupt/task every `period_ms`.
pub fn tick_inc(period_ms: u32) {
    TICK_IRQ_FLAG.store(false, Ordering::Relaxed);
    SYS_TIME.fetch_add(period_ms, Ordering::Relaxed);
    TICK_IRQ_FLAG.store(true, Ordering::Relaxed);
}

/// Reads the current tick count, retrying if a concurrent `tick_inc` was
/// observed mid-update.
///
/// Contract: set the flag, read the counter, and only accept the read if
/// the flag is still set afterward — `tick_inc` clears it for the
/// duration of its own update, so a reader that raced it sees the flag
/// drop and retries.
pub fn tick_get() -> u32 {
    loop {
        TICK_IRQ_FLAG.store(true, Ordering::Relaxed);
        let now = SYS_TIME.load(Ordering::Relaxed);
        if TICK_IRQ_FLAG.load(Ordering::Relaxed) {
            return now;
        }
    }
}

/// Elapsed milliseconds since `prev`, with explicit `u32` wraparound handling.
#[inline]
pub fn tick_elaps(prev: u32) -> u32 {
    tick_get().wrapping_sub(prev)
}

#[cfg(test)]
mod tests {
    // SYS_TIME is a process-wide singleton; serialize the tests that poke
    // it directly so they don't interleave across `cargo test` threads.
    use super::*;
    use core::sync::atomic::Ordering;

    #[test]
    fn inc_advances_counter() {
        let _guard = crate::test_sync::GLOBAL.lock().unwrap();
        SYS_TIME.store(0, Ordering::Relaxed);
        let t0 = tick_get();
        tick_inc(10);
        assert_eq!(tick_elaps(t0), 10);
    }

    #[test]
    fn elapsed_wraps_around_u32() {
        let _guard = crate::test_sync::GLOBAL.lock().unwrap();
        SYS_TIME.store(u32::MAX - 5, Ordering::Relaxed);
        let t0 = tick_get();
        tick_inc(10);
        assert_eq!(tick_elaps(t0), 10);
    }
}
