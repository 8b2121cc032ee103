//! Cooperative timer scheduler (C5): dispatches periodic callbacks using the
//! C1 tick, a C3 list of timers, and C4 for timer-node storage.
//!
//! Dispatch is tick-driven rather than interrupt-driven: `handler()` is
//! polled once per loop iteration and decides for itself whether anything
//! is due, rather than being invoked per-timer from an interrupt vector.
//!
//! The scheduler is single-threaded cooperative state, so it's
//! kept behind a raw `static mut` rather than a lock: a callback invoked
//! from inside `handler()` may itself call `create`/`del`, and those must
//! not contend with a lock `handler()` is still holding.

use core::mem::size_of;
use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::{DEF_PERIOD, IDLE_MEAS_PERIOD, OS_NO_TIMER_READY};
use crate::list::{List, ListNode};
use crate::log::debug;
use crate::tick::{tick_elaps, tick_get};

/// `{ period_ms, last_run_ms, callback, user_data, repeat_count, paused }`.
/// `repeat_count`: -1 = infinite, 0 = dead, n>0 = remaining firings.
#[repr(C)]
struct Timer {
    period_ms: u32,
    last_run_ms: u32,
    callback: Option<fn(*mut u8)>,
    user_data: *mut u8,
    repeat_count: i32,
    paused: bool,
}

/// Handle to a live timer, returned by `create`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(ListNode);

impl TimerHandle {
    fn as_ptr(self) -> *mut Timer {
        self.0.as_ptr() as *mut Timer
    }
}

struct Scheduler {
    list: List,
    enabled: bool,
    timer_deleted: bool,
    timer_created: bool,
    busy_time: u32,
    idle_period_start: u32,
    idle_last: u32,
    last_dispatch_tick: u32,
}

impl Scheduler {
    const fn new() -> Self {
        Scheduler {
            list: List::new(size_of::<Timer>()),
            enabled: true,
            timer_deleted: false,
            timer_created: false,
            busy_time: 0,
            idle_period_start: 0,
            idle_last: 100,
            last_dispatch_tick: 0,
        }
    }
}

static mut SCHED: Scheduler = Scheduler::new();
static mut LAST_POLL_TICK: u32 = 0;
static IN_HANDLER: AtomicBool = AtomicBool::new(false);

fn sched() -> &'static mut Scheduler {
    unsafe { &mut *addr_of_mut!(SCHED) }
}

fn time_remaining(t: &Timer) -> u32 {
    let elapsed = tick_elaps(t.last_run_ms);
    if elapsed >= t.period_ms {
        0
    } else {
        t.period_ms - elapsed
    }
}

/// Inserts a fresh timer at the list head with `repeat_count = -1` (infinite)
/// and sets `timer_created`.
pub fn create(callback: fn(*mut u8), period_ms: u32, user_data: *mut u8) -> Option<TimerHandle> {
    let s = sched();
    let node = s.list.ins_head()?;
    unsafe {
        (node.as_ptr() as *mut Timer).write(Timer {
            period_ms,
            last_run_ms: tick_get(),
            callback: Some(callback),
            user_data,
            repeat_count: -1,
            paused: false,
        });
    }
    s.timer_created = true;
    debug!("timer created: period={period_ms}ms");
    Some(TimerHandle(node))
}

/// `create` with `period_ms = DEF_PERIOD`, for callers with no opinion.
pub fn create_default(callback: fn(*mut u8), user_data: *mut u8) -> Option<TimerHandle> {
    create(callback, DEF_PERIOD, user_data)
}

/// Removes the timer from the list and sets `timer_deleted`.
pub fn del(handle: TimerHandle) {
    let s = sched();
    s.list.remove(handle.0);
    s.timer_deleted = true;
}

/// Backdates `last_run_ms` so the timer fires on the very next dispatch pass.
pub fn ready(handle: TimerHandle) {
    unsafe {
        let t = handle.as_ptr();
        (*t).last_run_ms = tick_get().wrapping_sub((*t).period_ms).wrapping_sub(1);
    }
}

pub fn reset(handle: TimerHandle) {
    unsafe {
        (*handle.as_ptr()).last_run_ms = tick_get();
    }
}

pub fn set_repeat_count(handle: TimerHandle, n: i32) {
    unsafe {
        (*handle.as_ptr()).repeat_count = n;
    }
}

pub fn set_period(handle: TimerHandle, period_ms: u32) {
    unsafe {
        (*handle.as_ptr()).period_ms = period_ms;
    }
}

pub fn set_cb(handle: TimerHandle, callback: fn(*mut u8)) {
    unsafe {
        (*handle.as_ptr()).callback = Some(callback);
    }
}

pub fn pause(handle: TimerHandle) {
    unsafe {
        (*handle.as_ptr()).paused = true;
    }
}

pub fn resume(handle: TimerHandle) {
    unsafe {
        (*handle.as_ptr()).paused = false;
    }
}

/// Globally enables or disables dispatch.
pub fn enable(on: bool) {
    sched().enabled = on;
}

/// Runs one timer if it's due.
///
/// Simplification: "the timer was not self-deleted" is approximated as "no
/// delete happened anywhere during this callback" rather than tracked
/// per-handle, since a delete of *any* timer already forces the caller
/// (`dispatch`) to restart the whole pass — the edge case this simplifies
/// away is a same-pass unrelated delete suppressing this timer's own
/// exhausted-repeat-count cleanup until the next pass.
/// Runs `handle` if it's due, returning whether a callback actually ran
/// (used by `dispatch` to gate `busy_time` accounting on real work rather
/// than the mere passage of time).
fn timer_exec(s: &mut Scheduler, handle: TimerHandle) -> bool {
    let t = handle.as_ptr();
    if unsafe { (*t).paused } {
        return false;
    }
    if unsafe { time_remaining(&*t) } != 0 {
        return false;
    }

    let original_repeat_count = unsafe { (*t).repeat_count };
    if original_repeat_count > 0 {
        unsafe {
            (*t).repeat_count -= 1;
        }
    }
    unsafe {
        (*t).last_run_ms = tick_get();
    }

    let deleted_before = s.timer_deleted;
    let mut fired = false;
    if original_repeat_count != 0 {
        let (cb, data) = unsafe { ((*t).callback, (*t).user_data) };
        if let Some(cb) = cb {
            cb(data);
            fired = true;
        }
    }

    if s.timer_deleted == deleted_before && unsafe { (*t).repeat_count } == 0 {
        s.list.remove(handle.0);
        s.timer_deleted = true;
    }
    fired
}

fn dispatch() -> u32 {
    let s = sched();
    let now = tick_get();
    let elapsed = tick_elaps(s.last_dispatch_tick);
    s.last_dispatch_tick = now;

    let mut any_fired = false;
    loop {
        s.timer_deleted = false;
        s.timer_created = false;
        let mut cur = s.list.get_head();
        let mut mutated = false;
        while let Some(node) = cur {
            let next = s.list.get_next(node);
            if timer_exec(s, TimerHandle(node)) {
                any_fired = true;
            }
            if s.timer_deleted || s.timer_created {
                mutated = true;
                break;
            }
            cur = next;
        }
        if !mutated {
            break;
        }
    }

    // Only the time actually spent running callbacks counts as busy; a
    // `dispatch()` call where nothing was due costs nothing towards it.
    if any_fired {
        s.busy_time = s.busy_time.saturating_add(elapsed);
    }
    let window = tick_elaps(s.idle_period_start);
    if window >= IDLE_MEAS_PERIOD {
        let busy_pct = (100 * s.busy_time / window.max(1)).min(100);
        s.idle_last = 100 - busy_pct;
        s.busy_time = 0;
        s.idle_period_start = now;
    }

    next_wake(s)
}

fn next_wake(s: &Scheduler) -> u32 {
    let mut min_remaining: Option<u32> = None;
    let mut cur = s.list.get_head();
    while let Some(node) = cur {
        let t = unsafe { &*(node.as_ptr() as *const Timer) };
        if !t.paused {
            let remaining = time_remaining(t);
            min_remaining = Some(match min_remaining {
                Some(m) if m <= remaining => m,
                _ => remaining,
            });
        }
        cur = s.list.get_next(node);
    }
    min_remaining.unwrap_or(OS_NO_TIMER_READY)
}

/// Percentage of the last `IDLE_MEAS_PERIOD` window the handler was idle.
pub fn idle_last() -> u32 {
    sched().idle_last
}

/// Cooperative dispatch loop. Re-entrant calls (from inside a running
/// callback) and calls while globally disabled both return `1` immediately
/// without touching the timer list.
pub fn handler() -> u32 {
    if IN_HANDLER.swap(true, Ordering::Acquire) {
        return 1;
    }
    let result = if sched().enabled {
        dispatch()
    } else {
        1
    };
    IN_HANDLER.store(false, Ordering::Release);
    result
}

/// Rate-limits calls to `handler()` against the tick source, for callers
/// that want a fixed poll cadence instead of calling `handler()` every
/// loop iteration.
pub fn handler_run_in_period(period_ms: u32) -> u32 {
    let last = unsafe { core::ptr::read(addr_of_mut!(LAST_POLL_TICK)) };
    if tick_elaps(last) < period_ms {
        return OS_NO_TIMER_READY;
    }
    unsafe {
        core::ptr::write(addr_of_mut!(LAST_POLL_TICK), tick_get());
    }
    handler()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::tick_inc;
    use core::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    static FIRE_COUNT: AtomicU32 = AtomicU32::new(0);
    static REENTRANT_RESULT: AtomicU32 = AtomicU32::new(0);

    fn reset_scheduler() {
        sched().list.clear();
        sched().enabled = true;
        sched().timer_deleted = false;
        sched().timer_created = false;
        sched().busy_time = 0;
        sched().idle_period_start = 0;
        sched().idle_last = 100;
    }

    fn counting_cb(_data: *mut u8) {
        FIRE_COUNT.fetch_add(1, AtomicOrdering::SeqCst);
    }

    #[test]
    fn timer_fires_exactly_repeat_count_times() {
        let _g = crate::test_sync::GLOBAL.lock().unwrap();
        crate::heap::init();
        reset_scheduler();
        FIRE_COUNT.store(0, AtomicOrdering::SeqCst);

        let h = create(counting_cb, 10, core::ptr::null_mut()).unwrap();
        set_repeat_count(h, 3);

        for _ in 0..4 {
            tick_inc(10);
            handler();
        }

        assert_eq!(FIRE_COUNT.load(AtomicOrdering::SeqCst), 3);
        assert!(sched().list.is_empty());
    }

    fn self_deleting_cb(data: *mut u8) {
        let handle = unsafe { *(data as *const TimerHandle) };
        del(handle);
    }

    #[test]
    fn self_deleting_callback_does_not_crash_or_dangle() {
        let _g = crate::test_sync::GLOBAL.lock().unwrap();
        crate::heap::init();
        reset_scheduler();

        let h = create(self_deleting_cb, 5, core::ptr::null_mut()).unwrap();
        let h_box = h;
        set_cb(h, self_deleting_cb);
        // user_data points at the handle itself so the callback can name it.
        unsafe {
            (*h.as_ptr()).user_data = &h_box as *const TimerHandle as *mut u8;
        }
        ready(h);
        tick_inc(1);
        handler();

        assert!(sched().list.is_empty());
    }

    fn reentrant_cb(_data: *mut u8) {
        let result = handler();
        REENTRANT_RESULT.store(result, AtomicOrdering::SeqCst);
    }

    #[test]
    fn reentrant_handler_call_returns_one_without_redispatch() {
        let _g = crate::test_sync::GLOBAL.lock().unwrap();
        crate::heap::init();
        reset_scheduler();

        let h = create(reentrant_cb, 5, core::ptr::null_mut()).unwrap();
        ready(h);
        tick_inc(1);
        handler();

        assert_eq!(REENTRANT_RESULT.load(AtomicOrdering::SeqCst), 1);
        del(h);
    }

    #[test]
    fn disabled_scheduler_returns_one_and_does_not_dispatch() {
        let _g = crate::test_sync::GLOBAL.lock().unwrap();
        crate::heap::init();
        reset_scheduler();
        FIRE_COUNT.store(0, AtomicOrdering::SeqCst);

        let h = create(counting_cb, 5, core::ptr::null_mut()).unwrap();
        ready(h);
        enable(false);
        tick_inc(1);
        assert_eq!(handler(), 1);
        assert_eq!(FIRE_COUNT.load(AtomicOrdering::SeqCst), 0);

        enable(true);
        del(h);
    }

    #[test]
    fn idle_last_stays_high_when_nothing_fires() {
        let _g = crate::test_sync::GLOBAL.lock().unwrap();
        crate::heap::init();
        reset_scheduler();

        // No timers at all: every dispatch across the window is pure idle.
        for _ in 0..(IDLE_MEAS_PERIOD + 10) {
            tick_inc(1);
            handler();
        }

        assert_eq!(idle_last(), 100);
    }

    #[test]
    fn idle_last_drops_when_a_timer_fires_every_tick() {
        let _g = crate::test_sync::GLOBAL.lock().unwrap();
        crate::heap::init();
        reset_scheduler();
        FIRE_COUNT.store(0, AtomicOrdering::SeqCst);

        let h = create(counting_cb, 1, core::ptr::null_mut()).unwrap();
        ready(h);

        for _ in 0..(IDLE_MEAS_PERIOD + 10) {
            tick_inc(1);
            handler();
        }

        assert!(idle_last() < 100);
        assert!(FIRE_COUNT.load(AtomicOrdering::SeqCst) > 0);

        del(h);
    }
}
