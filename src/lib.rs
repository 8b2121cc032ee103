//! `tlsf-rt`: a Two-Level Segregated Fit allocator and cooperative timer
//! scheduler over a single fixed memory region, for embedded targets with
//! no backing `GlobalAlloc`.
//!
//! Dependency order, leaves first: [`tick`] (C1) ← [`tlsf`] (C2) ← [`list`]
//! (C3, uses [`heap`] for node storage) ← [`heap`] (C4, uses [`tlsf`]) ←
//! [`timer`] (C5, uses [`tick`], [`list`], [`heap`]).
#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod error;
pub mod heap;
pub mod list;
pub(crate) mod log;
pub mod tick;
pub mod timer;
pub mod tlsf;

// Several modules' tests drive the same process-wide singletons (the heap,
// the tick counter, the timer scheduler) through plain `static`/`static mut`
// state rather than a per-test fixture, since that state is what the crate
// actually exposes at runtime. `cargo test`'s default thread-per-test runner
// would otherwise interleave them; everything that touches shared global
// state takes this lock first.
#[cfg(test)]
pub(crate) mod test_sync {
    pub static GLOBAL: std::sync::Mutex<()> = std::sync::Mutex::new(());
}
