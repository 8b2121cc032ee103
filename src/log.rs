//! Structured logging facade.
//!
//! The allocator and scheduler never decide where a log line ends up —
//! that's the embedding application's job. This crate just emits `log`
//! crate records at error/consistency boundaries; wiring a sink
//! (`log::set_logger`) is the caller's responsibility, not this crate's.
//!
//! Hot paths (`tick_get`, the mapping functions, block split/coalesce)
//! deliberately do not log: formatting a record would defeat the O(1)
//! bound this crate exists to provide.

pub(crate) use log::{debug, error, trace, warn};
