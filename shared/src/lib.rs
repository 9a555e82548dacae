//! Plumbing shared by the `dns` and `dhcp` crates: a clock abstraction so
//! lease/cache expiry can be tested deterministically, and a small
//! ticker-plus-cancellation helper for the background workers both
//! subsystems run (cache sweep, health checker, lease cleanup, stats).

pub mod clock;
pub mod worker;

pub use clock::{Clock, FixedClock, SystemClock};
pub use worker::{CancelToken, spawn_periodic};
