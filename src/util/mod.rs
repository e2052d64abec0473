//! Shared utilities: clocks and timers

pub mod time;
pub mod timer;

pub use time::{Clock, ManualClock, SystemClock};
pub use timer::{ManualScheduler, Scheduler, TimerHandle, TokioScheduler};
