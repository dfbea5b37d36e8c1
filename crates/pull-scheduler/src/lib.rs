//! Pull Scheduler
//!
//! Turns wall-clock time into "pull now" decisions, at a fixed or
//! exponentially distributed interval, optionally alternating between
//! active and downtime epochs.

mod scheduler;

pub use scheduler::{EpochConfig, PullScheduler, ScheduleConfig, ScheduleMode};
