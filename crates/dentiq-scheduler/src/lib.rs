//! Named-task scheduler: a small registry of periodic maintenance tasks
//! (reminder scan, cleanup) driven by a tokio interval loop.

pub mod cron;
pub mod registry;
pub mod runners;
pub mod tasks;

pub use cron::CronSpec;
pub use registry::{SchedulerStats, TaskScheduler, spawn_scheduler};
pub use runners::{CleanupRunner, ReminderScanRunner};
pub use tasks::{RunStatus, Schedule, ScheduledTask, TaskRunner};
