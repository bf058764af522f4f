//! # Dentiq Queue
//!
//! The dispatch side of the notification engine: a bounded worker pool that
//! claims due jobs from the store, invokes channel adapters, and applies
//! the explicit retry/backoff policy.

pub mod backoff;
pub mod engine;

pub use backoff::retry_delay;
pub use engine::{QueueEngine, QueueStats, ServiceStatus, spawn_queue_loop};
