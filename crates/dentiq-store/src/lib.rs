//! # Dentiq Store
//!
//! Durable state for the notification engine: the SQLite job store (the
//! single synchronization point for claims, retries, and resends) and a
//! read-only directory over the clinic's appointment and patient tables.

pub mod directory;
pub mod filter;
pub mod jobs;

pub use directory::SqliteDirectory;
pub use filter::{JobFilter, Page, PageRequest, Pagination, SortBy, SortOrder};
pub use jobs::{JobStats, JobStore, QueueCounts, ResendOutcome};
