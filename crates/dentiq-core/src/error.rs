//! Error taxonomy for the notification engine.
//!
//! Delivery failures (transient vs. permanent) are deliberately NOT part of
//! this enum — they are classified outcomes carried by `DeliveryOutcome` and
//! consumed by the queue engine's retry logic. This enum covers everything a
//! caller of the control surface can actually observe.

use thiserror::Error;

/// All errors surfaced by the notification engine.
#[derive(Debug, Error)]
pub enum DentiqError {
    /// Configuration missing, unreadable, or malformed.
    #[error("Config error: {0}")]
    Config(String),

    /// Job store (SQLite) failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Channel transport failure outside the send path (setup, probe).
    #[error("Channel error: {0}")]
    Channel(String),

    /// The referenced appointment does not exist.
    #[error("Appointment not found: {0}")]
    AppointmentNotFound(String),

    /// The referenced notification job does not exist.
    #[error("Notification not found: {0}")]
    NotificationNotFound(String),

    /// The referenced scheduled task does not exist.
    #[error("Scheduled task not found: {0}")]
    TaskNotFound(String),

    /// A scheduled task's runner returned an error or panicked.
    #[error("Task '{name}' failed: {message}")]
    TaskFailed { name: String, message: String },

    /// Operation rejected because the job is not in an eligible status,
    /// e.g. resending a job that is not Failed/Dead.
    #[error("Invalid status for job {id}: {status}")]
    InvalidStatus { id: String, status: String },

    /// Bad input: unknown channel, malformed date, unknown task name.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Template lookup or rendering failure.
    #[error("Template error: {0}")]
    Template(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for DentiqError {
    fn from(e: rusqlite::Error) -> Self {
        DentiqError::Store(e.to_string())
    }
}

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, DentiqError>;
