//! # Dentiq Core
//!
//! Shared foundation of the notification dispatch engine: the job data
//! model, the error taxonomy, configuration, and the traits that seam the
//! engine off from transports and clinic data.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::DentiqConfig;
pub use error::{DentiqError, Result};
pub use traits::{AppointmentDirectory, ChannelAdapter};
pub use types::{
    Appointment, AppointmentStatus, ChannelKind, ChannelStatus, DeliveryOutcome, JobStatus,
    MessagePayload, NotificationJob, NotificationKind, Patient,
};
