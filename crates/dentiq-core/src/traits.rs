//! Seams between the engine and the outside world.
//!
//! `ChannelAdapter` is implemented per transport (WhatsApp, email);
//! `AppointmentDirectory` is the read-only window into appointment and
//! patient data owned by the clinic CRUD layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Appointment, ChannelKind, ChannelStatus, DeliveryOutcome, MessagePayload};

/// One outbound transport.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Whether the channel is switched on in configuration.
    fn is_enabled(&self) -> bool;

    /// Perform one outbound send and classify the result. Never returns an
    /// `Err` — every failure mode maps to a transient or permanent outcome
    /// so the queue engine can apply retry policy.
    async fn send(&self, recipient: &str, payload: &MessagePayload) -> DeliveryOutcome;

    /// Lightweight connectivity probe. Must complete within a bounded
    /// timeout; a slow provider shows up as an unhealthy status, not a hang.
    async fn health_check(&self) -> ChannelStatus;

    /// Reserve a slot under this channel's sends-per-minute cap. When this
    /// returns false the queue engine defers the job instead of sending.
    fn try_acquire_slot(&self) -> bool {
        true
    }
}

/// Read-only lookup of appointments and their patients.
#[async_trait]
pub trait AppointmentDirectory: Send + Sync {
    /// Fetch one appointment with its patient snapshot.
    async fn appointment(&self, id: &str) -> Result<Option<Appointment>>;

    /// Appointments starting in `[from, to)` that are still upcoming
    /// (scheduled or confirmed). Used by the reminder scan.
    async fn appointments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>>;
}
