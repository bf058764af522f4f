//! Core data model — notification jobs, delivery outcomes, and the
//! read-only appointment/patient snapshots the engine consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outbound message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    WhatsApp,
    Email,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::WhatsApp => "whatsapp",
            ChannelKind::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "whatsapp" => Some(ChannelKind::WhatsApp),
            "email" => Some(ChannelKind::Email),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a notification is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Confirmation,
    Reminder,
    Cancellation,
    Rescheduled,
    Custom,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Confirmation => "confirmation",
            NotificationKind::Reminder => "reminder",
            NotificationKind::Cancellation => "cancellation",
            NotificationKind::Rescheduled => "rescheduled",
            NotificationKind::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmation" => Some(NotificationKind::Confirmation),
            "reminder" => Some(NotificationKind::Reminder),
            "cancellation" => Some(NotificationKind::Cancellation),
            "rescheduled" => Some(NotificationKind::Rescheduled),
            "custom" => Some(NotificationKind::Custom),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a notification job.
///
/// Transitions are strictly `Pending → Processing → {Sent | Pending(retry)
/// | Failed | Dead}`; the Pending→Processing claim is the only
/// synchronization point and lives in the job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Sent,
    Delivered,
    Failed,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Sent => "sent",
            JobStatus::Delivered => "delivered",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "sent" => Some(JobStatus::Sent),
            "delivered" => Some(JobStatus::Delivered),
            "failed" => Some(JobStatus::Failed),
            "dead" => Some(JobStatus::Dead),
            _ => None,
        }
    }

    /// Terminal failure states eligible for cleanup.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Dead)
    }

    /// Only terminal failures may be resent.
    pub fn is_resendable(&self) -> bool {
        self.is_terminal_failure()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendered message content — variables already substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Subject line; used by email, ignored by WhatsApp.
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
}

impl MessagePayload {
    pub fn body(body: impl Into<String>) -> Self {
        Self { subject: None, body: body.into() }
    }

    pub fn with_subject(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self { subject: Some(subject.into()), body: body.into() }
    }
}

/// One unit of outbound work: one message, one channel, one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    /// Unique job ID.
    pub id: String,
    /// Originating appointment; None for ad-hoc sends.
    pub appointment_id: Option<String>,
    pub patient_id: String,
    pub channel: ChannelKind,
    pub kind: NotificationKind,
    /// Phone number or email address, snapshotted at creation so a later
    /// patient edit cannot redirect an in-flight send.
    pub recipient: String,
    pub payload: MessagePayload,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Earliest time a worker may pick this job up.
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationJob {
    /// Create a Pending job due at `next_attempt_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        appointment_id: Option<String>,
        patient_id: impl Into<String>,
        channel: ChannelKind,
        kind: NotificationKind,
        recipient: impl Into<String>,
        payload: MessagePayload,
        max_attempts: u32,
        next_attempt_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("ntf-{}", uuid::Uuid::new_v4()),
            appointment_id,
            patient_id: patient_id.into(),
            channel,
            kind,
            recipient: recipient.into(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            next_attempt_at,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Classified result of one send attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Accepted by the provider.
    Delivered,
    /// Network trouble, timeout, provider 5xx — retryable.
    Transient(String),
    /// Invalid recipient, malformed address, auth rejection — not retryable.
    Permanent(String),
}

/// Health snapshot reported by a channel adapter. Derived, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub channel: ChannelKind,
    pub enabled: bool,
    pub configured: bool,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

// ─── Read-only collaborator data ──────────────────────────────
// Owned by the clinic CRUD layer; the engine only reads snapshots.

/// Appointment lifecycle as the clinic app records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(AppointmentStatus::Scheduled),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            "completed" => Some(AppointmentStatus::Completed),
            _ => None,
        }
    }

    /// Statuses that still warrant reminders.
    pub fn is_upcoming(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Patient {
    /// Patients without any contact method are skipped, never failed.
    pub fn has_contact(&self) -> bool {
        self.phone.is_some() || self.email.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub patient: Patient,
    pub professional: String,
    pub treatment: String,
    pub start_time: DateTime<Utc>,
    pub status: AppointmentStatus,
}
