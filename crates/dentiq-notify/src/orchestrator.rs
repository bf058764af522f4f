//! Notification orchestrator — turns appointment events into channel jobs.
//!
//! Channel policy for patients with both phone and email: Confirmation,
//! Cancellation, Rescheduled, and Custom go out on BOTH channels; Reminder
//! is single-channel (WhatsApp preferred, email fallback) so recurring
//! reminders never double-ping a patient.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use dentiq_core::config::{DentiqConfig, QueueConfig, ReminderConfig};
use dentiq_core::error::{DentiqError, Result};
use dentiq_core::traits::AppointmentDirectory;
use dentiq_core::types::{
    Appointment, ChannelKind, MessagePayload, NotificationJob, NotificationKind, Patient,
};
use dentiq_store::{JobFilter, JobStats, JobStore, Page, PageRequest, ResendOutcome};

use crate::templates::TemplateCatalog;

pub struct Orchestrator {
    store: Arc<JobStore>,
    directory: Arc<dyn AppointmentDirectory>,
    templates: TemplateCatalog,
    queue: QueueConfig,
    reminder: ReminderConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<JobStore>,
        directory: Arc<dyn AppointmentDirectory>,
        templates: TemplateCatalog,
        config: &DentiqConfig,
    ) -> Self {
        Self {
            store,
            directory,
            templates,
            queue: config.queue.clone(),
            reminder: config.reminder.clone(),
        }
    }

    /// Which channels this notification kind reaches for this patient.
    /// Returns (channel, recipient) pairs; empty when the patient has no
    /// contact method at all.
    fn select_channels(patient: &Patient, kind: NotificationKind) -> Vec<(ChannelKind, String)> {
        let phone = patient.phone.as_deref().filter(|p| !p.trim().is_empty());
        let email = patient.email.as_deref().filter(|e| !e.trim().is_empty());

        let mut targets = Vec::new();
        match kind {
            NotificationKind::Reminder => {
                if let Some(p) = phone {
                    targets.push((ChannelKind::WhatsApp, p.to_string()));
                } else if let Some(e) = email {
                    targets.push((ChannelKind::Email, e.to_string()));
                }
            }
            _ => {
                if let Some(p) = phone {
                    targets.push((ChannelKind::WhatsApp, p.to_string()));
                }
                if let Some(e) = email {
                    targets.push((ChannelKind::Email, e.to_string()));
                }
            }
        }
        targets
    }

    async fn load_appointment(&self, id: &str) -> Result<Appointment> {
        self.directory
            .appointment(id)
            .await?
            .ok_or_else(|| DentiqError::AppointmentNotFound(id.to_string()))
    }

    fn render(
        &self,
        kind: NotificationKind,
        channel: ChannelKind,
        appointment: &Appointment,
        custom_message: Option<&str>,
    ) -> Result<MessagePayload> {
        match custom_message {
            Some(message) => Ok(self.templates.render_custom(channel, message)),
            None => self.templates.render(kind, channel, appointment),
        }
    }

    /// Create and persist Pending jobs for one appointment event. Returns
    /// the created job IDs; an empty Vec means the patient is unreachable
    /// (no contact method) — a no-op, not an error.
    pub async fn send_appointment_notification(
        &self,
        appointment_id: &str,
        kind: NotificationKind,
        custom_message: Option<&str>,
    ) -> Result<Vec<String>> {
        if kind == NotificationKind::Custom && custom_message.is_none() {
            return Err(DentiqError::Validation(
                "custom notifications require a message".into(),
            ));
        }
        let appointment = self.load_appointment(appointment_id).await?;
        self.create_jobs(&appointment, kind, custom_message, Utc::now())
    }

    /// Create reminder jobs due `lead_time_hours` before the appointment
    /// starts. A lead time already in the past schedules for immediate
    /// dispatch rather than silently dropping the reminder.
    pub async fn schedule_appointment_reminders(
        &self,
        appointment_id: &str,
    ) -> Result<Vec<String>> {
        let appointment = self.load_appointment(appointment_id).await?;
        let now = Utc::now();
        let due = appointment.start_time - Duration::hours(self.reminder.lead_time_hours);
        let due = due.max(now);
        self.create_jobs(&appointment, NotificationKind::Reminder, None, due)
    }

    fn create_jobs(
        &self,
        appointment: &Appointment,
        kind: NotificationKind,
        custom_message: Option<&str>,
        due: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let targets = Self::select_channels(&appointment.patient, kind);
        if targets.is_empty() {
            tracing::debug!(
                "Patient {} has no contact method, skipping {kind}",
                appointment.patient.id
            );
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(targets.len());
        for (channel, recipient) in targets {
            let payload = self.render(kind, channel, appointment, custom_message)?;
            let job = NotificationJob::new(
                Some(appointment.id.clone()),
                appointment.patient.id.clone(),
                channel,
                kind,
                recipient,
                payload,
                self.queue.max_attempts,
                due,
            );
            self.store.insert(&job)?;
            tracing::info!(
                "📨 Queued {kind} for appointment {} on {channel} (job {})",
                appointment.id,
                job.id
            );
            ids.push(job.id);
        }
        Ok(ids)
    }

    /// Reset a Failed/Dead job for a fresh attempt cycle.
    pub async fn resend_failed_notification(&self, job_id: &str) -> Result<()> {
        match self.store.resend(job_id)? {
            ResendOutcome::Reset => {
                tracing::info!("🔄 Notification {job_id} reset for resend");
                Ok(())
            }
            ResendOutcome::NotFound => Err(DentiqError::NotificationNotFound(job_id.to_string())),
            ResendOutcome::InvalidStatus(status) => Err(DentiqError::InvalidStatus {
                id: job_id.to_string(),
                status: status.to_string(),
            }),
        }
    }

    /// Filtered, paginated notification listing.
    pub fn get_notifications(
        &self,
        filter: &JobFilter,
        page: &PageRequest,
    ) -> Result<Page<NotificationJob>> {
        self.store.list(filter, page)
    }

    /// Aggregate counts by status/channel/kind.
    pub fn get_notification_stats(&self, since: Option<DateTime<Utc>>) -> Result<JobStats> {
        self.store.stats(since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dentiq_core::types::{AppointmentStatus, JobStatus};
    use dentiq_store::SqliteDirectory;

    fn make_appointment(id: &str, phone: Option<&str>, email: Option<&str>) -> Appointment {
        Appointment {
            id: id.into(),
            patient: Patient {
                id: format!("pat-{id}"),
                name: "Jorge Lema".into(),
                phone: phone.map(String::from),
                email: email.map(String::from),
            },
            professional: "Dr. Soler".into(),
            treatment: "Endodoncia".into(),
            start_time: Utc::now() + Duration::days(3),
            status: AppointmentStatus::Scheduled,
        }
    }

    fn setup(appointments: &[Appointment]) -> (Orchestrator, Arc<JobStore>) {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let directory = SqliteDirectory::open_in_memory().unwrap();
        directory.ensure_schema().unwrap();
        for appt in appointments {
            directory.seed_appointment(appt).unwrap();
        }
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(directory),
            TemplateCatalog::new(),
            &DentiqConfig::default(),
        );
        (orchestrator, store)
    }

    #[tokio::test]
    async fn test_phone_only_patient_gets_one_whatsapp_job() {
        let (orch, store) = setup(&[make_appointment("apt-1", Some("+34600111222"), None)]);
        let ids = orch
            .send_appointment_notification("apt-1", NotificationKind::Confirmation, None)
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);

        let job = store.get(&ids[0]).unwrap().unwrap();
        assert_eq!(job.channel, ChannelKind::WhatsApp);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.recipient, "+34600111222");
        assert!(job.payload.body.contains("Jorge Lema"));
    }

    #[tokio::test]
    async fn test_both_contacts_confirmation_goes_to_both_channels() {
        let (orch, store) = setup(&[make_appointment(
            "apt-2",
            Some("+34600111222"),
            Some("jorge@example.com"),
        )]);
        let ids = orch
            .send_appointment_notification("apt-2", NotificationKind::Confirmation, None)
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);

        let channels: Vec<_> = ids
            .iter()
            .map(|id| store.get(id).unwrap().unwrap().channel)
            .collect();
        assert!(channels.contains(&ChannelKind::WhatsApp));
        assert!(channels.contains(&ChannelKind::Email));
    }

    #[tokio::test]
    async fn test_reminder_prefers_whatsapp_single_channel() {
        let (orch, store) = setup(&[make_appointment(
            "apt-3",
            Some("+34600111222"),
            Some("jorge@example.com"),
        )]);
        let ids = orch
            .send_appointment_notification("apt-3", NotificationKind::Reminder, None)
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.get(&ids[0]).unwrap().unwrap().channel, ChannelKind::WhatsApp);
    }

    #[tokio::test]
    async fn test_contactless_patient_is_a_noop() {
        let (orch, store) = setup(&[make_appointment("apt-4", None, None)]);
        let ids = orch
            .send_appointment_notification("apt-4", NotificationKind::Confirmation, None)
            .await
            .unwrap();
        assert!(ids.is_empty());
        assert_eq!(store.queue_counts().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_unknown_appointment_errors() {
        let (orch, _store) = setup(&[]);
        let err = orch
            .send_appointment_notification("apt-nope", NotificationKind::Confirmation, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DentiqError::AppointmentNotFound(_)));
    }

    #[tokio::test]
    async fn test_custom_requires_message() {
        let (orch, _store) = setup(&[make_appointment("apt-5", Some("+34"), None)]);
        let err = orch
            .send_appointment_notification("apt-5", NotificationKind::Custom, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DentiqError::Validation(_)));

        let ids = orch
            .send_appointment_notification("apt-5", NotificationKind::Custom, Some("Feliz año"))
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_reminder_due_at_lead_time_before_start() {
        let mut appt = make_appointment("apt-6", Some("+34600111222"), None);
        appt.start_time = Utc::now() + Duration::days(3);
        let (orch, store) = setup(&[appt.clone()]);

        let ids = orch.schedule_appointment_reminders("apt-6").await.unwrap();
        let job = store.get(&ids[0]).unwrap().unwrap();
        let expected = appt.start_time - Duration::hours(24);
        assert!((job.next_attempt_at - expected).num_seconds().abs() <= 1);
        assert_eq!(job.kind, NotificationKind::Reminder);
    }

    #[tokio::test]
    async fn test_past_lead_time_schedules_immediately() {
        let mut appt = make_appointment("apt-7", Some("+34600111222"), None);
        // Starts in 2 hours: T - 24h is long past.
        appt.start_time = Utc::now() + Duration::hours(2);
        let (orch, store) = setup(&[appt]);

        let before = Utc::now();
        let ids = orch.schedule_appointment_reminders("apt-7").await.unwrap();
        let job = store.get(&ids[0]).unwrap().unwrap();
        assert!(job.next_attempt_at >= before);
        assert!(job.next_attempt_at <= Utc::now() + Duration::seconds(2));
    }

    #[tokio::test]
    async fn test_resend_error_mapping() {
        let (orch, store) = setup(&[make_appointment("apt-8", Some("+34600111222"), None)]);
        let ids = orch
            .send_appointment_notification("apt-8", NotificationKind::Confirmation, None)
            .await
            .unwrap();

        // Pending job: invalid status for resend.
        let err = orch.resend_failed_notification(&ids[0]).await.unwrap_err();
        assert!(matches!(err, DentiqError::InvalidStatus { .. }));

        store.claim(&ids[0]).unwrap();
        store.mark_failed(&ids[0], "bad number").unwrap();
        orch.resend_failed_notification(&ids[0]).await.unwrap();
        assert_eq!(store.get(&ids[0]).unwrap().unwrap().status, JobStatus::Pending);

        let err = orch.resend_failed_notification("ntf-nope").await.unwrap_err();
        assert!(matches!(err, DentiqError::NotificationNotFound(_)));
    }

    #[tokio::test]
    async fn test_listing_and_stats_surface() {
        let (orch, _store) = setup(&[make_appointment(
            "apt-9",
            Some("+34600111222"),
            Some("jorge@example.com"),
        )]);
        orch.send_appointment_notification("apt-9", NotificationKind::Confirmation, None)
            .await
            .unwrap();

        let page = orch
            .get_notifications(&JobFilter::default(), &PageRequest::default())
            .unwrap();
        assert_eq!(page.pagination.total, 2);

        let stats = orch.get_notification_stats(None).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.total, stats.by_status.values().sum::<u64>());
    }
}
