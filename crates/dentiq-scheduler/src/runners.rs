//! The two stock tasks: the daily reminder scan and terminal-job cleanup.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use dentiq_core::error::Result;
use dentiq_core::traits::AppointmentDirectory;
use dentiq_notify::Orchestrator;
use dentiq_queue::QueueEngine;

use crate::tasks::TaskRunner;

/// Scans upcoming appointments and queues a reminder job for each one.
/// Per-appointment failures are logged and counted but never abort the
/// scan; the summary carries the tally.
pub struct ReminderScanRunner {
    orchestrator: Arc<Orchestrator>,
    directory: Arc<dyn AppointmentDirectory>,
    scan_window_hours: i64,
}

impl ReminderScanRunner {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        directory: Arc<dyn AppointmentDirectory>,
        scan_window_hours: i64,
    ) -> Self {
        Self {
            orchestrator,
            directory,
            scan_window_hours,
        }
    }
}

#[async_trait]
impl TaskRunner for ReminderScanRunner {
    async fn run(&self) -> Result<String> {
        let now = Utc::now();
        let until = now + Duration::hours(self.scan_window_hours);
        let appointments = self.directory.appointments_between(now, until).await?;

        let mut queued = 0usize;
        let mut unreachable = 0usize;
        let mut failed = 0usize;
        for appointment in &appointments {
            match self
                .orchestrator
                .schedule_appointment_reminders(&appointment.id)
                .await
            {
                Ok(ids) if ids.is_empty() => unreachable += 1,
                Ok(ids) => queued += ids.len(),
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Reminder scan: appointment {} failed: {e}",
                        appointment.id
                    );
                    failed += 1;
                }
            }
        }
        Ok(format!(
            "scanned {} appointments, queued {queued} reminders ({unreachable} without contact, {failed} failed)",
            appointments.len()
        ))
    }
}

/// Purges Failed/Dead jobs older than the retention window.
pub struct CleanupRunner {
    engine: Arc<QueueEngine>,
    retention_days: i64,
}

impl CleanupRunner {
    pub fn new(engine: Arc<QueueEngine>, retention_days: i64) -> Self {
        Self {
            engine,
            retention_days,
        }
    }
}

#[async_trait]
impl TaskRunner for CleanupRunner {
    async fn run(&self) -> Result<String> {
        let removed = self.engine.cleanup_failed_jobs(self.retention_days)?;
        Ok(format!(
            "purged {removed} terminal jobs older than {} days",
            self.retention_days
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use dentiq_core::config::DentiqConfig;
    use dentiq_core::types::{Appointment, AppointmentStatus, Patient};
    use dentiq_notify::TemplateCatalog;
    use dentiq_store::{JobStore, SqliteDirectory};

    fn appointment(id: &str, phone: Option<&str>, start: DateTime<Utc>) -> Appointment {
        Appointment {
            id: id.into(),
            patient: Patient {
                id: format!("pat-{id}"),
                name: "Marta Ruiz".into(),
                phone: phone.map(String::from),
                email: None,
            },
            professional: "Dra. Vidal".into(),
            treatment: "Limpieza".into(),
            start_time: start,
            status: AppointmentStatus::Confirmed,
        }
    }

    fn setup(appointments: &[Appointment]) -> (ReminderScanRunner, Arc<JobStore>) {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let directory = SqliteDirectory::open_in_memory().unwrap();
        directory.ensure_schema().unwrap();
        for appt in appointments {
            directory.seed_appointment(appt).unwrap();
        }
        let directory: Arc<dyn AppointmentDirectory> = Arc::new(directory);
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            directory.clone(),
            TemplateCatalog::new(),
            &DentiqConfig::default(),
        ));
        (ReminderScanRunner::new(orchestrator, directory, 24), store)
    }

    #[tokio::test]
    async fn test_scan_queues_reminders_inside_window() {
        let now = Utc::now();
        let (runner, store) = setup(&[
            appointment("apt-1", Some("+34600111222"), now + Duration::hours(6)),
            appointment("apt-2", Some("+34600333444"), now + Duration::hours(12)),
            // Outside the 24h window, must not be scanned.
            appointment("apt-3", Some("+34600555666"), now + Duration::hours(48)),
        ]);

        let summary = runner.run().await.unwrap();
        assert!(summary.contains("queued 2 reminders"));
        assert_eq!(store.queue_counts().unwrap().pending, 2);
    }

    #[tokio::test]
    async fn test_scan_skips_contactless_and_continues() {
        let now = Utc::now();
        let (runner, store) = setup(&[
            appointment("apt-1", None, now + Duration::hours(6)),
            appointment("apt-2", Some("+34600333444"), now + Duration::hours(12)),
        ]);

        let summary = runner.run().await.unwrap();
        assert!(summary.contains("queued 1 reminders"));
        assert!(summary.contains("1 without contact"));
        assert_eq!(store.queue_counts().unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_empty_window() {
        let (runner, store) = setup(&[]);
        let summary = runner.run().await.unwrap();
        assert!(summary.contains("scanned 0 appointments"));
        assert_eq!(store.queue_counts().unwrap().pending, 0);
    }
}
