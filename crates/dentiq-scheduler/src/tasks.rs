//! Scheduled-task data model.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use dentiq_core::error::Result;

use crate::cron::CronSpec;

/// When a task fires.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Lightweight 5-field cron expression, evaluated in UTC.
    Cron { expression: String },
    /// Every N seconds from the previous run.
    Interval { every_secs: u64 },
}

impl Schedule {
    pub fn cron(expression: impl Into<String>) -> Self {
        Self::Cron {
            expression: expression.into(),
        }
    }

    pub fn interval(every_secs: u64) -> Self {
        Self::Interval { every_secs }
    }

    /// Next fire time strictly after `after`. None for an unparsable cron.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron { expression } => {
                CronSpec::parse(expression).and_then(|spec| spec.next_after(after))
            }
            Self::Interval { every_secs } => Some(after + Duration::seconds(*every_secs as i64)),
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cron { expression } => write!(f, "cron({expression})"),
            Self::Interval { every_secs } => write!(f, "every {every_secs}s"),
        }
    }
}

/// Result of the most recent run attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Error(String),
    /// The task came due while disabled; nothing executed.
    Skipped,
}

/// Registry entry state, also the shape returned by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTask {
    pub name: String,
    pub schedule: Schedule,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<RunStatus>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
}

impl ScheduledTask {
    pub fn new(name: impl Into<String>, schedule: Schedule) -> Self {
        let next_run_at = schedule.next_after(Utc::now());
        Self {
            name: name.into(),
            schedule,
            enabled: true,
            last_run_at: None,
            last_run_status: None,
            next_run_at,
            run_count: 0,
        }
    }
}

/// The work a task performs. Returns a one-line summary for the run log.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_next_after() {
        let now = Utc::now();
        let next = Schedule::interval(90).next_after(now).unwrap();
        assert_eq!((next - now).num_seconds(), 90);
    }

    #[test]
    fn test_new_task_has_next_run() {
        let task = ScheduledTask::new("reminder-scan", Schedule::cron("0 7 * * *"));
        assert!(task.enabled);
        assert!(task.next_run_at.is_some());
        assert_eq!(task.run_count, 0);
    }

    #[test]
    fn test_bad_cron_yields_no_next_run() {
        assert!(Schedule::cron("nope").next_after(Utc::now()).is_none());
    }
}
