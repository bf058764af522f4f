//! SQLite-backed notification job store.
//!
//! This is the durability boundary of the whole engine. Every worker-visible
//! transition goes through a conditional UPDATE against this store; the
//! Pending→Processing claim and the resend reset are single compare-and-set
//! statements, so concurrent workers and concurrent admin requests serialize
//! here and nowhere else.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params, params_from_iter};
use serde::Serialize;

use dentiq_core::error::{DentiqError, Result};
use dentiq_core::types::{
    ChannelKind, JobStatus, MessagePayload, NotificationJob, NotificationKind,
};

use crate::filter::{JobFilter, Page, PageRequest, Pagination};

/// Fixed-width UTC timestamp so TEXT comparison in SQL orders correctly.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            tracing::warn!("⚠️ Unparsable stored timestamp '{s}' ({e}), substituting now");
            Utc::now()
        })
}

/// Result of a resend compare-and-set.
#[derive(Debug, Clone, PartialEq)]
pub enum ResendOutcome {
    /// Job was Failed/Dead and has been reset to Pending, attempts=0.
    Reset,
    /// No job with that ID.
    NotFound,
    /// Job exists but its status does not allow resending.
    InvalidStatus(JobStatus),
}

/// Pending/processing/terminal counts straight from the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub processing: u64,
    pub sent: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dead: u64,
}

/// Aggregate notification stats. `total` always equals the sum of
/// `by_status` values.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_channel: BTreeMap<String, u64>,
    pub by_kind: BTreeMap<String, u64>,
}

/// Durable repository of notification jobs.
pub struct JobStore {
    conn: Mutex<Connection>,
}

const JOB_COLUMNS: &str = "id, appointment_id, patient_id, channel, kind, recipient, subject, \
     body, status, attempts, max_attempts, next_attempt_at, last_error, created_at, updated_at";

impl JobStore {
    /// Open or create the job database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| DentiqError::Store(format!("DB open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DentiqError::Store(format!("DB open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS notification_jobs (
                id TEXT PRIMARY KEY,
                appointment_id TEXT,
                patient_id TEXT NOT NULL,
                channel TEXT NOT NULL,            -- 'whatsapp', 'email'
                kind TEXT NOT NULL,               -- 'confirmation', 'reminder', ...
                recipient TEXT NOT NULL,
                subject TEXT,
                body TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                next_attempt_at TEXT NOT NULL,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_due
                ON notification_jobs (status, next_attempt_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_patient
                ON notification_jobs (patient_id);
            ",
        )
        .map_err(|e| DentiqError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means a panic mid-statement; propagating the
        // poison would wedge every later caller, so take the guard anyway.
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Persist a freshly built job.
    pub fn insert(&self, job: &NotificationJob) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO notification_jobs
             (id, appointment_id, patient_id, channel, kind, recipient, subject, body,
              status, attempts, max_attempts, next_attempt_at, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                job.id,
                job.appointment_id,
                job.patient_id,
                job.channel.as_str(),
                job.kind.as_str(),
                job.recipient,
                job.payload.subject,
                job.payload.body,
                job.status.as_str(),
                job.attempts,
                job.max_attempts,
                ts(job.next_attempt_at),
                job.last_error,
                ts(job.created_at),
                ts(job.updated_at),
            ],
        )?;
        tracing::debug!("💾 Job stored: {} ({} {})", job.id, job.channel, job.kind);
        Ok(())
    }

    /// Fetch one job by ID.
    pub fn get(&self, id: &str) -> Result<Option<NotificationJob>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM notification_jobs WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map([id], row_to_job)?;
        match rows.next() {
            Some(job) => Ok(Some(job?)),
            None => Ok(None),
        }
    }

    /// Pending jobs whose `next_attempt_at` has passed, oldest due first.
    pub fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<NotificationJob>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM notification_jobs
             WHERE status = 'pending' AND next_attempt_at <= ?1
             ORDER BY next_attempt_at ASC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![ts(now), limit as i64], row_to_job)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    /// Atomic Pending→Processing claim. Returns false if another worker
    /// already transitioned the job — the loser must walk away.
    pub fn claim(&self, id: &str) -> Result<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE notification_jobs
             SET status = 'processing', updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![ts(Utc::now()), id],
        )?;
        Ok(changed == 1)
    }

    /// Successful send: Processing→Sent.
    pub fn mark_sent(&self, id: &str) -> Result<()> {
        self.set_terminal(id, JobStatus::Sent, None)
    }

    /// Provider-confirmed delivery. Nothing flips this automatically today;
    /// it exists for a future delivery-receipt callback.
    pub fn mark_delivered(&self, id: &str) -> Result<()> {
        self.set_terminal(id, JobStatus::Delivered, None)
    }

    /// Permanent failure: no automatic retry, stays queryable and
    /// resendable until cleanup.
    pub fn mark_failed(&self, id: &str, reason: &str) -> Result<()> {
        self.set_terminal(id, JobStatus::Failed, Some(reason))
    }

    /// Retry budget exhausted. Persists the final attempt count so a dead
    /// job records how many sends it actually consumed.
    pub fn mark_dead(&self, id: &str, attempts: u32, reason: &str) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE notification_jobs
             SET status = 'dead', attempts = ?1, last_error = ?2, updated_at = ?3
             WHERE id = ?4",
            params![attempts, reason, ts(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(DentiqError::NotificationNotFound(id.to_string()));
        }
        Ok(())
    }

    fn set_terminal(&self, id: &str, status: JobStatus, reason: Option<&str>) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE notification_jobs
             SET status = ?1, last_error = COALESCE(?2, last_error), updated_at = ?3
             WHERE id = ?4",
            params![status.as_str(), reason, ts(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(DentiqError::NotificationNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Transient failure with budget left: back to Pending with a bumped
    /// attempt counter and a later due time.
    pub fn reschedule(
        &self,
        id: &str,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE notification_jobs
             SET status = 'pending', attempts = ?1, next_attempt_at = ?2,
                 last_error = ?3, updated_at = ?4
             WHERE id = ?5",
            params![attempts, ts(next_attempt_at), reason, ts(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(DentiqError::NotificationNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Rate-limit deferral: nudge `next_attempt_at` forward without
    /// consuming an attempt. Only touches jobs still Pending.
    pub fn defer(&self, id: &str, next_attempt_at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE notification_jobs
             SET next_attempt_at = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            params![ts(next_attempt_at), ts(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Reset a Failed/Dead job for a fresh attempt cycle. The status-guarded
    /// UPDATE is the serialization point: concurrent resends of the same job
    /// collapse to a single effective reschedule.
    pub fn resend(&self, id: &str) -> Result<ResendOutcome> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE notification_jobs
             SET status = 'pending', attempts = 0, next_attempt_at = ?1,
                 last_error = NULL, updated_at = ?1
             WHERE id = ?2 AND status IN ('failed', 'dead')",
            params![ts(Utc::now()), id],
        )?;
        if changed == 1 {
            return Ok(ResendOutcome::Reset);
        }
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM notification_jobs WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match status {
            None => Ok(ResendOutcome::NotFound),
            Some(s) => Ok(ResendOutcome::InvalidStatus(
                JobStatus::parse(&s).unwrap_or(JobStatus::Pending),
            )),
        }
    }

    /// Filtered, paginated listing for the admin surface.
    pub fn list(&self, filter: &JobFilter, page: &PageRequest) -> Result<Page<NotificationJob>> {
        let page = page.normalized();
        let (where_sql, args) = build_where(filter);

        let conn = self.lock();
        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM notification_jobs {where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get::<_, i64>(0).map(|n| n as u64),
        )?;

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM notification_jobs {where_sql}
             ORDER BY {} {} LIMIT {} OFFSET {}",
            page.sort_by.column(),
            page.sort_order.keyword(),
            page.limit,
            page.offset(),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), row_to_job)?;
        let mut data = Vec::new();
        for row in rows {
            data.push(row?);
        }

        Ok(Page {
            data,
            pagination: Pagination::new(page.page, page.limit, total),
        })
    }

    /// Aggregate counts by status/channel/kind, optionally restricted to
    /// jobs created since `since`.
    pub fn stats(&self, since: Option<DateTime<Utc>>) -> Result<JobStats> {
        let conn = self.lock();
        let (cond, args): (&str, Vec<String>) = match since {
            Some(t) => ("WHERE created_at >= ?1", vec![ts(t)]),
            None => ("", vec![]),
        };

        let mut stats = JobStats::default();
        for (column, bucket) in [("status", 0usize), ("channel", 1), ("kind", 2)] {
            let sql = format!(
                "SELECT {column}, COUNT(*) FROM notification_jobs {cond} GROUP BY {column}"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?;
            for row in rows {
                let (key, count) = row?;
                let map = match bucket {
                    0 => &mut stats.by_status,
                    1 => &mut stats.by_channel,
                    _ => &mut stats.by_kind,
                };
                map.insert(key, count);
            }
        }
        stats.total = stats.by_status.values().sum();
        Ok(stats)
    }

    /// Per-status counts for the queue stats surface.
    pub fn queue_counts(&self) -> Result<QueueCounts> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM notification_jobs GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        let mut counts = QueueCounts::default();
        for row in rows {
            let (status, n) = row?;
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => counts.pending = n,
                Some(JobStatus::Processing) => counts.processing = n,
                Some(JobStatus::Sent) => counts.sent = n,
                Some(JobStatus::Delivered) => counts.delivered = n,
                Some(JobStatus::Failed) => counts.failed = n,
                Some(JobStatus::Dead) => counts.dead = n,
                None => {}
            }
        }
        Ok(counts)
    }

    /// Delete Failed/Dead jobs last touched before `older_than`. Returns the
    /// number of rows removed.
    pub fn purge_terminal(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM notification_jobs
             WHERE status IN ('failed', 'dead') AND updated_at < ?1",
            params![ts(older_than)],
        )?;
        if removed > 0 {
            tracing::info!("🧹 Purged {removed} terminal notification job(s)");
        }
        Ok(removed as u64)
    }

    /// Cheap reachability probe for the health surface.
    pub fn ping(&self) -> bool {
        let conn = self.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationJob> {
    let channel_str: String = row.get(3)?;
    let kind_str: String = row.get(4)?;
    let status_str: String = row.get(8)?;
    let next_attempt_at: String = row.get(11)?;
    let created_at: String = row.get(13)?;
    let updated_at: String = row.get(14)?;

    Ok(NotificationJob {
        id: row.get(0)?,
        appointment_id: row.get(1)?,
        patient_id: row.get(2)?,
        channel: ChannelKind::parse(&channel_str).unwrap_or(ChannelKind::Email),
        kind: NotificationKind::parse(&kind_str).unwrap_or(NotificationKind::Custom),
        recipient: row.get(5)?,
        payload: MessagePayload {
            subject: row.get(6)?,
            body: row.get(7)?,
        },
        status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Pending),
        attempts: row.get(9)?,
        max_attempts: row.get(10)?,
        next_attempt_at: parse_ts(&next_attempt_at),
        last_error: row.get(12)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

fn build_where(filter: &JobFilter) -> (String, Vec<String>) {
    let mut conds = Vec::new();
    let mut args = Vec::new();

    if let Some(status) = filter.status {
        args.push(status.as_str().to_string());
        conds.push(format!("status = ?{}", args.len()));
    }
    if let Some(kind) = filter.kind {
        args.push(kind.as_str().to_string());
        conds.push(format!("kind = ?{}", args.len()));
    }
    if let Some(channel) = filter.channel {
        args.push(channel.as_str().to_string());
        conds.push(format!("channel = ?{}", args.len()));
    }
    if let Some(patient_id) = &filter.patient_id {
        args.push(patient_id.clone());
        conds.push(format!("patient_id = ?{}", args.len()));
    }
    if let Some(from) = filter.created_from {
        args.push(ts(from));
        conds.push(format!("created_at >= ?{}", args.len()));
    }
    if let Some(to) = filter.created_to {
        args.push(ts(to));
        conds.push(format!("created_at < ?{}", args.len()));
    }

    if conds.is_empty() {
        (String::new(), args)
    } else {
        (format!("WHERE {}", conds.join(" AND ")), args)
    }
}
