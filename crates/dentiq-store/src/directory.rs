//! Read-only appointment directory over the clinic's SQLite tables.
//!
//! The `appointments` and `patients` tables are owned by the clinic CRUD
//! layer; this module only reads them. `ensure_schema` exists so a fresh
//! development database (and the test suite) can bootstrap the tables the
//! CRUD layer would normally have created.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use dentiq_core::error::{DentiqError, Result};
use dentiq_core::traits::AppointmentDirectory;
use dentiq_core::types::{Appointment, AppointmentStatus, Patient};

use crate::jobs::{parse_ts, ts};

pub struct SqliteDirectory {
    conn: Mutex<Connection>,
}

const APPOINTMENT_SELECT: &str = "SELECT a.id, a.professional, a.treatment, a.start_time, a.status,
            p.id, p.name, p.phone, p.email
     FROM appointments a
     JOIN patients p ON p.id = a.patient_id";

impl SqliteDirectory {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| DentiqError::Store(format!("DB open: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DentiqError::Store(format!("DB open: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Create the clinic tables if absent. Idempotent.
    pub fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS patients (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                phone TEXT,
                email TEXT
            );
            CREATE TABLE IF NOT EXISTS appointments (
                id TEXT PRIMARY KEY,
                patient_id TEXT NOT NULL,
                professional TEXT NOT NULL,
                treatment TEXT NOT NULL,
                start_time TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'scheduled'
            );
            CREATE INDEX IF NOT EXISTS idx_appointments_start
                ON appointments (start_time, status);
            ",
        )
        .map_err(|e| DentiqError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    /// Insert a patient + appointment pair. Development/test seeding only;
    /// production data arrives through the clinic CRUD layer.
    pub fn seed_appointment(&self, appointment: &Appointment) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO patients (id, name, phone, email) VALUES (?1, ?2, ?3, ?4)",
            params![
                appointment.patient.id,
                appointment.patient.name,
                appointment.patient.phone,
                appointment.patient.email,
            ],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO appointments
             (id, patient_id, professional, treatment, start_time, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                appointment.id,
                appointment.patient.id,
                appointment.professional,
                appointment.treatment,
                ts(appointment.start_time),
                appointment.status.as_str(),
            ],
        )?;
        Ok(())
    }
}

fn row_to_appointment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Appointment> {
    let start_time: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(Appointment {
        id: row.get(0)?,
        professional: row.get(1)?,
        treatment: row.get(2)?,
        start_time: parse_ts(&start_time),
        status: AppointmentStatus::parse(&status).unwrap_or(AppointmentStatus::Scheduled),
        patient: Patient {
            id: row.get(5)?,
            name: row.get(6)?,
            phone: row.get(7)?,
            email: row.get(8)?,
        },
    })
}

#[async_trait]
impl AppointmentDirectory for SqliteDirectory {
    async fn appointment(&self, id: &str) -> Result<Option<Appointment>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("{APPOINTMENT_SELECT} WHERE a.id = ?1"))?;
        let mut rows = stmt.query_map([id], row_to_appointment)?;
        match rows.next() {
            Some(appt) => Ok(Some(appt?)),
            None => Ok(None),
        }
    }

    async fn appointments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{APPOINTMENT_SELECT}
             WHERE a.start_time >= ?1 AND a.start_time < ?2
               AND a.status IN ('scheduled', 'confirmed')
             ORDER BY a.start_time ASC"
        ))?;
        let rows = stmt.query_map(params![ts(from), ts(to)], row_to_appointment)?;
        let mut appointments = Vec::new();
        for row in rows {
            appointments.push(row?);
        }
        Ok(appointments)
    }
}
