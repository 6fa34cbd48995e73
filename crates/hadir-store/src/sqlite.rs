//! SQLite-backed store.

use crate::{
    ActivityEntry, ActivityLog, AttendanceStore, EmployeeProfile, ProfileStore, SettingsStore,
    StoreError,
};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use hadir_core::fingerprint::Fingerprint;
use hadir_core::{AttendanceRecord, Coordinate, OfficeLocation, WorkHoursSettings};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio_rusqlite::Connection;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const KEY_OFFICE: &str = "office_location";
const KEY_WORK_HOURS: &str = "work_hours";
const KEY_CAMERA: &str = "camera_verification";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS employees (
    id               INTEGER PRIMARY KEY,
    name             TEXT NOT NULL,
    monthly_salary   REAL NOT NULL DEFAULT 0,
    face_fingerprint TEXT
);
CREATE TABLE IF NOT EXISTS attendance (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    employee_id         INTEGER NOT NULL,
    kind                TEXT NOT NULL,
    recorded_at         TEXT NOT NULL,
    latitude            REAL,
    longitude           REAL,
    distance_m          REAL,
    status              TEXT NOT NULL,
    is_late             INTEGER NOT NULL DEFAULT 0,
    late_minutes        INTEGER NOT NULL DEFAULT 0,
    work_hours          REAL NOT NULL DEFAULT 0,
    overtime_hours      REAL NOT NULL DEFAULT 0,
    daily_salary_earned REAL NOT NULL DEFAULT 0,
    note                TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS attendance_employee_day
    ON attendance (employee_id, recorded_at);
CREATE TABLE IF NOT EXISTS activity_log (
    id         TEXT PRIMARY KEY,
    actor      INTEGER NOT NULL,
    action     TEXT NOT NULL,
    payload    TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

const RECORD_COLUMNS: &str = "id, employee_id, kind, recorded_at, latitude, longitude, \
     distance_m, status, is_late, late_minutes, work_hours, overtime_hours, \
     daily_salary_earned, note";

/// Store backed by a single SQLite file, driven from a dedicated thread.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Database(e.to_string()))?;
            }
        }
        let conn = Connection::open(path.as_ref()).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        tracing::debug!("attendance schema ready");
        Ok(Self { conn })
    }

    async fn get_setting<T>(&self, key: &'static str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM settings WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;

        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
    }

    async fn put_setting<T: Serialize>(
        &self,
        key: &'static str,
        value: &T,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO settings (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, raw],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn save_office_location(&self, office: &OfficeLocation) -> Result<(), StoreError> {
        office.validate().map_err(|e| StoreError::Rejected(e.to_string()))?;
        self.put_setting(KEY_OFFICE, office).await
    }

    pub async fn save_work_hours(&self, settings: &WorkHoursSettings) -> Result<(), StoreError> {
        settings.validate().map_err(|e| StoreError::Rejected(e.to_string()))?;
        self.put_setting(KEY_WORK_HOURS, settings).await
    }

    pub async fn set_camera_verification(&self, enabled: bool) -> Result<(), StoreError> {
        self.put_setting(KEY_CAMERA, &enabled).await
    }

    /// Create or update an employee's name and salary, keeping any stored fingerprint.
    pub async fn upsert_employee(
        &self,
        id: i64,
        name: &str,
        monthly_salary: f64,
    ) -> Result<(), StoreError> {
        let name = name.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO employees (id, name, monthly_salary) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE
                     SET name = excluded.name, monthly_salary = excluded.monthly_salary",
                    params![id, name, monthly_salary],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Audit entries for an actor, newest first.
    #[cfg(test)]
    pub async fn activity_for(&self, actor: i64) -> Result<Vec<ActivityEntry>, StoreError> {
        let rows: Vec<(String, String, String)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT action, payload, created_at FROM activity_log
                     WHERE actor = ?1 ORDER BY created_at DESC",
                )?;
                let rows = stmt
                    .query_map(params![actor], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(action, payload, created_at)| {
                Ok(ActivityEntry {
                    actor,
                    action,
                    payload: serde_json::from_str(&payload).map_err(|e| StoreError::Corrupt {
                        key: "activity_log.payload".into(),
                        reason: e.to_string(),
                    })?,
                    created_at: parse_timestamp(&created_at).map_err(|e| StoreError::Corrupt {
                        key: "activity_log.created_at".into(),
                        reason: e.to_string(),
                    })?,
                })
            })
            .collect()
    }
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let kind: String = row.get(2)?;
    let recorded_at: String = row.get(3)?;
    let latitude: Option<f64> = row.get(4)?;
    let longitude: Option<f64> = row.get(5)?;
    let status: String = row.get(7)?;

    Ok(AttendanceRecord {
        id: Some(row.get(0)?),
        employee_id: row.get(1)?,
        kind: kind.parse().map_err(|e| conversion_error(2, e))?,
        recorded_at: parse_timestamp(&recorded_at).map_err(|e| conversion_error(3, e))?,
        location: latitude
            .zip(longitude)
            .map(|(latitude, longitude)| Coordinate { latitude, longitude }),
        distance_m: row.get(6)?,
        status: status.parse().map_err(|e| conversion_error(7, e))?,
        is_late: row.get(8)?,
        late_minutes: row.get(9)?,
        work_hours: row.get(10)?,
        overtime_hours: row.get(11)?,
        daily_salary_earned: row.get(12)?,
        note: row.get(13)?,
    })
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn office_location(&self) -> Result<OfficeLocation, StoreError> {
        Ok(self.get_setting(KEY_OFFICE).await?.unwrap_or_default())
    }

    async fn camera_verification_enabled(&self) -> Result<bool, StoreError> {
        Ok(self.get_setting(KEY_CAMERA).await?.unwrap_or(true))
    }

    async fn work_hours(&self) -> Result<WorkHoursSettings, StoreError> {
        Ok(self.get_setting(KEY_WORK_HOURS).await?.unwrap_or_default())
    }
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn employee_profile(&self, employee_id: i64) -> Result<EmployeeProfile, StoreError> {
        let profile = self
            .conn
            .call(move |conn| {
                let profile = conn
                    .query_row(
                        "SELECT id, name, monthly_salary, face_fingerprint
                         FROM employees WHERE id = ?1",
                        params![employee_id],
                        |row| {
                            let fingerprint: Option<String> = row.get(3)?;
                            Ok(EmployeeProfile {
                                id: row.get(0)?,
                                name: row.get(1)?,
                                monthly_salary: row.get(2)?,
                                face_fingerprint: fingerprint
                                    .filter(|f| !f.is_empty())
                                    .map(Fingerprint::from_encoded),
                            })
                        },
                    )
                    .optional()?;
                Ok(profile)
            })
            .await?;
        profile.ok_or(StoreError::EmployeeNotFound(employee_id))
    }

    async fn set_stored_fingerprint(
        &self,
        employee_id: i64,
        fingerprint: &Fingerprint,
    ) -> Result<(), StoreError> {
        let encoded = fingerprint.as_str().to_string();
        let updated = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE employees SET face_fingerprint = ?1 WHERE id = ?2",
                    params![encoded, employee_id],
                )?;
                Ok(n)
            })
            .await?;
        if updated == 0 {
            return Err(StoreError::EmployeeNotFound(employee_id));
        }
        Ok(())
    }
}

#[async_trait]
impl AttendanceStore for SqliteStore {
    async fn insert_record(&self, record: &AttendanceRecord) -> Result<i64, StoreError> {
        let r = record.clone();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance (employee_id, kind, recorded_at, latitude, longitude,
                        distance_m, status, is_late, late_minutes, work_hours, overtime_hours,
                        daily_salary_earned, note)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        r.employee_id,
                        r.kind.as_str(),
                        r.recorded_at.format(TIMESTAMP_FORMAT).to_string(),
                        r.location.map(|c| c.latitude),
                        r.location.map(|c| c.longitude),
                        r.distance_m,
                        r.status.as_str(),
                        r.is_late,
                        r.late_minutes,
                        r.work_hours,
                        r.overtime_hours,
                        r.daily_salary_earned,
                        r.note,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        tracing::debug!(
            id,
            employee_id = record.employee_id,
            status = %record.status,
            "attendance record stored"
        );
        Ok(id)
    }

    async fn list_for_day(
        &self,
        employee_id: i64,
        day: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let day = day.format("%Y-%m-%d").to_string();
        let records = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM attendance
                     WHERE employee_id = ?1 AND substr(recorded_at, 1, 10) = ?2
                     ORDER BY recorded_at, id"
                );
                let mut stmt = conn.prepare(&sql)?;
                let records = stmt
                    .query_map(params![employee_id, day], row_to_record)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    async fn last_successful(
        &self,
        employee_id: i64,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let record = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM attendance
                     WHERE employee_id = ?1 AND status = 'berhasil'
                     ORDER BY recorded_at DESC, id DESC LIMIT 1"
                );
                let record = conn.query_row(&sql, params![employee_id], row_to_record).optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }
}

#[async_trait]
impl ActivityLog for SqliteStore {
    async fn record(&self, entry: ActivityEntry) -> Result<(), StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let payload = entry.payload.to_string();
        let created_at = entry.created_at.format(TIMESTAMP_FORMAT).to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO activity_log (id, actor, action, payload, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, entry.actor, entry.action, payload, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
