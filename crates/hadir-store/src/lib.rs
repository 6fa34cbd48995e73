//! hadir-store — Persistence behind the attendance flow.
//!
//! The flow only sees the four traits below. `SqliteStore` backs a real
//! deployment, `MemoryStore` backs tests and demos, and `SettingsCache`
//! puts a TTL in front of any settings source.

pub mod cache;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use hadir_core::fingerprint::Fingerprint;
use hadir_core::{AttendanceRecord, OfficeLocation, WorkHoursSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::SettingsCache;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("employee {0} not found")]
    EmployeeNotFound(i64),
    #[error("database error: {0}")]
    Database(String),
    #[error("stored value for {key} is invalid: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("record rejected: {0}")]
    Rejected(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Employee data the attendance flow needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeProfile {
    pub id: i64,
    pub name: String,
    pub monthly_salary: f64,
    /// Derived from the profile photo at upload time.
    pub face_fingerprint: Option<Fingerprint>,
}

/// One audit-log line: who did what, with which payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub actor: i64,
    pub action: String,
    pub payload: serde_json::Value,
    pub created_at: NaiveDateTime,
}

/// Admin-configured settings. Implementations return defaults for anything unconfigured.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn office_location(&self) -> Result<OfficeLocation, StoreError>;
    async fn camera_verification_enabled(&self) -> Result<bool, StoreError>;
    async fn work_hours(&self) -> Result<WorkHoursSettings, StoreError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn employee_profile(&self, employee_id: i64) -> Result<EmployeeProfile, StoreError>;
    async fn set_stored_fingerprint(
        &self,
        employee_id: i64,
        fingerprint: &Fingerprint,
    ) -> Result<(), StoreError>;

    async fn stored_fingerprint(
        &self,
        employee_id: i64,
    ) -> Result<Option<Fingerprint>, StoreError> {
        Ok(self.employee_profile(employee_id).await?.face_fingerprint)
    }
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Persist a record and return its id.
    async fn insert_record(&self, record: &AttendanceRecord) -> Result<i64, StoreError>;
    /// All records of `employee_id` on `day`, oldest first.
    async fn list_for_day(
        &self,
        employee_id: i64,
        day: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;
    /// Most recent successful record of any kind.
    async fn last_successful(
        &self,
        employee_id: i64,
    ) -> Result<Option<AttendanceRecord>, StoreError>;
}

#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn record(&self, entry: ActivityEntry) -> Result<(), StoreError>;
}
