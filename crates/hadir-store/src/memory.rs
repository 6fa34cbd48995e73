//! In-memory store for tests and demos.

use crate::{
    ActivityEntry, ActivityLog, AttendanceStore, EmployeeProfile, ProfileStore, SettingsStore,
    StoreError,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use hadir_core::fingerprint::Fingerprint;
use hadir_core::{AttendanceRecord, OfficeLocation, WorkHoursSettings};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    office: Option<OfficeLocation>,
    work_hours: Option<WorkHoursSettings>,
    camera_verification: Option<bool>,
    employees: HashMap<i64, EmployeeProfile>,
    records: Vec<AttendanceRecord>,
    activity: Vec<ActivityEntry>,
}

/// Everything kept in a mutex, with switches for injecting failures.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_next_insert: AtomicBool,
    fail_activity: AtomicBool,
    settings_reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Database("memory store poisoned".into()))
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        match self.inner.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn set_office_location(&self, office: OfficeLocation) {
        self.with(|s| s.office = Some(office));
    }

    pub fn set_work_hours(&self, settings: WorkHoursSettings) {
        self.with(|s| s.work_hours = Some(settings));
    }

    pub fn set_camera_verification(&self, enabled: bool) {
        self.with(|s| s.camera_verification = Some(enabled));
    }

    pub fn add_employee(&self, profile: EmployeeProfile) {
        self.with(|s| {
            s.employees.insert(profile.id, profile);
        });
    }

    /// Seed a record without going through the failure switches.
    pub fn push_record(&self, mut record: AttendanceRecord) -> i64 {
        self.with(|s| {
            let id = s.records.len() as i64 + 1;
            record.id = Some(id);
            s.records.push(record);
            id
        })
    }

    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.with(|s| s.records.clone())
    }

    pub fn activity(&self) -> Vec<ActivityEntry> {
        self.with(|s| s.activity.clone())
    }

    /// Make the next `insert_record` fail once.
    pub fn fail_next_insert(&self) {
        self.fail_next_insert.store(true, Ordering::SeqCst);
    }

    pub fn fail_activity(&self, fail: bool) {
        self.fail_activity.store(fail, Ordering::SeqCst);
    }

    /// Number of settings reads served so far.
    pub fn settings_reads(&self) -> usize {
        self.settings_reads.load(Ordering::SeqCst)
    }

    fn count_read(&self) {
        self.settings_reads.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn office_location(&self) -> Result<OfficeLocation, StoreError> {
        self.count_read();
        Ok(self.lock()?.office.clone().unwrap_or_default())
    }

    async fn camera_verification_enabled(&self) -> Result<bool, StoreError> {
        self.count_read();
        Ok(self.lock()?.camera_verification.unwrap_or(true))
    }

    async fn work_hours(&self) -> Result<WorkHoursSettings, StoreError> {
        self.count_read();
        Ok(self.lock()?.work_hours.clone().unwrap_or_default())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn employee_profile(&self, employee_id: i64) -> Result<EmployeeProfile, StoreError> {
        self.lock()?
            .employees
            .get(&employee_id)
            .cloned()
            .ok_or(StoreError::EmployeeNotFound(employee_id))
    }

    async fn set_stored_fingerprint(
        &self,
        employee_id: i64,
        fingerprint: &Fingerprint,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let profile = inner
            .employees
            .get_mut(&employee_id)
            .ok_or(StoreError::EmployeeNotFound(employee_id))?;
        profile.face_fingerprint = Some(fingerprint.clone());
        Ok(())
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    async fn insert_record(&self, record: &AttendanceRecord) -> Result<i64, StoreError> {
        if self.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected insert failure".into()));
        }
        let mut inner = self.lock()?;
        let id = inner.records.len() as i64 + 1;
        let mut stored = record.clone();
        stored.id = Some(id);
        inner.records.push(stored);
        Ok(id)
    }

    async fn list_for_day(
        &self,
        employee_id: i64,
        day: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut records: Vec<_> = self
            .lock()?
            .records
            .iter()
            .filter(|r| r.employee_id == employee_id && r.recorded_at.date() == day)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.recorded_at, r.id));
        Ok(records)
    }

    async fn last_successful(
        &self,
        employee_id: i64,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(self
            .lock()?
            .records
            .iter()
            .filter(|r| r.employee_id == employee_id && r.status.is_success())
            .max_by_key(|r| (r.recorded_at, r.id))
            .cloned())
    }
}

#[async_trait]
impl ActivityLog for MemoryStore {
    async fn record(&self, entry: ActivityEntry) -> Result<(), StoreError> {
        if self.fail_activity.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected activity failure".into()));
        }
        self.lock()?.activity.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hadir_core::{AttendanceKind, AttendanceStatus};

    fn at(day: u32, h: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_fail_next_insert_is_one_shot() {
        let store = MemoryStore::new();
        let r =
            AttendanceRecord::new(1, AttendanceKind::Masuk, at(3, 8), AttendanceStatus::Berhasil);

        store.fail_next_insert();
        assert!(store.insert_record(&r).await.is_err());
        assert_eq!(store.insert_record(&r).await.unwrap(), 1);
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_list_for_day_filters_employee_and_date() {
        let store = MemoryStore::new();
        store.push_record(AttendanceRecord::new(
            1,
            AttendanceKind::Masuk,
            at(3, 8),
            AttendanceStatus::Berhasil,
        ));
        store.push_record(AttendanceRecord::new(
            1,
            AttendanceKind::Masuk,
            at(4, 8),
            AttendanceStatus::Berhasil,
        ));
        store.push_record(AttendanceRecord::new(
            2,
            AttendanceKind::Masuk,
            at(3, 8),
            AttendanceStatus::Berhasil,
        ));

        let day = store.list_for_day(1, at(3, 0).date()).await.unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].id, Some(1));

        let last = store.last_successful(1).await.unwrap().unwrap();
        assert_eq!(last.recorded_at, at(4, 8));
    }

    #[tokio::test]
    async fn test_settings_reads_counted() {
        let store = MemoryStore::new();
        store.office_location().await.unwrap();
        store.work_hours().await.unwrap();
        assert_eq!(store.settings_reads(), 2);
    }
}
