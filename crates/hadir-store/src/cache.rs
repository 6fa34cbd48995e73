//! TTL cache in front of a settings source.

use crate::{SettingsStore, StoreError};
use async_trait::async_trait;
use hadir_core::{OfficeLocation, WorkHoursSettings};
use moka::future::Cache;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SettingKey {
    Office,
    CameraVerification,
    WorkHours,
}

#[derive(Debug, Clone)]
enum SettingValue {
    Office(OfficeLocation),
    CameraVerification(bool),
    WorkHours(WorkHoursSettings),
}

/// Serves settings from memory for `ttl` before going back to the source.
///
/// Admin edits made elsewhere become visible after at most one TTL, or at
/// once after [`SettingsCache::invalidate`].
pub struct SettingsCache<S> {
    source: S,
    cache: Cache<SettingKey, SettingValue>,
}

impl<S: SettingsStore> SettingsCache<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(8).time_to_live(ttl).build();
        Self { source, cache }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    async fn load(&self, key: SettingKey) -> Result<SettingValue, StoreError> {
        self.cache
            .try_get_with(key, async {
                let value = match key {
                    SettingKey::Office => {
                        SettingValue::Office(self.source.office_location().await?)
                    }
                    SettingKey::CameraVerification => SettingValue::CameraVerification(
                        self.source.camera_verification_enabled().await?,
                    ),
                    SettingKey::WorkHours => {
                        SettingValue::WorkHours(self.source.work_hours().await?)
                    }
                };
                tracing::debug!(?key, "settings cache refreshed");
                Ok::<_, StoreError>(value)
            })
            .await
            .map_err(|e| (*e).clone())
    }
}

fn mismatch(key: SettingKey) -> StoreError {
    StoreError::Corrupt {
        key: format!("{key:?}"),
        reason: "cached value has the wrong type".into(),
    }
}

#[async_trait]
impl<S: SettingsStore> SettingsStore for SettingsCache<S> {
    async fn office_location(&self) -> Result<OfficeLocation, StoreError> {
        match self.load(SettingKey::Office).await? {
            SettingValue::Office(office) => Ok(office),
            _ => Err(mismatch(SettingKey::Office)),
        }
    }

    async fn camera_verification_enabled(&self) -> Result<bool, StoreError> {
        match self.load(SettingKey::CameraVerification).await? {
            SettingValue::CameraVerification(enabled) => Ok(enabled),
            _ => Err(mismatch(SettingKey::CameraVerification)),
        }
    }

    async fn work_hours(&self) -> Result<WorkHoursSettings, StoreError> {
        match self.load(SettingKey::WorkHours).await? {
            SettingValue::WorkHours(settings) => Ok(settings),
            _ => Err(mismatch(SettingKey::WorkHours)),
        }
    }
}
