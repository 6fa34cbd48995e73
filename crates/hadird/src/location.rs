//! Location verification: device fix + office geofence.

use hadir_core::types::ValidationError;
use hadir_core::{distance_meters, Coordinate, OfficeLocation};
use hadir_hw::{LocationError, LocationProvider, LocationRequest};
use hadir_store::{SettingsStore, StoreError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum VerifyError {
    #[error(transparent)]
    Device(#[from] LocationError),
    #[error("could not load the office location: {0}")]
    Settings(#[from] StoreError),
    #[error("office location is not configured correctly ({0}); ask an administrator")]
    OfficeNotConfigured(ValidationError),
}

/// Outcome of one successful fix. Being outside the radius is a normal verdict, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationVerdict {
    pub is_valid: bool,
    pub coordinate: Coordinate,
    pub distance_m: f64,
    /// Office geofence the distance was measured against.
    pub office: OfficeLocation,
}

impl LocationVerdict {
    pub fn message(&self) -> String {
        if self.is_valid {
            format!("Location verified, {:.0} m from the office.", self.distance_m)
        } else {
            format!(
                "You are {:.0} m from the office; attendance is only allowed within {} m.",
                self.distance_m, self.office.radius_meters
            )
        }
    }
}

/// `idle -> locating -> {valid, invalid, error}`
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LocationState {
    #[default]
    Idle,
    Locating { attempt: u64 },
    Valid(LocationVerdict),
    Invalid(LocationVerdict),
    Error(String),
}

impl LocationState {
    pub fn from_outcome(outcome: &Result<LocationVerdict, VerifyError>) -> Self {
        match outcome {
            Ok(v) if v.is_valid => LocationState::Valid(v.clone()),
            Ok(v) => LocationState::Invalid(v.clone()),
            Err(e) => LocationState::Error(e.to_string()),
        }
    }

    pub fn verdict(&self) -> Option<&LocationVerdict> {
        match self {
            LocationState::Valid(v) | LocationState::Invalid(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, LocationState::Valid(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            LocationState::Idle => "idle",
            LocationState::Locating { .. } => "locating",
            LocationState::Valid(_) => "valid",
            LocationState::Invalid(_) => "invalid",
            LocationState::Error(_) => "error",
        }
    }
}

/// Gets a fix from the device and measures it against the configured office.
///
/// Every call to [`LocationVerifier::begin`] starts a new attempt; only the
/// latest attempt's result should be acted on.
pub struct LocationVerifier {
    provider: Arc<dyn LocationProvider>,
    settings: Arc<dyn SettingsStore>,
    request: LocationRequest,
    attempts: AtomicU64,
}

impl LocationVerifier {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        settings: Arc<dyn SettingsStore>,
        request: LocationRequest,
    ) -> Self {
        Self {
            provider,
            settings,
            request,
            attempts: AtomicU64::new(0),
        }
    }

    /// Register a new attempt, superseding any in flight.
    pub fn begin(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, attempt: u64) -> bool {
        self.attempts.load(Ordering::SeqCst) == attempt
    }

    /// Run a fresh attempt from scratch.
    pub async fn verify(&self) -> (u64, Result<LocationVerdict, VerifyError>) {
        let attempt = self.begin();
        (attempt, self.locate(attempt).await)
    }

    /// Run attempt `attempt`, previously obtained from [`LocationVerifier::begin`].
    pub async fn locate(&self, attempt: u64) -> Result<LocationVerdict, VerifyError> {
        tracing::debug!(attempt, "requesting device position");

        let request = self.provider.current_position(&self.request);
        let fix = match tokio::time::timeout(self.request.timeout, request).await {
            Ok(fix) => fix?,
            Err(_) => return Err(LocationError::Timeout.into()),
        };
        if fix.age() > self.request.maximum_age {
            return Err(LocationError::PositionUnavailable(format!(
                "last known position is {}s old",
                fix.age().as_secs()
            ))
            .into());
        }
        fix.coordinate
            .validate()
            .map_err(|e| LocationError::PositionUnavailable(e.to_string()))?;

        let office = self.settings.office_location().await?;
        office.validate().map_err(VerifyError::OfficeNotConfigured)?;

        let distance_m = distance_meters(fix.coordinate, office.coordinate);
        let is_valid = distance_m <= office.radius_meters as f64;

        tracing::info!(
            attempt,
            distance_m,
            radius_m = office.radius_meters,
            is_valid,
            "location verified"
        );

        Ok(LocationVerdict {
            is_valid,
            coordinate: fix.coordinate,
            distance_m,
            office,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{aged_fix, ScriptedLocation};
    use hadir_hw::PositionFix;
    use hadir_store::MemoryStore;
    use std::time::Duration;

    fn office() -> OfficeLocation {
        OfficeLocation {
            coordinate: Coordinate { latitude: -6.2088, longitude: 106.8456 },
            radius_meters: 100,
            address: "HQ".into(),
        }
    }

    /// Roughly `meters` north of the office.
    fn north_of_office(meters: f64) -> Coordinate {
        Coordinate {
            latitude: -6.2088 + meters / 111_195.0,
            longitude: 106.8456,
        }
    }

    fn verifier(provider: ScriptedLocation, timeout: Duration) -> LocationVerifier {
        let store = MemoryStore::new();
        store.set_office_location(office());
        LocationVerifier::new(
            Arc::new(provider),
            Arc::new(store),
            LocationRequest {
                timeout,
                ..LocationRequest::default()
            },
        )
    }

    #[tokio::test]
    async fn test_at_office_is_valid() {
        let v = verifier(ScriptedLocation::at(office().coordinate), Duration::from_secs(1));
        let (attempt, outcome) = v.verify().await;
        let verdict = outcome.unwrap();
        assert!(verdict.is_valid);
        assert!(verdict.distance_m < 1e-6);
        assert_eq!(verdict.office.address, "HQ");
        assert!(v.is_current(attempt));
    }

    #[tokio::test]
    async fn test_out_of_radius_is_a_verdict_not_an_error() {
        let v = verifier(ScriptedLocation::at(north_of_office(2000.0)), Duration::from_secs(1));
        let verdict = v.verify().await.1.unwrap();
        assert!(!verdict.is_valid);
        assert!((verdict.distance_m - 2000.0).abs() < 5.0, "{}", verdict.distance_m);
        assert!(verdict.message().contains("100 m"));
    }

    #[tokio::test]
    async fn test_device_errors_are_classified() {
        let provider = ScriptedLocation::new();
        provider.push(Duration::ZERO, Err(LocationError::PermissionDenied));
        let v = verifier(provider, Duration::from_secs(1));
        let err = v.verify().await.1.unwrap_err();
        assert!(matches!(err, VerifyError::Device(LocationError::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_slow_device_times_out() {
        let provider = ScriptedLocation::new();
        provider.push(Duration::from_millis(500), Ok(PositionFix::fresh(office().coordinate)));
        let v = verifier(provider, Duration::from_millis(20));
        let err = v.verify().await.1.unwrap_err();
        assert!(matches!(err, VerifyError::Device(LocationError::Timeout)));
    }

    #[tokio::test]
    async fn test_stale_cached_fix_rejected() {
        let provider = ScriptedLocation::new();
        provider.push(Duration::ZERO, Ok(aged_fix(office().coordinate, Duration::from_secs(120))));
        let v = verifier(provider, Duration::from_secs(1));
        let err = v.verify().await.1.unwrap_err();
        assert!(matches!(err, VerifyError::Device(LocationError::PositionUnavailable(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_office_is_an_error() {
        let store = MemoryStore::new();
        store.set_office_location(OfficeLocation {
            radius_meters: 0,
            ..office()
        });
        let v = LocationVerifier::new(
            Arc::new(ScriptedLocation::at(office().coordinate)),
            Arc::new(store),
            LocationRequest::default(),
        );
        assert!(matches!(v.verify().await.1, Err(VerifyError::OfficeNotConfigured(_))));
    }

    #[tokio::test]
    async fn test_newer_attempt_supersedes_older() {
        let v = verifier(ScriptedLocation::at(office().coordinate), Duration::from_secs(1));
        let first = v.begin();
        let second = v.begin();
        assert!(!v.is_current(first));
        assert!(v.is_current(second));
        v.locate(first).await.unwrap();
        assert!(v.is_current(second));
    }

    #[test]
    fn test_state_from_outcome() {
        let verdict = LocationVerdict {
            is_valid: false,
            coordinate: office().coordinate,
            distance_m: 150.0,
            office: office(),
        };
        let state = LocationState::from_outcome(&Ok(verdict.clone()));
        assert_eq!(state, LocationState::Invalid(verdict));
        assert!(!state.is_valid());
        let state = LocationState::from_outcome(&Err(LocationError::Timeout.into()));
        assert_eq!(state.name(), "error");
    }
}
