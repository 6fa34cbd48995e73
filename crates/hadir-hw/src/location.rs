//! Device position capability.

use async_trait::async_trait;
use hadir_core::Coordinate;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Geolocation failures, worded for the person standing at the device.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocationError {
    #[error("location permission denied; allow location access and try again")]
    PermissionDenied,
    #[error("location unavailable: {0}")]
    PositionUnavailable(String),
    #[error("timed out waiting for a location fix; move to an open area and try again")]
    Timeout,
    #[error("this device cannot report its location")]
    NotSupported,
}

/// Options passed to the provider for a single fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationRequest {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached fix the caller will accept.
    pub maximum_age: Duration,
}

impl Default for LocationRequest {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_millis(10_000),
            maximum_age: Duration::from_millis(60_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub coordinate: Coordinate,
    /// Reported accuracy radius in meters, when known.
    pub accuracy_m: Option<f64>,
    pub captured_at: Instant,
}

impl PositionFix {
    pub fn fresh(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            accuracy_m: None,
            captured_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

/// Source of the device's current position.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(
        &self,
        request: &LocationRequest,
    ) -> Result<PositionFix, LocationError>;
}

/// Reports a configured coordinate: a kiosk bolted to a wall does not move.
#[derive(Debug, Clone)]
pub struct FixedLocationProvider {
    coordinate: Option<Coordinate>,
}

impl FixedLocationProvider {
    pub fn new(coordinate: Option<Coordinate>) -> Self {
        Self { coordinate }
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn current_position(
        &self,
        _request: &LocationRequest,
    ) -> Result<PositionFix, LocationError> {
        let coordinate = self.coordinate.ok_or(LocationError::NotSupported)?;
        coordinate
            .validate()
            .map_err(|e| LocationError::PositionUnavailable(e.to_string()))?;
        Ok(PositionFix {
            coordinate,
            accuracy_m: Some(0.0),
            captured_at: Instant::now(),
        })
    }
}
