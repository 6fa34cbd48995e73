use hadir_core::{Coordinate, OfficeLocation, WorkHoursSettings};
use hadir_store::{SqliteStore, StoreError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Position reported by the kiosk; unset means the device cannot locate itself.
    pub device_location: Option<Coordinate>,
    pub location_timeout: Duration,
    /// Oldest cached position fix still accepted.
    pub location_max_age: Duration,
    /// Combined fingerprint score needed for a face match.
    pub match_threshold: f64,
    pub settings_ttl: Duration,
    /// Period of the live framing feedback loop.
    pub framing_interval: Duration,
    /// Speak prompts through espeak-ng.
    pub speech_enabled: bool,
    /// Register on the system bus instead of the session bus.
    pub system_bus: bool,
    /// Optional TOML file applied to the store at startup.
    pub settings_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `HADIR_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("hadir");

        let db_path = std::env::var("HADIR_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let lat = env_f64_opt("HADIR_DEVICE_LAT");
        let lon = env_f64_opt("HADIR_DEVICE_LON");
        let device_location = match (lat, lon) {
            (Some(latitude), Some(longitude)) => Some(Coordinate { latitude, longitude }),
            _ => None,
        };

        Self {
            db_path,
            camera_device: std::env::var("HADIR_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            device_location,
            location_timeout: Duration::from_millis(env_u64("HADIR_LOCATION_TIMEOUT_MS", 10_000)),
            location_max_age: Duration::from_millis(env_u64("HADIR_LOCATION_MAX_AGE_MS", 60_000)),
            match_threshold: env_f64(
                "HADIR_MATCH_THRESHOLD",
                hadir_core::fingerprint::DEFAULT_MATCH_THRESHOLD,
            ),
            settings_ttl: Duration::from_secs(env_u64("HADIR_SETTINGS_TTL_SECS", 300)),
            framing_interval: Duration::from_millis(
                env_u64("HADIR_FRAMING_INTERVAL_MS", 33).max(1),
            ),
            speech_enabled: env_bool("HADIR_SPEECH", true),
            system_bus: env_bool("HADIR_SYSTEM_BUS", false),
            settings_file: std::env::var("HADIR_SETTINGS_FILE").ok().map(PathBuf::from),
        }
    }
}

fn env_f64_opt(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_f64(key: &str, default: f64) -> f64 {
    env_f64_opt(key).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| parse_bool(&v).unwrap_or(default))
        .unwrap_or(default)
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Some(true),
        "0" | "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmployeeSeed {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub monthly_salary: f64,
}

/// Initial settings and employees, written to the store at daemon start.
///
/// ```toml
/// camera_verification = true
///
/// [office]
/// latitude = -6.2088
/// longitude = 106.8456
/// radius_meters = 100
/// address = "Jakarta"
///
/// [work_hours]
/// start_time = "08:00"
/// end_time = "17:00"
/// late_threshold_minutes = 15
/// break_duration_minutes = 60
///
/// [[employees]]
/// id = 1
/// name = "Sari"
/// monthly_salary = 6600000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SettingsSeed {
    pub office: Option<OfficeLocation>,
    pub work_hours: Option<WorkHoursSettings>,
    pub camera_verification: Option<bool>,
    #[serde(default)]
    pub employees: Vec<EmployeeSeed>,
}

impl SettingsSeed {
    pub fn parse(text: &str) -> Result<Self, SeedError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let text = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub async fn apply(&self, store: &SqliteStore) -> Result<(), SeedError> {
        if let Some(office) = &self.office {
            store.save_office_location(office).await?;
        }
        if let Some(work_hours) = &self.work_hours {
            store.save_work_hours(work_hours).await?;
        }
        if let Some(enabled) = self.camera_verification {
            store.set_camera_verification(enabled).await?;
        }
        for employee in &self.employees {
            store
                .upsert_employee(employee.id, &employee.name, employee.monthly_salary)
                .await?;
        }
        tracing::info!(employees = self.employees.len(), "settings seed applied");
        Ok(())
    }
}
