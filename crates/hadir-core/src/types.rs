use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("latitude {0} outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} outside [-180, 180]")]
    Longitude(f64),
    #[error("office radius must be a positive number of meters")]
    Radius,
    #[error("invalid time {0:?}, expected HH:MM")]
    Time(String),
    #[error("work day must end after it starts")]
    WorkDay,
    #[error("unknown value {0:?}")]
    Unknown(String),
}

/// WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        let c = Self { latitude, longitude };
        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::Latitude(self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::Longitude(self.longitude));
        }
        Ok(())
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// Admin-configured office geofence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficeLocation {
    #[serde(flatten)]
    pub coordinate: Coordinate,
    pub radius_meters: u32,
    #[serde(default)]
    pub address: String,
}

impl OfficeLocation {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.coordinate.validate()?;
        if self.radius_meters == 0 {
            return Err(ValidationError::Radius);
        }
        Ok(())
    }
}

impl Default for OfficeLocation {
    /// Central Jakarta with a 100 m radius, used until an admin configures the office.
    fn default() -> Self {
        Self {
            coordinate: Coordinate {
                latitude: -6.2088,
                longitude: 106.8456,
            },
            radius_meters: 100,
            address: "Jakarta".to_string(),
        }
    }
}

/// Working-hour rules applied to every submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkHoursSettings {
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub late_threshold_minutes: u32,
    #[serde(default)]
    pub early_leave_threshold_minutes: u32,
    pub break_duration_minutes: u32,
}

impl WorkHoursSettings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.end_time <= self.start_time {
            return Err(ValidationError::WorkDay);
        }
        Ok(())
    }

    /// Nominal shift length from start to end, break included.
    pub fn shift_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

impl Default for WorkHoursSettings {
    fn default() -> Self {
        Self {
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            late_threshold_minutes: 15,
            early_leave_threshold_minutes: 15,
            break_duration_minutes: 60,
        }
    }
}

/// Parse an `HH:MM` (or `HH:MM:SS`) time of day.
pub fn parse_hhmm(s: &str) -> Result<NaiveTime, ValidationError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S"))
        .map_err(|_| ValidationError::Time(s.to_string()))
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_hhmm(&raw).map_err(serde::de::Error::custom)
    }
}

/// Direction of an attendance entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceKind {
    /// Check-in.
    Masuk,
    /// Check-out.
    Keluar,
}

impl AttendanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Masuk => "masuk",
            Self::Keluar => "keluar",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Masuk => "check-in",
            Self::Keluar => "check-out",
        }
    }
}

impl fmt::Display for AttendanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "masuk" => Ok(Self::Masuk),
            "keluar" => Ok(Self::Keluar),
            other => Err(ValidationError::Unknown(other.to_string())),
        }
    }
}

/// Outcome tag stored with every attendance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Berhasil,
    WajahTidakValid,
    LokasiTidakValid,
    Gagal,
    TidakHadir,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Berhasil => "berhasil",
            Self::WajahTidakValid => "wajah_tidak_valid",
            Self::LokasiTidakValid => "lokasi_tidak_valid",
            Self::Gagal => "gagal",
            Self::TidakHadir => "tidak_hadir",
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Self::Berhasil
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "berhasil" => Ok(Self::Berhasil),
            "wajah_tidak_valid" => Ok(Self::WajahTidakValid),
            "lokasi_tidak_valid" => Ok(Self::LokasiTidakValid),
            "gagal" => Ok(Self::Gagal),
            "tidak_hadir" => Ok(Self::TidakHadir),
            other => Err(ValidationError::Unknown(other.to_string())),
        }
    }
}

/// A persisted (or about to be persisted) attendance entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Assigned by the store on insert.
    pub id: Option<i64>,
    pub employee_id: i64,
    pub kind: AttendanceKind,
    pub recorded_at: NaiveDateTime,
    pub location: Option<Coordinate>,
    pub distance_m: Option<f64>,
    pub status: AttendanceStatus,
    pub is_late: bool,
    pub late_minutes: i64,
    pub work_hours: f64,
    pub overtime_hours: f64,
    pub daily_salary_earned: f64,
    pub note: String,
}

impl AttendanceRecord {
    /// A record with only identity fields set; computed fields start at zero.
    pub fn new(
        employee_id: i64,
        kind: AttendanceKind,
        recorded_at: NaiveDateTime,
        status: AttendanceStatus,
    ) -> Self {
        Self {
            id: None,
            employee_id,
            kind,
            recorded_at,
            location: None,
            distance_m: None,
            status,
            is_late: false,
            late_minutes: 0,
            work_hours: 0.0,
            overtime_hours: 0.0,
            daily_salary_earned: 0.0,
            note: String::new(),
        }
    }

    pub fn is_successful(&self, kind: AttendanceKind) -> bool {
        self.kind == kind && self.status.is_success()
    }
}

/// Bounding box for a detected face region, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}
