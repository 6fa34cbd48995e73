//! hadir-core — Attendance verification logic.
//!
//! Haversine geofencing, the block-average face fingerprint heuristic,
//! face framing classification and the attendance pay/lateness policy.
//! Everything here is pure computation; devices and storage live in
//! `hadir-hw` and `hadir-store`.

pub mod fingerprint;
pub mod framing;
pub mod geo;
pub mod policy;
pub mod types;

pub use fingerprint::{compare_fingerprints, generate_fingerprint, looks_like_face, Fingerprint};
pub use geo::{distance_meters, is_within_radius};
pub use types::{
    AttendanceKind, AttendanceRecord, AttendanceStatus, BoundingBox, Coordinate, OfficeLocation,
    WorkHoursSettings,
};
