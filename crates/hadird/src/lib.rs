//! hadird — The attendance kiosk daemon.
//!
//! Sequences location verification, face capture and submission for one
//! employee at a time, and exposes that session over D-Bus.

pub mod capture;
pub mod clock;
pub mod config;
pub mod dbus_interface;
pub mod enroll;
pub mod location;
pub mod session;

#[cfg(test)]
mod testing;

pub use capture::{CaptureError, CaptureResult, FaceCapture, FramingFeedback};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{Config, SettingsSeed};
pub use dbus_interface::AttendanceService;
pub use location::{LocationState, LocationVerdict, LocationVerifier, VerifyError};
pub use session::{AttendanceSession, FailureKind, SessionDeps, SessionError, SessionState, Step};
