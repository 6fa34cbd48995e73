use crate::enroll::enroll_photo_file;
use crate::session::{AttendanceSession, SessionDeps};
use hadir_core::AttendanceKind;
use serde::Serialize;
use std::fmt::Display;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use zbus::interface;

pub const BUS_NAME: &str = "org.hadir.Attendance1";
pub const OBJECT_PATH: &str = "/org/hadir/Attendance1";

/// D-Bus interface for the attendance kiosk daemon.
///
/// Bus name: org.hadir.Attendance1
/// Object path: /org/hadir/Attendance1
///
/// One attendance session at a time; `Start` replaces any previous one.
/// Every method returns the session status as JSON unless noted.
pub struct AttendanceService {
    deps: SessionDeps,
    session: Mutex<Option<AttendanceSession>>,
    submitting: AtomicBool,
    framing_interval: Duration,
}

impl AttendanceService {
    pub fn new(deps: SessionDeps, framing_interval: Duration) -> Self {
        Self {
            deps,
            session: Mutex::new(None),
            submitting: AtomicBool::new(false),
            framing_interval,
        }
    }
}

fn failed(e: impl Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(failed)
}

fn current(slot: &mut Option<AttendanceSession>) -> zbus::fdo::Result<&mut AttendanceSession> {
    slot.as_mut()
        .ok_or_else(|| failed("no attendance in progress; call Start first"))
}

/// Clears the in-flight flag when the submit finishes, however it finishes.
struct SubmitGuard<'a>(&'a AtomicBool);

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[interface(name = "org.hadir.Attendance1")]
impl AttendanceService {
    /// Open an attendance form for an employee.
    async fn start(&self, employee_id: i64) -> zbus::fdo::Result<String> {
        tracing::info!(employee_id, "start requested");
        let session = AttendanceSession::start(employee_id, self.deps.clone())
            .await
            .map_err(failed)?;
        let status = to_json(&session.status())?;
        *self.session.lock().await = Some(session);
        Ok(status)
    }

    /// Choose between "masuk" (check-in) and "keluar" (check-out).
    async fn select_kind(&self, kind: &str) -> zbus::fdo::Result<String> {
        let kind: AttendanceKind = kind.parse().map_err(failed)?;
        let mut slot = self.session.lock().await;
        let session = current(&mut slot)?;
        session.select_kind(kind).map_err(failed)?;
        to_json(&session.status())
    }

    /// Step 1. The session is not held while the device is locating.
    async fn verify_location(&self) -> zbus::fdo::Result<String> {
        let (locator, attempt) = {
            let mut slot = self.session.lock().await;
            current(&mut slot)?.begin_location().map_err(failed)?
        };

        let outcome = locator.locate(attempt).await;

        let mut slot = self.session.lock().await;
        let session = current(&mut slot)?;
        session.apply_location(attempt, outcome).await.map_err(failed)?;
        to_json(&session.status())
    }

    /// Step 2: acquire the camera and start live framing feedback.
    async fn open_camera(&self) -> zbus::fdo::Result<String> {
        let mut slot = self.session.lock().await;
        let session = current(&mut slot)?;
        session
            .open_camera(Some(self.framing_interval))
            .await
            .map_err(failed)?;
        to_json(&session.status())
    }

    /// Latest framing feedback as JSON: `{framing, face, ready, changed, message}`.
    async fn framing(&self) -> zbus::fdo::Result<String> {
        let mut slot = self.session.lock().await;
        let feedback = current(&mut slot)?.framing().await.map_err(failed)?;
        Ok(serde_json::json!({
            "framing": feedback,
            "message": feedback.message(),
        })
        .to_string())
    }

    async fn capture_face(&self) -> zbus::fdo::Result<String> {
        let mut slot = self.session.lock().await;
        let session = current(&mut slot)?;
        session.capture_face().await.map_err(failed)?;
        to_json(&session.status())
    }

    /// Skip face verification for the current session only.
    async fn disable_camera_verification(&self) -> zbus::fdo::Result<String> {
        let mut slot = self.session.lock().await;
        let session = current(&mut slot)?;
        session.disable_camera_verification().map_err(failed)?;
        to_json(&session.status())
    }

    /// Step 3. A second call while one is in flight is a no-op.
    async fn submit(&self) -> zbus::fdo::Result<String> {
        if self.submitting.swap(true, Ordering::SeqCst) {
            tracing::debug!("submit already in flight; ignored");
            return Ok(serde_json::json!({ "submitting": true }).to_string());
        }
        let _guard = SubmitGuard(&self.submitting);

        let mut slot = self.session.lock().await;
        let session = current(&mut slot)?;
        session.submit().await.map_err(failed)?;
        to_json(&session.status())
    }

    /// Discard the current attempt.
    async fn cancel(&self) {
        if let Some(mut session) = self.session.lock().await.take() {
            session.cancel();
        }
    }

    async fn status(&self) -> zbus::fdo::Result<String> {
        let slot = self.session.lock().await;
        match slot.as_ref() {
            Some(session) => to_json(&session.status()),
            None => Ok(serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "state": "idle",
            })
            .to_string()),
        }
    }

    /// Store the reference fingerprint derived from a profile photo. Returns the enrolment as JSON.
    async fn enroll(&self, employee_id: i64, photo_path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(employee_id, photo_path, "enroll requested");
        let enrollment = enroll_photo_file(
            self.deps.profiles.as_ref(),
            self.deps.activity.as_ref(),
            employee_id,
            Path::new(photo_path),
            self.deps.clock.now(),
        )
        .await
        .map_err(failed)?;
        to_json(&enrollment)
    }
}
