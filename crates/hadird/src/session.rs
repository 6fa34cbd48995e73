//! Attendance session: location -> face -> confirm -> submit.

use crate::capture::{CaptureError, CaptureResult, CaptureState, FaceCapture, FramingFeedback};
use crate::clock::Clock;
use crate::location::{LocationState, LocationVerdict, LocationVerifier, VerifyError};
use chrono::NaiveDateTime;
use hadir_core::fingerprint::{compare_fingerprints, Fingerprint};
use hadir_core::framing::FramingRules;
use hadir_core::{
    policy, AttendanceKind, AttendanceRecord, AttendanceStatus, OfficeLocation, WorkHoursSettings,
};
use hadir_hw::{CameraConstraints, CameraProvider, SpeechFeedback};
use hadir_store::{
    ActivityEntry, ActivityLog, AttendanceStore, ProfileStore, SettingsStore, StoreError,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Everything a session talks to.
#[derive(Clone)]
pub struct SessionDeps {
    pub settings: Arc<dyn SettingsStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub attendance: Arc<dyn AttendanceStore>,
    pub activity: Arc<dyn ActivityLog>,
    pub locator: Arc<LocationVerifier>,
    pub camera: Arc<dyn CameraProvider>,
    pub speech: Arc<dyn SpeechFeedback>,
    pub clock: Arc<dyn Clock>,
    pub camera_constraints: CameraConstraints,
    pub framing_rules: FramingRules,
    pub match_threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Location,
    Face,
    Confirm,
}

impl Step {
    pub fn number(&self) -> u8 {
        match self {
            Step::Location => 1,
            Step::Face => 2,
            Step::Confirm => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Camera verification is on but the employee has no profile photo fingerprint.
    ProfileIncomplete,
    OfficeNotConfigured,
}

impl BlockReason {
    pub fn message(&self) -> &'static str {
        match self {
            BlockReason::ProfileIncomplete => concat!(
                "Complete your profile: upload a profile photo, ",
                "or disable camera verification for this attendance."
            ),
            BlockReason::OfficeNotConfigured => {
                "The office location is not configured. Contact an administrator."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active(Step),
    Blocked(BlockReason),
    Submitted { record_id: i64 },
    Cancelled,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Active(_) => "active",
            SessionState::Blocked(_) => "blocked",
            SessionState::Submitted { .. } => "submitted",
            SessionState::Cancelled => "cancelled",
        }
    }
}

/// Why a submission failed; decides the status tag of the failed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    FaceInvalid,
    LocationInvalid,
    Generic,
}

impl FailureKind {
    pub fn status(&self) -> AttendanceStatus {
        match self {
            FailureKind::FaceInvalid => AttendanceStatus::WajahTidakValid,
            FailureKind::LocationInvalid => AttendanceStatus::LokasiTidakValid,
            FailureKind::Generic => AttendanceStatus::Gagal,
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Location(#[from] VerifyError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("{}", .0.message())]
    Blocked(BlockReason),
    #[error("{0}")]
    NotAvailable(String),
    /// A precondition failed; nothing was recorded.
    #[error("{0}")]
    Rejected(String),
    #[error("no face recognised in the photo; face the camera in good light and try again")]
    NoFaceInPhoto,
    /// Verification or persistence failed; a failed-attempt record was written.
    #[error("{message}")]
    Failed { kind: FailureKind, message: String },
    #[error("attendance already submitted")]
    AlreadySubmitted,
    #[error("attendance cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            SessionError::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Snapshot for clients.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub employee_id: i64,
    pub kind: AttendanceKind,
    pub state: &'static str,
    pub step: Option<u8>,
    pub blocked: Option<BlockReason>,
    pub camera_required: bool,
    pub location: &'static str,
    pub distance_m: Option<f64>,
    pub camera: Option<CaptureState>,
    pub face_captured: bool,
    pub record_id: Option<i64>,
    pub message: Option<String>,
}

/// One employee's attendance attempt.
pub struct AttendanceSession {
    deps: SessionDeps,
    employee_id: i64,
    kind: AttendanceKind,
    state: SessionState,
    camera_required: bool,
    stored_fingerprint: Option<Fingerprint>,
    office: OfficeLocation,
    work_hours: WorkHoursSettings,
    monthly_salary: f64,
    location: LocationState,
    capture: Option<FaceCapture>,
    captured: Option<CaptureResult>,
    message: Option<String>,
}

impl AttendanceSession {
    /// Load the employee's profile and the current settings, and pick the default kind.
    pub async fn start(employee_id: i64, deps: SessionDeps) -> Result<Self, SessionError> {
        let profile = deps.profiles.employee_profile(employee_id).await?;
        let camera_required = deps.settings.camera_verification_enabled().await?;
        let office = deps.settings.office_location().await?;
        let work_hours = deps.settings.work_hours().await?;
        let today = deps
            .attendance
            .list_for_day(employee_id, deps.clock.now().date())
            .await?;
        let kind = policy::default_kind(&today);

        let stored_fingerprint = if camera_required { profile.face_fingerprint } else { None };

        let state = if office.validate().is_err() {
            SessionState::Blocked(BlockReason::OfficeNotConfigured)
        } else if camera_required && stored_fingerprint.is_none() {
            SessionState::Blocked(BlockReason::ProfileIncomplete)
        } else {
            SessionState::Active(Step::Location)
        };

        tracing::info!(
            employee_id,
            %kind,
            camera_required,
            state = state.name(),
            "attendance session started"
        );

        let message = match state {
            SessionState::Blocked(reason) => Some(reason.message().to_string()),
            _ => None,
        };

        Ok(Self {
            deps,
            employee_id,
            kind,
            state,
            camera_required,
            stored_fingerprint,
            office,
            work_hours,
            monthly_salary: profile.monthly_salary,
            location: LocationState::Idle,
            capture: None,
            captured: None,
            message,
        })
    }

    pub fn employee_id(&self) -> i64 {
        self.employee_id
    }

    pub fn kind(&self) -> AttendanceKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn step(&self) -> Option<Step> {
        match self.state {
            SessionState::Active(step) => Some(step),
            _ => None,
        }
    }

    pub fn camera_required(&self) -> bool {
        self.camera_required
    }

    pub fn location_state(&self) -> &LocationState {
        &self.location
    }

    pub fn captured(&self) -> Option<&CaptureResult> {
        self.captured.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn active_step(&self) -> Result<Step, SessionError> {
        match self.state {
            SessionState::Active(step) => Ok(step),
            SessionState::Blocked(reason) => Err(SessionError::Blocked(reason)),
            SessionState::Submitted { .. } => Err(SessionError::AlreadySubmitted),
            SessionState::Cancelled => Err(SessionError::Cancelled),
        }
    }

    fn require(&self, step: Step) -> Result<(), SessionError> {
        let current = self.active_step()?;
        if current != step {
            return Err(SessionError::NotAvailable(format!(
                "not possible at step {} (needs step {})",
                current.number(),
                step.number()
            )));
        }
        Ok(())
    }

    fn set_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.deps.speech.speak(&message);
        self.message = Some(message);
    }

    /// Back to step 1 with nothing verified.
    fn reset_attempt(&mut self) {
        self.capture = None;
        self.captured = None;
        self.location = LocationState::Idle;
        self.state = SessionState::Active(Step::Location);
    }

    /// Switch between check-in and check-out before submitting.
    pub fn select_kind(&mut self, kind: AttendanceKind) -> Result<(), SessionError> {
        match self.state {
            SessionState::Submitted { .. } => Err(SessionError::AlreadySubmitted),
            SessionState::Cancelled => Err(SessionError::Cancelled),
            _ => {
                self.kind = kind;
                Ok(())
            }
        }
    }

    /// Skip face verification for this session only.
    pub fn disable_camera_verification(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Blocked(BlockReason::ProfileIncomplete) => {
                self.state = SessionState::Active(Step::Location);
            }
            SessionState::Active(Step::Face) => {
                self.capture = None;
                self.state = SessionState::Active(Step::Confirm);
            }
            SessionState::Active(_) | SessionState::Blocked(_) => {}
            SessionState::Submitted { .. } => return Err(SessionError::AlreadySubmitted),
            SessionState::Cancelled => return Err(SessionError::Cancelled),
        }
        self.camera_required = false;
        self.captured = None;
        self.message = None;
        tracing::info!(
            employee_id = self.employee_id,
            "camera verification disabled for this session"
        );
        Ok(())
    }

    /// Start a location attempt. The returned verifier and attempt id are used
    /// with [`AttendanceSession::apply_location`], so that the device can be
    /// awaited without holding the session.
    pub fn begin_location(&mut self) -> Result<(Arc<LocationVerifier>, u64), SessionError> {
        self.require(Step::Location)?;
        let attempt = self.deps.locator.begin();
        self.location = LocationState::Locating { attempt };
        self.message = None;
        Ok((self.deps.locator.clone(), attempt))
    }

    /// Apply the outcome of `attempt`. Returns `false` when a newer attempt
    /// has superseded it and the outcome was dropped.
    pub async fn apply_location(
        &mut self,
        attempt: u64,
        outcome: Result<LocationVerdict, VerifyError>,
    ) -> Result<bool, SessionError> {
        let pending =
            matches!(self.location, LocationState::Locating { attempt: a } if a == attempt);
        if !pending
            || !self.deps.locator.is_current(attempt)
            || self.require(Step::Location).is_err()
        {
            tracing::debug!(attempt, "stale location result ignored");
            return Ok(false);
        }

        self.location = LocationState::from_outcome(&outcome);
        match outcome {
            Ok(verdict) if verdict.is_valid => {
                self.office = verdict.office.clone();
                self.message = None;
                let next = if self.camera_required { Step::Face } else { Step::Confirm };
                self.state = SessionState::Active(next);
                tracing::info!(
                    employee_id = self.employee_id,
                    step = next.number(),
                    "location accepted"
                );
            }
            Ok(verdict) => {
                let message = verdict.message();
                let now = self.deps.clock.now();
                self.record_failure(FailureKind::LocationInvalid, &message, now).await;
                self.set_message(message);
            }
            Err(e) => {
                tracing::warn!(
                    employee_id = self.employee_id,
                    error = %e,
                    "location verification failed"
                );
                self.set_message(e.to_string());
                return Err(e.into());
            }
        }
        Ok(true)
    }

    /// Run a full location attempt.
    pub async fn verify_location(&mut self) -> Result<bool, SessionError> {
        let (locator, attempt) = self.begin_location()?;
        let outcome = locator.locate(attempt).await;
        self.apply_location(attempt, outcome).await
    }

    /// Acquire the camera for step 2, optionally with background framing feedback.
    pub async fn open_camera(
        &mut self,
        framing_period: Option<Duration>,
    ) -> Result<(), SessionError> {
        self.require(Step::Face)?;
        self.capture = None;
        let mut capture = match FaceCapture::start(
            self.deps.camera.as_ref(),
            &self.deps.camera_constraints,
            self.deps.speech.clone(),
            self.deps.framing_rules,
        )
        .await
        {
            Ok(capture) => capture,
            Err(e) => {
                self.message = Some(e.to_string());
                return Err(e.into());
            }
        };
        if let Some(period) = framing_period {
            capture.run_framing_loop(period)?;
        }
        self.capture = Some(capture);
        self.message = None;
        Ok(())
    }

    pub async fn framing(&mut self) -> Result<FramingFeedback, SessionError> {
        self.require(Step::Face)?;
        let capture = self.capture.as_mut().ok_or(CaptureError::NotStreaming)?;
        Ok(capture.framing().await?)
    }

    /// Take the photo and, if it contains a face, move on to confirmation.
    pub async fn capture_face(&mut self) -> Result<(), SessionError> {
        self.require(Step::Face)?;
        let capture = self.capture.as_mut().ok_or(CaptureError::NotStreaming)?;
        let result = capture.capture().await?;
        self.apply_capture(result)
    }

    pub fn apply_capture(&mut self, result: CaptureResult) -> Result<(), SessionError> {
        self.require(Step::Face)?;
        if result.fingerprint.is_none() {
            self.message = Some(SessionError::NoFaceInPhoto.to_string());
            return Err(SessionError::NoFaceInPhoto);
        }
        self.captured = Some(result);
        self.capture = None;
        self.message = None;
        self.state = SessionState::Active(Step::Confirm);
        Ok(())
    }

    /// Check the preconditions again, verify the face and persist the record. At most once.
    pub async fn submit(&mut self) -> Result<i64, SessionError> {
        self.require(Step::Confirm)?;
        let now = self.deps.clock.now();

        if !self.location.is_valid() {
            self.reset_attempt();
            return Err(self.reject("Verify your location first."));
        }

        let live = self.captured.as_ref().and_then(|c| c.fingerprint.clone());
        if self.camera_required && live.is_none() {
            self.captured = None;
            self.state = SessionState::Active(Step::Face);
            return Err(self.reject("Take a photo of your face first."));
        }

        let today = match self.deps.attendance.list_for_day(self.employee_id, now.date()).await {
            Ok(today) => today,
            Err(e) => {
                let message = format!("Could not check today's attendance: {e}");
                return Err(self.fail(FailureKind::Generic, &message, now).await);
            }
        };
        if today.iter().any(|r| r.is_successful(self.kind)) {
            self.reset_attempt();
            let message = format!("You have already recorded your {} today.", self.kind.label());
            return Err(self.reject(&message));
        }

        if !policy::within_window(self.kind, &self.work_hours, now.time()) {
            let (open, close) = policy::submission_window(self.kind, &self.work_hours);
            self.reset_attempt();
            return Err(self.reject(&format!(
                "{} is only possible between {} and {}.",
                capitalize(self.kind.label()),
                open.format("%H:%M"),
                close.format("%H:%M")
            )));
        }

        if self.camera_required
            && !compare_fingerprints(
                live.as_ref(),
                self.stored_fingerprint.as_ref(),
                self.deps.match_threshold,
            )
        {
            return Err(self
                .fail(FailureKind::FaceInvalid, "Face does not match your profile photo.", now)
                .await);
        }

        let record = match self.build_record(now).await {
            Ok(record) => record,
            Err(e) => {
                let message = format!("Could not prepare attendance: {e}");
                return Err(self.fail(FailureKind::Generic, &message, now).await);
            }
        };
        match self.deps.attendance.insert_record(&record).await {
            Ok(record_id) => {
                self.state = SessionState::Submitted { record_id };
                self.capture = None;
                tracing::info!(
                    employee_id = self.employee_id,
                    record_id,
                    kind = %self.kind,
                    is_late = record.is_late,
                    late_minutes = record.late_minutes,
                    "attendance submitted"
                );
                self.audit(
                    "attendance.submitted",
                    serde_json::json!({
                        "record_id": record_id,
                        "kind": self.kind,
                        "distance_m": record.distance_m,
                        "is_late": record.is_late,
                        "late_minutes": record.late_minutes,
                        "work_hours": record.work_hours,
                        "overtime_hours": record.overtime_hours,
                    }),
                    now,
                )
                .await;
                self.set_message(format!("{} recorded.", capitalize(self.kind.label())));
                Ok(record_id)
            }
            Err(e) => {
                let message = format!("Could not save attendance: {e}");
                Err(self.fail(FailureKind::Generic, &message, now).await)
            }
        }
    }

    async fn build_record(&self, now: NaiveDateTime) -> Result<AttendanceRecord, SessionError> {
        let mut record = self.base_record(now, AttendanceStatus::Berhasil);
        match self.kind {
            AttendanceKind::Masuk => {
                let lateness = policy::lateness(now.time(), &self.work_hours);
                record.is_late = lateness.is_late;
                record.late_minutes = lateness.late_minutes;
                record.daily_salary_earned =
                    policy::daily_salary_earned(self.monthly_salary, lateness.late_minutes);
            }
            AttendanceKind::Keluar => {
                let check_in = self
                    .deps
                    .attendance
                    .last_successful(self.employee_id)
                    .await?
                    .filter(|r| {
                        r.kind == AttendanceKind::Masuk && r.recorded_at.date() == now.date()
                    });
                if let Some(check_in) = check_in {
                    let elapsed = (now - check_in.recorded_at).num_minutes();
                    let split = policy::work_split(elapsed, &self.work_hours);
                    record.work_hours = split.work_hours;
                    record.overtime_hours = split.overtime_hours;
                } else {
                    tracing::info!(
                        employee_id = self.employee_id,
                        "check-out without check-in today"
                    );
                }
            }
        }
        record.note = summary_note(&record, &self.office);
        Ok(record)
    }

    fn base_record(&self, now: NaiveDateTime, status: AttendanceStatus) -> AttendanceRecord {
        let mut record = AttendanceRecord::new(self.employee_id, self.kind, now, status);
        if let Some(verdict) = self.location.verdict() {
            record.location = Some(verdict.coordinate);
            record.distance_m = Some(verdict.distance_m);
        }
        record
    }

    fn reject(&mut self, message: &str) -> SessionError {
        tracing::info!(employee_id = self.employee_id, reason = message, "submission rejected");
        self.set_message(message);
        SessionError::Rejected(message.to_string())
    }

    /// Record the failed attempt, return to step 1 and surface the message.
    async fn fail(&mut self, kind: FailureKind, message: &str, now: NaiveDateTime) -> SessionError {
        self.record_failure(kind, message, now).await;
        self.reset_attempt();
        self.set_message(message);
        SessionError::Failed {
            kind,
            message: message.to_string(),
        }
    }

    /// Best effort: a failed write is logged, never surfaced.
    async fn record_failure(&self, kind: FailureKind, message: &str, now: NaiveDateTime) {
        let mut record = self.base_record(now, kind.status());
        record.note = message.to_string();
        if let Err(e) = self.deps.attendance.insert_record(&record).await {
            tracing::warn!(
                employee_id = self.employee_id,
                error = %e,
                "failed-attempt record not saved"
            );
        }
        self.audit(
            "attendance.failed",
            serde_json::json!({
                "kind": self.kind,
                "status": kind.status(),
                "reason": message,
            }),
            now,
        )
        .await;
    }

    async fn audit(&self, action: &str, payload: serde_json::Value, now: NaiveDateTime) {
        let entry = ActivityEntry {
            actor: self.employee_id,
            action: action.to_string(),
            payload,
            created_at: now,
        };
        if let Err(e) = self.deps.activity.record(entry).await {
            tracing::warn!(action, error = %e, "activity log write failed");
        }
    }

    /// Discard the attempt. No records, no audit.
    pub fn cancel(&mut self) {
        if let SessionState::Submitted { .. } = self.state {
            return;
        }
        self.capture = None;
        self.captured = None;
        self.location = LocationState::Idle;
        self.message = None;
        self.state = SessionState::Cancelled;
        self.deps.speech.cancel();
        tracing::info!(employee_id = self.employee_id, "attendance session cancelled");
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            employee_id: self.employee_id,
            kind: self.kind,
            state: self.state.name(),
            step: self.step().map(|s| s.number()),
            blocked: match self.state {
                SessionState::Blocked(reason) => Some(reason),
                _ => None,
            },
            camera_required: self.camera_required,
            location: self.location.name(),
            distance_m: self.location.verdict().map(|v| v.distance_m),
            camera: self.capture.as_ref().map(|c| c.state()),
            face_captured: self.captured.is_some(),
            record_id: match self.state {
                SessionState::Submitted { record_id } => Some(record_id),
                _ => None,
            },
            message: self.message.clone(),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn summary_note(record: &AttendanceRecord, office: &OfficeLocation) -> String {
    let mut note = format!("{} at {}", record.kind.label(), record.recorded_at.format("%H:%M"));
    if let Some(d) = record.distance_m {
        note.push_str(&format!(", {d:.0} m from {}", office_name(office)));
    }
    match record.kind {
        AttendanceKind::Masuk if record.is_late => {
            note.push_str(&format!(", {} min late", record.late_minutes));
        }
        AttendanceKind::Masuk => note.push_str(", on time"),
        AttendanceKind::Keluar => {
            note.push_str(&format!(", {:.2} h worked", record.work_hours));
            if record.overtime_hours > 0.0 {
                note.push_str(&format!(", {:.2} h overtime", record.overtime_hours));
            }
        }
    }
    note
}

fn office_name(office: &OfficeLocation) -> &str {
    if office.address.is_empty() {
        "the office"
    } else {
        &office.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::testing::{face_like, solid, RecordingSpeech, ScriptedLocation, SyntheticCamera};
    use chrono::NaiveDate;
    use hadir_core::fingerprint::fingerprint_image;
    use hadir_core::Coordinate;
    use hadir_hw::LocationRequest;
    use hadir_store::{EmployeeProfile, MemoryStore};
    use image::{DynamicImage, RgbaImage};
    use std::sync::atomic::{AtomicBool, Ordering};

    const EMPLOYEE: i64 = 7;
    const SALARY: f64 = 6_600_000.0;

    fn office() -> OfficeLocation {
        OfficeLocation {
            coordinate: Coordinate { latitude: -6.2088, longitude: 106.8456 },
            radius_meters: 100,
            address: "HQ".into(),
        }
    }

    fn north_of_office(meters: f64) -> Coordinate {
        Coordinate {
            latitude: -6.2088 + meters / 111_195.0,
            longitude: 106.8456,
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 3).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn fingerprint_of(rgba: Vec<u8>, w: u32, h: u32) -> Fingerprint {
        fingerprint_image(&DynamicImage::ImageRgba8(RgbaImage::from_raw(w, h, rgba).unwrap()))
    }

    struct Harness {
        store: Arc<MemoryStore>,
        camera: Arc<SyntheticCamera>,
        speech: Arc<RecordingSpeech>,
        clock: Arc<FixedClock>,
        deps: SessionDeps,
    }

    fn harness(device: Coordinate, now: NaiveDateTime, stored: Option<Fingerprint>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        store.set_office_location(office());
        store.add_employee(EmployeeProfile {
            id: EMPLOYEE,
            name: "Sari".into(),
            monthly_salary: SALARY,
            face_fingerprint: stored,
        });
        let camera = Arc::new(SyntheticCamera::new(face_like(64, 64), 64, 64));
        let speech = Arc::new(RecordingSpeech::default());
        let clock = Arc::new(FixedClock::new(now));
        let locator = Arc::new(LocationVerifier::new(
            Arc::new(ScriptedLocation::at(device)),
            store.clone(),
            LocationRequest::default(),
        ));
        let deps = SessionDeps {
            settings: store.clone(),
            profiles: store.clone(),
            attendance: store.clone(),
            activity: store.clone(),
            locator,
            camera: camera.clone(),
            speech: speech.clone(),
            clock: clock.clone(),
            camera_constraints: CameraConstraints::default(),
            framing_rules: FramingRules::default(),
            match_threshold: hadir_core::fingerprint::DEFAULT_MATCH_THRESHOLD,
        };
        Harness {
            store,
            camera,
            speech,
            clock,
            deps,
        }
    }

    fn enrolled_harness(now: NaiveDateTime) -> Harness {
        harness(office().coordinate, now, Some(fingerprint_of(face_like(64, 64), 64, 64)))
    }

    fn prior(kind: AttendanceKind, when: NaiveDateTime) -> AttendanceRecord {
        AttendanceRecord::new(EMPLOYEE, kind, when, AttendanceStatus::Berhasil)
    }

    async fn to_confirm(session: &mut AttendanceSession) {
        assert!(session.verify_location().await.unwrap());
        if session.camera_required() {
            assert_eq!(session.step(), Some(Step::Face));
            session.open_camera(None).await.unwrap();
            session.capture_face().await.unwrap();
        }
        assert_eq!(session.step(), Some(Step::Confirm));
    }

    #[tokio::test]
    async fn test_happy_path_check_in() {
        let h = enrolled_harness(at(8, 5));
        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();
        assert_eq!(session.kind(), AttendanceKind::Masuk);
        assert_eq!(session.step(), Some(Step::Location));

        to_confirm(&mut session).await;
        let id = session.submit().await.unwrap();

        let records = h.store.records();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.id, Some(id));
        assert_eq!(r.status, AttendanceStatus::Berhasil);
        assert!(!r.is_late);
        assert_eq!(r.late_minutes, 0);
        assert!((r.daily_salary_earned - SALARY / 22.0).abs() < 1e-6);
        assert_eq!(r.location, Some(office().coordinate));
        assert!(r.note.contains("on time"), "{}", r.note);

        assert_eq!(session.state(), SessionState::Submitted { record_id: id });
        assert_eq!(h.store.activity()[0].action, "attendance.submitted");
        assert!(h.speech.lines().contains(&"Check-in recorded.".to_string()));

        assert!(matches!(session.submit().await, Err(SessionError::AlreadySubmitted)));
        assert_eq!(h.store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_radius_stays_at_location_step() {
        let h = harness(
            north_of_office(2000.0),
            at(8, 5),
            Some(fingerprint_of(face_like(64, 64), 64, 64)),
        );
        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();

        assert!(session.verify_location().await.unwrap());
        assert_eq!(session.step(), Some(Step::Location));
        let verdict = session.location_state().verdict().unwrap().clone();
        assert!(!verdict.is_valid);
        assert!((verdict.distance_m - 2000.0).abs() < 5.0);
        assert!(session.message().unwrap().contains("100 m"));

        let records = h.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AttendanceStatus::LokasiTidakValid);
        assert!(matches!(session.open_camera(None).await, Err(SessionError::NotAvailable(_))));
    }

    #[tokio::test]
    async fn test_duplicate_check_in_rejected_before_persistence() {
        let h = enrolled_harness(at(9, 0));
        h.store.push_record(prior(AttendanceKind::Masuk, at(8, 1)));
        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();
        assert_eq!(session.kind(), AttendanceKind::Keluar);

        session.select_kind(AttendanceKind::Masuk).unwrap();
        to_confirm(&mut session).await;
        let err = session.submit().await.unwrap_err();
        assert!(matches!(err, SessionError::Rejected(_)), "{err:?}");
        assert!(err.to_string().contains("already"));
        assert_eq!(h.store.records().len(), 1);
        assert_eq!(session.step(), Some(Step::Location));
    }

    #[tokio::test]
    async fn test_face_mismatch_writes_failed_record() {
        let stored = fingerprint_of(solid(64, 64, 255), 64, 64);
        let h = harness(office().coordinate, at(8, 5), Some(stored));
        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();
        to_confirm(&mut session).await;

        let err = session.submit().await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::FaceInvalid));
        let records = h.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AttendanceStatus::WajahTidakValid);
        assert_eq!(session.step(), Some(Step::Location));
        assert!(session.captured().is_none());
        assert_eq!(h.store.activity()[0].action, "attendance.failed");
    }

    #[tokio::test]
    async fn test_late_check_in_deducts_pay() {
        let h = enrolled_harness(at(8, 20));
        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();
        to_confirm(&mut session).await;
        session.submit().await.unwrap();

        let r = &h.store.records()[0];
        assert!(r.is_late);
        assert_eq!(r.late_minutes, 20);
        let daily = SALARY / 22.0;
        let expected = daily - daily * (20.0 / 60.0 * 0.1);
        assert!((r.daily_salary_earned - expected).abs() < 1e-6);
        assert!(r.note.contains("20 min late"), "{}", r.note);
    }

    #[tokio::test]
    async fn test_check_out_splits_overtime() {
        let h = harness(office().coordinate, at(17, 30), None);
        h.store.set_camera_verification(false);
        h.store.push_record(prior(AttendanceKind::Masuk, at(7, 30)));

        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();
        assert_eq!(session.kind(), AttendanceKind::Keluar);
        to_confirm(&mut session).await;
        session.submit().await.unwrap();

        let r = h.store.records().into_iter().last().unwrap();
        assert_eq!(r.kind, AttendanceKind::Keluar);
        // 10h elapsed - 1h break = 9h against an 8h standard
        assert!((r.work_hours - 8.0).abs() < 1e-9);
        assert!((r.overtime_hours - 1.0).abs() < 1e-9);
        assert_eq!(r.daily_salary_earned, 0.0);
        assert!(!r.is_late);
    }

    #[tokio::test]
    async fn test_check_out_without_check_in_has_no_hours() {
        let h = harness(office().coordinate, at(16, 0), None);
        h.store.set_camera_verification(false);
        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();
        session.select_kind(AttendanceKind::Keluar).unwrap();
        to_confirm(&mut session).await;
        session.submit().await.unwrap();

        let r = &h.store.records()[0];
        assert_eq!(r.work_hours, 0.0);
        assert_eq!(r.overtime_hours, 0.0);
    }

    #[tokio::test]
    async fn test_outside_window_rejected() {
        let h = enrolled_harness(at(6, 0));
        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();
        to_confirm(&mut session).await;
        let err = session.submit().await.unwrap_err();
        assert!(matches!(err, SessionError::Rejected(_)));
        assert!(err.to_string().contains("07:30"), "{err}");
        assert!(h.store.records().is_empty());
    }

    #[tokio::test]
    async fn test_missing_profile_photo_blocks_with_escape_hatch() {
        let h = harness(office().coordinate, at(8, 0), None);
        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();
        assert_eq!(session.state(), SessionState::Blocked(BlockReason::ProfileIncomplete));
        assert!(matches!(session.begin_location(), Err(SessionError::Blocked(_))));

        session.disable_camera_verification().unwrap();
        assert!(session.verify_location().await.unwrap());
        // Face step skipped entirely.
        assert_eq!(session.step(), Some(Step::Confirm));
        session.submit().await.unwrap();
        assert_eq!(h.camera.opens.load(Ordering::SeqCst), 0);
        // The setting itself is untouched.
        assert!(h.store.camera_verification_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_office_blocks() {
        let h = enrolled_harness(at(8, 0));
        h.store.set_office_location(OfficeLocation {
            radius_meters: 0,
            ..office()
        });
        let session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();
        assert_eq!(session.state(), SessionState::Blocked(BlockReason::OfficeNotConfigured));
        assert_eq!(session.status().state, "blocked");
    }

    #[tokio::test]
    async fn test_stale_location_attempt_ignored() {
        let h = enrolled_harness(at(8, 0));
        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();

        let (locator, first) = session.begin_location().unwrap();
        let (_, second) = session.begin_location().unwrap();
        let stale = locator.locate(first).await;
        assert!(!session.apply_location(first, stale).await.unwrap());
        assert_eq!(session.location_state(), &LocationState::Locating { attempt: second });

        let fresh = locator.locate(second).await;
        assert!(session.apply_location(second, fresh).await.unwrap());
        assert_eq!(session.step(), Some(Step::Face));
    }

    #[tokio::test]
    async fn test_photo_without_face_stays_at_face_step() {
        let h = enrolled_harness(at(8, 0));
        h.camera.show(solid(64, 64, 128), 64, 64);
        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();
        session.verify_location().await.unwrap();
        session.open_camera(None).await.unwrap();

        assert!(matches!(session.capture_face().await, Err(SessionError::NoFaceInPhoto)));
        assert_eq!(session.step(), Some(Step::Face));
        assert!(h.store.records().is_empty());

        h.camera.show(face_like(64, 64), 64, 64);
        session.open_camera(None).await.unwrap();
        session.capture_face().await.unwrap();
        assert_eq!(session.step(), Some(Step::Confirm));
    }

    #[tokio::test]
    async fn test_persistence_failure_records_gagal() {
        let h = enrolled_harness(at(8, 0));
        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();
        to_confirm(&mut session).await;

        h.store.fail_next_insert();
        let err = session.submit().await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::Generic));
        let records = h.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AttendanceStatus::Gagal);
        assert_eq!(session.step(), Some(Step::Location));

        // Retry from step 1 succeeds.
        to_confirm(&mut session).await;
        session.submit().await.unwrap();
    }

    /// Attendance store whose reads can be switched to fail; writes go through.
    struct FlakyReads {
        inner: Arc<MemoryStore>,
        fail_list: AtomicBool,
        fail_last: AtomicBool,
    }

    impl FlakyReads {
        fn over(inner: Arc<MemoryStore>) -> Arc<Self> {
            Arc::new(Self {
                inner,
                fail_list: AtomicBool::new(false),
                fail_last: AtomicBool::new(false),
            })
        }
    }

    #[async_trait::async_trait]
    impl AttendanceStore for FlakyReads {
        async fn insert_record(&self, record: &AttendanceRecord) -> Result<i64, StoreError> {
            self.inner.insert_record(record).await
        }

        async fn list_for_day(
            &self,
            employee_id: i64,
            day: NaiveDate,
        ) -> Result<Vec<AttendanceRecord>, StoreError> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(StoreError::Database("connection reset".into()));
            }
            self.inner.list_for_day(employee_id, day).await
        }

        async fn last_successful(
            &self,
            employee_id: i64,
        ) -> Result<Option<AttendanceRecord>, StoreError> {
            if self.fail_last.load(Ordering::SeqCst) {
                return Err(StoreError::Database("connection reset".into()));
            }
            self.inner.last_successful(employee_id).await
        }
    }

    #[tokio::test]
    async fn test_check_out_lookup_failure_records_gagal() {
        let h = harness(office().coordinate, at(17, 0), None);
        h.store.set_camera_verification(false);
        h.store.push_record(prior(AttendanceKind::Masuk, at(8, 0)));
        let flaky = FlakyReads::over(h.store.clone());
        let deps = SessionDeps {
            attendance: flaky.clone(),
            ..h.deps.clone()
        };

        let mut session = AttendanceSession::start(EMPLOYEE, deps).await.unwrap();
        assert_eq!(session.kind(), AttendanceKind::Keluar);
        to_confirm(&mut session).await;

        flaky.fail_last.store(true, Ordering::SeqCst);
        let err = session.submit().await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::Generic), "{err:?}");
        let statuses: Vec<_> = h.store.records().iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![AttendanceStatus::Berhasil, AttendanceStatus::Gagal]);
        assert_eq!(session.step(), Some(Step::Location));
        assert!(session.message().unwrap().contains("connection reset"));

        flaky.fail_last.store(false, Ordering::SeqCst);
        to_confirm(&mut session).await;
        session.submit().await.unwrap();
    }

    #[tokio::test]
    async fn test_today_lookup_failure_records_gagal() {
        let h = harness(office().coordinate, at(8, 0), None);
        h.store.set_camera_verification(false);
        let flaky = FlakyReads::over(h.store.clone());
        let deps = SessionDeps {
            attendance: flaky.clone(),
            ..h.deps.clone()
        };

        let mut session = AttendanceSession::start(EMPLOYEE, deps).await.unwrap();
        to_confirm(&mut session).await;

        flaky.fail_list.store(true, Ordering::SeqCst);
        let err = session.submit().await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::Generic), "{err:?}");
        let records = h.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AttendanceStatus::Gagal);
        assert_eq!(session.step(), Some(Step::Location));
    }

    #[tokio::test]
    async fn test_audit_failure_is_not_fatal() {
        let h = enrolled_harness(at(8, 0));
        h.store.fail_activity(true);
        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();
        to_confirm(&mut session).await;
        assert!(session.submit().await.is_ok());
        assert!(h.store.activity().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_releases_camera_without_side_effects() {
        let h = enrolled_harness(at(8, 0));
        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();
        session.verify_location().await.unwrap();
        session.open_camera(Some(Duration::from_millis(5))).await.unwrap();

        session.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.camera.released.load(Ordering::SeqCst));
        assert_eq!(session.state(), SessionState::Cancelled);
        assert!(h.store.records().is_empty());
        assert!(h.store.activity().is_empty());
        assert!(matches!(session.verify_location().await, Err(SessionError::Cancelled)));
    }

    #[tokio::test]
    async fn test_settings_snapshot_taken_at_start() {
        let h = enrolled_harness(at(8, 25));
        let mut session = AttendanceSession::start(EMPLOYEE, h.deps.clone()).await.unwrap();
        // Threshold raised after the session started; the snapshot still applies.
        h.store.set_work_hours(WorkHoursSettings {
            late_threshold_minutes: 60,
            ..WorkHoursSettings::default()
        });
        h.clock.set(at(8, 25));
        to_confirm(&mut session).await;
        session.submit().await.unwrap();
        assert!(h.store.records()[0].is_late);
    }

    #[test]
    fn test_failure_kind_status_tags() {
        assert_eq!(FailureKind::FaceInvalid.status().as_str(), "wajah_tidak_valid");
        assert_eq!(FailureKind::LocationInvalid.status().as_str(), "lokasi_tidak_valid");
        assert_eq!(FailureKind::Generic.status().as_str(), "gagal");
    }

    #[test]
    fn test_summary_note() {
        let mut r =
            AttendanceRecord::new(1, AttendanceKind::Keluar, at(17, 5), AttendanceStatus::Berhasil);
        r.distance_m = Some(12.4);
        r.work_hours = 8.0;
        r.overtime_hours = 0.5;
        assert_eq!(
            summary_note(&r, &office()),
            "check-out at 17:05, 12 m from HQ, 8.00 h worked, 0.50 h overtime"
        );
    }
}
