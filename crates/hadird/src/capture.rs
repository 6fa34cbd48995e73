//! Face capture: camera worker thread, framing feedback, still capture.

use hadir_core::fingerprint::{fingerprint_image, looks_like_face, Fingerprint};
use hadir_core::framing::{classify, locate_face, Framing, FramingRules, FramingTracker};
use hadir_core::BoundingBox;
use hadir_hw::{CameraConstraints, CameraError, CameraProvider, CameraStream, Frame, SpeechFeedback};
use image::{DynamicImage, ImageFormat, RgbaImage};
use serde::Serialize;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("failed to encode photo: {0}")]
    Encode(String),
    #[error("failed to start camera worker: {0}")]
    Worker(String),
    #[error("camera is not streaming")]
    NotStreaming,
    #[error("camera worker exited")]
    ChannelClosed,
}

/// Still photo taken by [`FaceCapture::capture`].
#[derive(Clone)]
pub struct CaptureResult {
    /// Mirror-corrected PNG.
    pub photo_png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// `None` when the photo did not pass the face heuristic.
    pub fingerprint: Option<Fingerprint>,
}

impl std::fmt::Debug for CaptureResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureResult")
            .field("photo_png", &format_args!("{} bytes", self.photo_png.len()))
            .field("width", &self.width)
            .field("height", &self.height)
            .field("fingerprint", &self.fingerprint.is_some())
            .finish()
    }
}

/// Latest framing classification for the live preview.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FramingFeedback {
    #[serde(serialize_with = "framing_name")]
    pub framing: Framing,
    pub face: Option<BoundingBox>,
    pub ready: bool,
    /// Readiness flipped on this frame.
    pub changed: bool,
}

impl FramingFeedback {
    pub fn message(&self) -> &'static str {
        self.framing.message()
    }
}

fn framing_name<S: serde::Serializer>(framing: &Framing, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(match framing {
        Framing::NoFace => "no_face",
        Framing::OffCenter => "off_center",
        Framing::TooSmall => "too_small",
        Framing::Centered => "centered",
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Streaming,
    Captured,
    Stopped,
}

enum CameraRequest {
    Grab { reply: oneshot::Sender<Result<Frame, CameraError>> },
    Stop,
}

/// Clone-safe handle to the camera worker thread.
#[derive(Clone)]
struct CameraHandle {
    tx: mpsc::Sender<CameraRequest>,
}

impl CameraHandle {
    /// Move `stream` onto a dedicated OS thread; capture calls block.
    fn spawn(mut stream: Box<dyn CameraStream>) -> Result<Self, CaptureError> {
        let (tx, mut rx) = mpsc::channel::<CameraRequest>(4);
        std::thread::Builder::new()
            .name("hadir-camera".into())
            .spawn(move || {
                tracing::debug!("camera worker started");
                while let Some(req) = rx.blocking_recv() {
                    match req {
                        CameraRequest::Grab { reply } => {
                            let _ = reply.send(stream.next_frame());
                        }
                        CameraRequest::Stop => break,
                    }
                }
                stream.stop();
                tracing::debug!("camera worker exiting");
            })
            .map_err(|e| CaptureError::Worker(e.to_string()))?;
        Ok(Self { tx })
    }

    async fn grab(&self) -> Result<Frame, CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CameraRequest::Grab { reply })
            .await
            .map_err(|_| CaptureError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| CaptureError::ChannelClosed)??)
    }

    fn stop(&self) {
        // Full queue: the worker still exits once every handle is dropped.
        let _ = self.tx.try_send(CameraRequest::Stop);
    }
}

/// Framing classification with edge-triggered spoken feedback.
struct FramingMonitor {
    rules: FramingRules,
    tracker: FramingTracker,
    speech: Arc<dyn SpeechFeedback>,
}

impl FramingMonitor {
    fn observe(&mut self, frame: &Frame) -> FramingFeedback {
        let face = locate_face(&frame.data, frame.width, frame.height);
        let framing = classify(face.as_ref(), frame.width, frame.height, &self.rules);
        let changed = self.tracker.observe(framing).is_some();
        if changed {
            tracing::debug!(?framing, "framing changed");
            self.speech.speak(framing.message());
        }
        FramingFeedback {
            framing,
            face,
            ready: framing.is_ready(),
            changed,
        }
    }
}

fn lock_monitor(monitor: &Mutex<FramingMonitor>) -> std::sync::MutexGuard<'_, FramingMonitor> {
    match monitor.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Periodic framing evaluation while the camera streams. Aborted on drop.
struct FramingLoop {
    task: JoinHandle<()>,
    latest: watch::Receiver<Option<FramingFeedback>>,
}

impl FramingLoop {
    fn spawn(camera: CameraHandle, monitor: Arc<Mutex<FramingMonitor>>, period: Duration) -> Self {
        let (tx, latest) = watch::channel(None);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let frame = match camera.grab().await {
                    Ok(frame) => frame,
                    Err(CaptureError::ChannelClosed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "framing frame grab failed");
                        continue;
                    }
                };
                let feedback = lock_monitor(&monitor).observe(&frame);
                if tx.send(Some(feedback)).is_err() {
                    break;
                }
            }
        });
        Self { task, latest }
    }
}

impl Drop for FramingLoop {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A live camera session for taking one attendance photo.
///
/// Dropping it releases the camera, stops the framing loop and cuts off
/// any pending speech.
pub struct FaceCapture {
    camera: Option<CameraHandle>,
    monitor: Arc<Mutex<FramingMonitor>>,
    framing: Option<FramingLoop>,
    speech: Arc<dyn SpeechFeedback>,
    state: CaptureState,
}

impl FaceCapture {
    /// Acquire the camera. No retry on denial: the caller starts over.
    pub async fn start(
        provider: &dyn CameraProvider,
        constraints: &CameraConstraints,
        speech: Arc<dyn SpeechFeedback>,
        rules: FramingRules,
    ) -> Result<Self, CaptureError> {
        let stream = provider.open(constraints).await?;
        tracing::info!(width = stream.width(), height = stream.height(), "capture streaming");
        let camera = CameraHandle::spawn(stream)?;
        Ok(Self {
            camera: Some(camera),
            monitor: Arc::new(Mutex::new(FramingMonitor {
                rules,
                tracker: FramingTracker::default(),
                speech: speech.clone(),
            })),
            framing: None,
            speech,
            state: CaptureState::Streaming,
        })
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    fn camera(&self) -> Result<&CameraHandle, CaptureError> {
        self.camera.as_ref().ok_or(CaptureError::NotStreaming)
    }

    /// Evaluate framing every `period` in the background.
    pub fn run_framing_loop(&mut self, period: Duration) -> Result<(), CaptureError> {
        let camera = self.camera()?.clone();
        self.framing = Some(FramingLoop::spawn(camera, self.monitor.clone(), period));
        Ok(())
    }

    /// Evaluate framing on one fresh frame.
    pub async fn poll_framing(&mut self) -> Result<FramingFeedback, CaptureError> {
        let frame = self.camera()?.grab().await?;
        Ok(self.observe_frame(&frame))
    }

    pub fn observe_frame(&mut self, frame: &Frame) -> FramingFeedback {
        lock_monitor(&self.monitor).observe(frame)
    }

    /// Latest feedback: from the background loop when running, else from a new frame.
    pub async fn framing(&mut self) -> Result<FramingFeedback, CaptureError> {
        if let Some(latest) = self.framing.as_ref().and_then(|l| *l.latest.borrow()) {
            return Ok(latest);
        }
        self.poll_framing().await
    }

    /// Take the photo.
    ///
    /// Always yields a photo. A failed face heuristic yields no fingerprint
    /// and keeps the camera streaming for another try; a good photo
    /// releases the camera.
    pub async fn capture(&mut self) -> Result<CaptureResult, CaptureError> {
        let frame = self.camera()?.grab().await?.mirrored();
        let result = still_from_frame(frame)?;

        if result.fingerprint.is_some() {
            tracing::info!(width = result.width, height = result.height, "face captured");
            self.speech.speak("Photo captured.");
            self.release();
            self.state = CaptureState::Captured;
        } else {
            tracing::info!("captured photo does not look like a face");
            self.speech.speak("No face recognised. Face the camera and try again.");
        }
        Ok(result)
    }

    fn release(&mut self) {
        self.framing = None;
        if let Some(camera) = self.camera.take() {
            camera.stop();
        }
    }

    /// Release the camera and cancel feedback. Idempotent.
    pub fn stop(&mut self) {
        self.release();
        self.speech.cancel();
        if self.state == CaptureState::Streaming {
            self.state = CaptureState::Stopped;
        }
    }
}

impl Drop for FaceCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Encode a (mirror-corrected) frame and fingerprint it if it passes the face heuristic.
pub fn still_from_frame(frame: Frame) -> Result<CaptureResult, CaptureError> {
    let (width, height) = (frame.width, frame.height);
    let is_face = looks_like_face(&frame.data, width, height);
    let img = RgbaImage::from_raw(width, height, frame.data)
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| CaptureError::Encode("frame buffer does not match its dimensions".into()))?;

    let fingerprint = is_face.then(|| fingerprint_image(&img));

    let mut photo_png = Vec::new();
    img.write_to(&mut Cursor::new(&mut photo_png), ImageFormat::Png)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;

    Ok(CaptureResult {
        photo_png,
        width,
        height,
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face_like, solid, RecordingSpeech, SyntheticCamera};
    use std::sync::atomic::Ordering;

    async fn start(camera: &SyntheticCamera, speech: Arc<RecordingSpeech>) -> FaceCapture {
        FaceCapture::start(camera, &CameraConstraints::default(), speech, FramingRules::default())
            .await
            .unwrap()
    }

    /// Gray frame with a bright centered square.
    fn centered_square(w: u32, h: u32, size: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                let inside = x + size / 2 >= w / 2
                    && x < w / 2 + size / 2
                    && y + size / 2 >= h / 2
                    && y < h / 2 + size / 2;
                let v = if inside { 220 } else { 60 };
                buf.extend_from_slice(&[v, v, v, 255]);
            }
        }
        buf
    }

    #[tokio::test]
    async fn test_capture_face_yields_fingerprint_and_releases_camera() {
        let camera = SyntheticCamera::new(face_like(64, 64), 64, 64);
        let speech = Arc::new(RecordingSpeech::default());
        let mut capture = start(&camera, speech.clone()).await;

        let result = capture.capture().await.unwrap();
        assert!(result.fingerprint.is_some());
        assert_eq!((result.width, result.height), (64, 64));
        assert_eq!(&result.photo_png[1..4], b"PNG");
        assert_eq!(capture.state(), CaptureState::Captured);
        assert!(matches!(capture.capture().await, Err(CaptureError::NotStreaming)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(camera.released.load(Ordering::SeqCst));
        assert_eq!(speech.lines(), vec!["Photo captured.".to_string()]);
    }

    #[tokio::test]
    async fn test_capture_without_face_keeps_streaming() {
        let camera = SyntheticCamera::new(solid(64, 64, 128), 64, 64);
        let mut capture = start(&camera, Arc::new(RecordingSpeech::default())).await;

        let result = capture.capture().await.unwrap();
        assert!(result.fingerprint.is_none());
        assert!(!result.photo_png.is_empty());
        assert_eq!(capture.state(), CaptureState::Streaming);
        assert!(capture.capture().await.is_ok());
    }

    #[tokio::test]
    async fn test_camera_denied() {
        let camera = SyntheticCamera::denied();
        let err = FaceCapture::start(
            &camera,
            &CameraConstraints::default(),
            Arc::new(RecordingSpeech::default()),
            FramingRules::default(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, CaptureError::Camera(CameraError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_framing_feedback_spoken_on_transitions_only() {
        let camera = SyntheticCamera::new(solid(320, 240, 128), 320, 240);
        let speech = Arc::new(RecordingSpeech::default());
        let mut capture = start(&camera, speech.clone()).await;

        let blank = Frame::from_rgba(solid(320, 240, 128), 320, 240, 1).unwrap();
        let face = Frame::from_rgba(centered_square(320, 240, 140), 320, 240, 2).unwrap();

        let first = capture.observe_frame(&blank);
        assert_eq!(first.framing, Framing::NoFace);
        assert!(first.changed);
        assert!(!capture.observe_frame(&blank).changed);

        let ready = capture.observe_frame(&face);
        assert!(ready.ready, "{ready:?}");
        assert!(ready.changed);
        assert!(!capture.observe_frame(&face).changed);

        assert_eq!(
            speech.lines(),
            vec![Framing::NoFace.message().to_string(), Framing::Centered.message().to_string()]
        );
    }

    #[tokio::test]
    async fn test_framing_loop_publishes_latest() {
        let camera = SyntheticCamera::new(centered_square(320, 240, 140), 320, 240);
        let mut capture = start(&camera, Arc::new(RecordingSpeech::default())).await;
        capture.run_framing_loop(Duration::from_millis(5)).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let feedback = capture.framing().await.unwrap();
        assert!(feedback.ready, "{feedback:?}");
    }

    #[tokio::test]
    async fn test_stop_releases_camera_and_cancels_speech() {
        let camera = SyntheticCamera::new(face_like(64, 64), 64, 64);
        let speech = Arc::new(RecordingSpeech::default());
        let mut capture = start(&camera, speech.clone()).await;
        capture.run_framing_loop(Duration::from_millis(5)).unwrap();

        drop(capture);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(camera.released.load(Ordering::SeqCst));
        assert_eq!(speech.cancels.load(Ordering::SeqCst), 1);
    }
}
