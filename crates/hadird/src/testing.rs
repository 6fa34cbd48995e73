//! Fakes for the device capabilities, shared by the daemon's unit tests.

use async_trait::async_trait;
use hadir_core::Coordinate;
use hadir_hw::{
    CameraConstraints, CameraError, CameraProvider, CameraStream, Frame, LocationError,
    LocationProvider, LocationRequest, PositionFix, SpeechFeedback,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Answers position requests from a script; repeats the last answer once the script runs dry.
pub struct ScriptedLocation {
    script: Mutex<VecDeque<(Duration, Result<PositionFix, LocationError>)>>,
    last: Mutex<Option<Result<PositionFix, LocationError>>>,
    pub calls: AtomicUsize,
}

impl ScriptedLocation {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn at(coordinate: Coordinate) -> Self {
        let s = Self::new();
        s.push(Duration::ZERO, Ok(PositionFix::fresh(coordinate)));
        s
    }

    pub fn push(&self, delay: Duration, answer: Result<PositionFix, LocationError>) {
        self.script.lock().unwrap().push_back((delay, answer));
    }
}

#[async_trait]
impl LocationProvider for ScriptedLocation {
    async fn current_position(
        &self,
        _request: &LocationRequest,
    ) -> Result<PositionFix, LocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let (delay, answer) = match next {
            Some(step) => step,
            None => (
                Duration::ZERO,
                self.last
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or(Err(LocationError::NotSupported)),
            ),
        };
        *self.last.lock().unwrap() = Some(answer.clone());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        answer
    }
}

/// A fix captured `age` ago.
pub fn aged_fix(coordinate: Coordinate, age: Duration) -> PositionFix {
    PositionFix {
        coordinate,
        accuracy_m: None,
        captured_at: Instant::now().checked_sub(age).unwrap_or_else(Instant::now),
    }
}

/// Camera that serves the same RGBA image forever.
pub struct SyntheticCamera {
    image: Mutex<(Vec<u8>, u32, u32)>,
    deny: bool,
    pub opens: AtomicUsize,
    pub released: Arc<AtomicBool>,
}

impl SyntheticCamera {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            image: Mutex::new((rgba, width, height)),
            deny: false,
            opens: AtomicUsize::new(0),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::new(Vec::new(), 0, 0)
        }
    }

    pub fn show(&self, rgba: Vec<u8>, width: u32, height: u32) {
        *self.image.lock().unwrap() = (rgba, width, height);
    }
}

#[async_trait]
impl CameraProvider for SyntheticCamera {
    async fn open(
        &self,
        _constraints: &CameraConstraints,
    ) -> Result<Box<dyn CameraStream>, CameraError> {
        if self.deny {
            return Err(CameraError::PermissionDenied("synthetic".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.released.store(false, Ordering::SeqCst);
        let (data, width, height) = self.image.lock().unwrap().clone();
        Ok(Box::new(SyntheticStream {
            data,
            width,
            height,
            sequence: 0,
            active: true,
            released: self.released.clone(),
        }))
    }
}

struct SyntheticStream {
    data: Vec<u8>,
    width: u32,
    height: u32,
    sequence: u32,
    active: bool,
    released: Arc<AtomicBool>,
}

impl CameraStream for SyntheticStream {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        if !self.active {
            return Err(CameraError::Stopped);
        }
        self.sequence += 1;
        Frame::from_rgba(self.data.clone(), self.width, self.height, self.sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    fn stop(&mut self) {
        self.active = false;
        self.released.store(true, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[derive(Default)]
pub struct RecordingSpeech {
    pub spoken: Mutex<Vec<String>>,
    pub cancels: AtomicUsize,
}

impl RecordingSpeech {
    pub fn lines(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl SpeechFeedback for RecordingSpeech {
    fn speak(&self, message: &str) {
        self.spoken.lock().unwrap().push(message.to_string());
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn solid(w: u32, h: u32, v: u8) -> Vec<u8> {
    (0..w * h).flat_map(|_| [v, v, v, 255]).collect()
}

/// Bright oval with two dark eyes on a mid-gray background.
pub fn face_like(w: u32, h: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity((w * h * 4) as usize);
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    for y in 0..h {
        for x in 0..w {
            let nx = (x as f32 - cx) / (w as f32 * 0.3);
            let ny = (y as f32 - cy) / (h as f32 * 0.4);
            let mut v = if nx * nx + ny * ny < 1.0 { 190u8 } else { 90u8 };
            let eye_y = cy - h as f32 * 0.1;
            for eye_x in [cx - w as f32 * 0.12, cx + w as f32 * 0.12] {
                let ex = x as f32 - eye_x;
                let ey = y as f32 - eye_y;
                if ex * ex + ey * ey < (w as f32 * 0.04).powi(2) {
                    v = 30;
                }
            }
            buf.extend_from_slice(&[v, v, v, 255]);
        }
    }
    buf
}
