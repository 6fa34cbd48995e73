//! Live face framing: locate a face-like region in a frame and decide
//! whether it is centered and large enough to capture.

use crate::types::BoundingBox;

/// Sampling stride for the locator; full resolution is not needed for framing.
const LOCATE_STRIDE: usize = 4;
/// Gradient half-span; with the stride above every step edge lands in some sample's window.
const LOCATE_SPAN: usize = LOCATE_STRIDE / 2;
const LOCATE_EDGE_THRESHOLD: f32 = 24.0;
/// Minimum share of sampled pixels that must be edges before a region is reported.
const LOCATE_MIN_EDGE_RATIO: f32 = 0.01;
/// Half-extent of the box in standard deviations of the edge cloud.
const LOCATE_SPREAD: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramingRules {
    /// Maximum offset of the box center from the frame center, as a fraction
    /// of the frame width (horizontal) or height (vertical).
    pub max_center_offset: f32,
    /// Minimum box width and height in pixels.
    pub min_face_px: f32,
}

impl Default for FramingRules {
    fn default() -> Self {
        Self {
            max_center_offset: 0.15,
            min_face_px: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    NoFace,
    OffCenter,
    TooSmall,
    Centered,
}

impl Framing {
    pub fn is_ready(&self) -> bool {
        *self == Framing::Centered
    }

    pub fn message(&self) -> &'static str {
        match self {
            Framing::NoFace => "No face detected. Look at the camera.",
            Framing::OffCenter => "Move your face to the center of the frame.",
            Framing::TooSmall => "Move closer to the camera.",
            Framing::Centered => "Face is centered. Hold still and capture.",
        }
    }
}

/// Classify a detected region against the frame.
pub fn classify(
    face: Option<&BoundingBox>,
    frame_width: u32,
    frame_height: u32,
    rules: &FramingRules,
) -> Framing {
    let Some(face) = face else {
        return Framing::NoFace;
    };

    let (fx, fy) = face.center();
    let dx = (fx - frame_width as f32 / 2.0).abs();
    let dy = (fy - frame_height as f32 / 2.0).abs();
    if dx > frame_width as f32 * rules.max_center_offset
        || dy > frame_height as f32 * rules.max_center_offset
    {
        return Framing::OffCenter;
    }
    if face.width < rules.min_face_px || face.height < rules.min_face_px {
        return Framing::TooSmall;
    }
    Framing::Centered
}

/// Estimate the face region from the spread of strong edges in an RGBA frame.
///
/// The box is centered on the edge centroid and spans `LOCATE_SPREAD`
/// standard deviations each way, clamped to the frame.
pub fn locate_face(rgba: &[u8], width: u32, height: u32) -> Option<BoundingBox> {
    let w = width as usize;
    let h = height as usize;
    if w <= 2 * LOCATE_SPAN || h <= 2 * LOCATE_SPAN || rgba.len() < w * h * 4 {
        return None;
    }

    let gray = |x: usize, y: usize| -> f32 {
        let i = (y * w + x) * 4;
        0.299 * rgba[i] as f32 + 0.587 * rgba[i + 1] as f32 + 0.114 * rgba[i + 2] as f32
    };

    let mut n = 0f32;
    let mut sampled = 0f32;
    let (mut sx, mut sy, mut sxx, mut syy) = (0f32, 0f32, 0f32, 0f32);

    for y in (LOCATE_SPAN..h - LOCATE_SPAN).step_by(LOCATE_STRIDE) {
        for x in (LOCATE_SPAN..w - LOCATE_SPAN).step_by(LOCATE_STRIDE) {
            sampled += 1.0;
            let gx = gray(x + LOCATE_SPAN, y) - gray(x - LOCATE_SPAN, y);
            let gy = gray(x, y + LOCATE_SPAN) - gray(x, y - LOCATE_SPAN);
            if (gx * gx + gy * gy).sqrt() <= LOCATE_EDGE_THRESHOLD {
                continue;
            }
            let (xf, yf) = (x as f32, y as f32);
            n += 1.0;
            sx += xf;
            sy += yf;
            sxx += xf * xf;
            syy += yf * yf;
        }
    }

    let ratio = n / sampled;
    if n < 2.0 || ratio < LOCATE_MIN_EDGE_RATIO {
        return None;
    }

    let mx = sx / n;
    let my = sy / n;
    let sdx = (sxx / n - mx * mx).max(0.0).sqrt();
    let sdy = (syy / n - my * my).max(0.0).sqrt();

    let x0 = (mx - LOCATE_SPREAD * sdx).max(0.0);
    let y0 = (my - LOCATE_SPREAD * sdy).max(0.0);
    let x1 = (mx + LOCATE_SPREAD * sdx).min(w as f32);
    let y1 = (my + LOCATE_SPREAD * sdy).min(h as f32);

    Some(BoundingBox {
        x: x0,
        y: y0,
        width: x1 - x0,
        height: y1 - y0,
        confidence: ratio.min(1.0),
    })
}

/// Emits framing feedback only on rising/falling edges of readiness.
#[derive(Debug, Default)]
pub struct FramingTracker {
    ready: Option<bool>,
}

impl FramingTracker {
    /// Feed one classification. Returns `Some` only when readiness flipped
    /// (or on the very first observation).
    pub fn observe(&mut self, framing: Framing) -> Option<Framing> {
        let ready = framing.is_ready();
        if self.ready == Some(ready) {
            return None;
        }
        self.ready = Some(ready);
        Some(framing)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.unwrap_or(false)
    }

    pub fn reset(&mut self) {
        self.ready = None;
    }
}
