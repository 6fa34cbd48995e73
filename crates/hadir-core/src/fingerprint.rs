//! Block-average face fingerprint.
//!
//! A fingerprint is the list of luma block averages of an image at block
//! sizes 4, 8 and 16 (block size, then row, then column), joined with commas
//! and base64-encoded. It is not a biometric template: the comparison is a
//! permissive pixel-tolerance heuristic and must not be treated as strong
//! identity proof.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Block sizes, in pixels, sampled in this order.
pub const BLOCK_SIZES: [usize; 3] = [4, 8, 16];

/// Side length images are resized to before fingerprinting, so that stored
/// profile photos and live captures yield vectors of the same length.
pub const CANONICAL_SIZE: u32 = 128;

/// Threshold used by the attendance flow.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.7;

/// Per-feature difference still counted as a match by the tolerance metric.
const FEATURE_TOLERANCE: f64 = 120.0;

const WEIGHT_EUCLIDEAN: f64 = 0.05;
const WEIGHT_COSINE: f64 = 0.05;
const WEIGHT_TOLERANCE: f64 = 0.9;

/// Absorbs float noise so that a fingerprint always matches itself at threshold 1.0.
const SCORE_EPSILON: f64 = 1e-9;

// looks_like_face tuning
const EDGE_THRESHOLD: f32 = 10.0;
const SYMMETRY_TOLERANCE: f32 = 80.0;
const EDGE_RATIO_RANGE: (f64, f64) = (0.01, 0.5);
const MIN_SYMMETRY_RATIO: f64 = 0.03;
const MIN_AVG_CONTRAST: f64 = 5.0;
const BRIGHTNESS_RANGE: (f64, f64) = (20.0, 230.0);

/// Encoded fingerprint string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an encoded string without validating it; malformed input simply
    /// never matches.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode to the feature vector. `None` when the string is not a valid fingerprint.
    pub fn features(&self) -> Option<Vec<f64>> {
        let bytes = STANDARD.decode(self.0.trim()).ok()?;
        let text = String::from_utf8(bytes).ok()?;
        if text.is_empty() {
            return None;
        }
        text.split(',')
            .map(|v| v.trim().parse::<f64>().ok().filter(|f| f.is_finite()))
            .collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Similarity breakdown between two fingerprints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub euclidean: f64,
    pub cosine: f64,
    pub tolerance: f64,
}

impl Similarity {
    pub fn combined(&self) -> f64 {
        WEIGHT_EUCLIDEAN * self.euclidean
            + WEIGHT_COSINE * self.cosine
            + WEIGHT_TOLERANCE * self.tolerance
    }
}

#[inline]
fn luma(px: &[u8]) -> f64 {
    0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64
}

/// Build a fingerprint from a tightly packed RGBA buffer.
///
/// Edge blocks are averaged over the pixels they actually cover. A buffer
/// shorter than `width * height * 4` is treated as having zero-sized rows
/// past its end, so the result is still deterministic.
pub fn generate_fingerprint(rgba: &[u8], width: u32, height: u32) -> Fingerprint {
    let features = block_features(rgba, width as usize, height as usize);
    let joined = features
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(",");
    Fingerprint(STANDARD.encode(joined))
}

fn block_features(rgba: &[u8], w: usize, h: usize) -> Vec<u32> {
    let rows = if w == 0 { 0 } else { h.min(rgba.len() / (w * 4)) };
    let mut features = Vec::new();

    for &bs in &BLOCK_SIZES {
        for by in (0..rows).step_by(bs) {
            for bx in (0..w).step_by(bs) {
                let y_end = (by + bs).min(rows);
                let x_end = (bx + bs).min(w);
                let mut sum = 0.0f64;
                let mut count = 0usize;
                for y in by..y_end {
                    for x in bx..x_end {
                        let i = (y * w + x) * 4;
                        sum += luma(&rgba[i..i + 3]);
                        count += 1;
                    }
                }
                features.push((sum / count as f64).round() as u32);
            }
        }
    }

    features
}

/// Resize to the canonical square and fingerprint it.
pub fn fingerprint_image(img: &DynamicImage) -> Fingerprint {
    let canonical = img
        .resize_exact(CANONICAL_SIZE, CANONICAL_SIZE, FilterType::Triangle)
        .to_rgba8();
    generate_fingerprint(canonical.as_raw(), canonical.width(), canonical.height())
}

/// Permissive "is there plausibly a face" gate over an RGBA buffer.
///
/// Looks at the interior pixels (1 px border excluded) and accepts when the
/// edge density, left/right symmetry, local contrast and center-weighted
/// brightness all fall inside loose bounds.
pub fn looks_like_face(rgba: &[u8], width: u32, height: u32) -> bool {
    let w = width as usize;
    let h = height as usize;
    if w < 3 || h < 3 || rgba.len() < w * h * 4 {
        return false;
    }

    let gray: Vec<f32> = rgba[..w * h * 4]
        .chunks_exact(4)
        .map(|px| luma(px) as f32)
        .collect();
    let at = |x: usize, y: usize| gray[y * w + x];

    let cx = w as f64 / 2.0;
    let cy = h as f64 / 2.0;
    let max_dist = (cx * cx + cy * cy).sqrt();

    let mut edge_pixels = 0usize;
    let mut symmetric_pixels = 0usize;
    let mut contrast_sum = 0.0f64;
    let mut weighted_brightness = 0.0f64;
    let mut weight_total = 0.0f64;
    let mut total = 0usize;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = at(x, y);
            let left = at(x - 1, y);
            let right = at(x + 1, y);
            let up = at(x, y - 1);
            let down = at(x, y + 1);

            let gx = right - left;
            let gy = down - up;
            if (gx * gx + gy * gy).sqrt() > EDGE_THRESHOLD {
                edge_pixels += 1;
            }

            if (x as f64) < cx {
                let mirror = at(w - 1 - x, y);
                if (center - mirror).abs() < SYMMETRY_TOLERANCE {
                    symmetric_pixels += 1;
                }
            }

            let cross = [center, left, right, up, down];
            let max = cross.iter().copied().fold(f32::MIN, f32::max);
            let min = cross.iter().copied().fold(f32::MAX, f32::min);
            contrast_sum += (max - min) as f64;

            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let weight = (1.0 - (dx * dx + dy * dy).sqrt() / max_dist).max(0.0);
            weighted_brightness += center as f64 * weight;
            weight_total += weight;

            total += 1;
        }
    }

    let total = total as f64;
    let edge_ratio = edge_pixels as f64 / total;
    let symmetry_ratio = symmetric_pixels as f64 / total;
    let avg_contrast = contrast_sum / total;
    let avg_brightness = if weight_total > 0.0 {
        weighted_brightness / weight_total
    } else {
        0.0
    };

    let accepted = edge_ratio > EDGE_RATIO_RANGE.0
        && edge_ratio < EDGE_RATIO_RANGE.1
        && symmetry_ratio > MIN_SYMMETRY_RATIO
        && avg_contrast > MIN_AVG_CONTRAST
        && avg_brightness > BRIGHTNESS_RANGE.0
        && avg_brightness < BRIGHTNESS_RANGE.1;

    tracing::debug!(
        edge_ratio,
        symmetry_ratio,
        avg_contrast,
        avg_brightness,
        accepted,
        "face heuristic"
    );

    accepted
}

/// Score two fingerprints. `None` when either is malformed or the lengths differ.
pub fn similarity(a: &Fingerprint, b: &Fingerprint) -> Option<Similarity> {
    let fa = a.features()?;
    let fb = b.features()?;
    if fa.len() != fb.len() || fa.is_empty() {
        return None;
    }

    let n = fa.len() as f64;
    let mut sq_diff = 0.0f64;
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    let mut within = 0usize;

    for (x, y) in fa.iter().zip(fb.iter()) {
        let d = x - y;
        sq_diff += d * d;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
        if d.abs() <= FEATURE_TOLERANCE {
            within += 1;
        }
    }

    let max_distance = (n * 255.0 * 255.0).sqrt();
    let euclidean = 1.0 - sq_diff.sqrt() / max_distance;

    let denom = norm_a.sqrt() * norm_b.sqrt();
    let cosine = if denom > 0.0 {
        (dot / denom).clamp(0.0, 1.0)
    } else if norm_a == 0.0 && norm_b == 0.0 {
        // Two all-black images are identical, not orthogonal.
        1.0
    } else {
        0.0
    };

    Some(Similarity {
        euclidean,
        cosine,
        tolerance: within as f64 / n,
    })
}

/// Weighted match decision. Absent or malformed fingerprints never match.
pub fn compare_fingerprints(
    a: Option<&Fingerprint>,
    b: Option<&Fingerprint>,
    threshold: f64,
) -> bool {
    let (Some(a), Some(b)) = (a, b) else {
        return false;
    };
    match similarity(a, b) {
        Some(s) => s.combined() + SCORE_EPSILON >= threshold,
        None => false,
    }
}
