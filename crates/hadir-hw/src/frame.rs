//! Frame type and pixel conversion: YUYV/GREY to RGBA, dark detection.

/// A captured camera frame, tightly packed RGBA.
#[derive(Clone)]
pub struct Frame {
    /// RGBA pixel data (width * height * 4 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Build a frame from RGBA data, computing the dark flag.
    pub fn from_rgba(
        data: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = buffer_len(width, height, 4)?;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        let is_dark = is_dark_frame(&data, 0.95);
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        })
    }

    /// Horizontally flipped copy. Front cameras deliver a mirror image; the
    /// still photo must not be.
    pub fn mirrored(&self) -> Self {
        let row_len = self.width as usize * 4;
        let mut data = Vec::with_capacity(self.data.len());
        for row in self.data.chunks_exact(row_len.max(4)) {
            for px in row.chunks_exact(4).rev() {
                data.extend_from_slice(px);
            }
        }
        Self {
            data,
            width: self.width,
            height: self.height,
            timestamp: self.timestamp,
            sequence: self.sequence,
            is_dark: self.is_dark,
        }
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let pixels = self.data.len() / 4;
        self.data.chunks_exact(4).map(luma).sum::<f32>() / pixels as f32
    }
}

#[inline]
fn luma(px: &[u8]) -> f32 {
    0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32
}

/// Bytes needed for a `width`x`height` buffer at `bytes_per_pixel`.
pub fn buffer_len(width: u32, height: u32, bytes_per_pixel: usize) -> Result<usize, FrameError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(bytes_per_pixel))
        .ok_or(FrameError::TooLarge { width, height })
}

#[inline]
fn clip(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Convert packed YUYV (4:2:2) to RGBA using BT.601 integer coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgba(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = buffer_len(width, height, 2)?;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgba = Vec::with_capacity(expected * 2);
    for quad in yuyv[..expected].chunks_exact(4) {
        let d = quad[1] as i32 - 128;
        let e = quad[3] as i32 - 128;
        for y in [quad[0], quad[2]] {
            let c = y as i32 - 16;
            rgba.push(clip((298 * c + 409 * e + 128) >> 8));
            rgba.push(clip((298 * c - 100 * d - 208 * e + 128) >> 8));
            rgba.push(clip((298 * c + 516 * d + 128) >> 8));
            rgba.push(255);
        }
    }
    Ok(rgba)
}

/// Expand 8-bit grayscale to RGBA.
pub fn grey_to_rgba(gray: &[u8]) -> Vec<u8> {
    gray.iter().flat_map(|&g| [g, g, g, 255]).collect()
}

/// Check if an RGBA frame is dark: more than `threshold_pct` of pixels with luma below 32.
pub fn is_dark_frame(rgba: &[u8], threshold_pct: f32) -> bool {
    let pixels = rgba.len() / 4;
    if pixels == 0 {
        return true;
    }
    let dark_count = rgba.chunks_exact(4).filter(|px| luma(px) < 32.0).count();
    (dark_count as f32 / pixels as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame dimensions {width}x{height} are too large")]
    TooLarge { width: u32, height: u32 },
}
