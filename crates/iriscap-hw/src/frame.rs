//! Frame type returned by every capture, real or degraded.

use crate::native::{FrameSize, RawImage};
use ndarray::Array2;
use std::time::Instant;

/// A captured frame.
///
/// Degraded frames have the same shape as real ones but are zero-filled and
/// carry no capture time, so consumers never need a separate code path.
#[derive(Debug, Clone)]
pub struct Frame {
    /// 8-bit luma, shape `(height, width)`.
    pub pixels: Array2<u8>,
    /// Monotonic capture time; `None` for degraded frames.
    pub captured_at: Option<Instant>,
}

impl Frame {
    /// Zero-filled placeholder with the expected dimensions.
    pub fn degraded(size: FrameSize) -> Self {
        Self {
            pixels: Array2::zeros((size.height as usize, size.width as usize)),
            captured_at: None,
        }
    }

    /// Wrap a native image, checking it against the configured size.
    ///
    /// Returns `None` when the image does not match `size`.
    pub fn from_raw(raw: RawImage, size: FrameSize, captured_at: Instant) -> Option<Self> {
        if raw.width != size.width || raw.height != size.height || raw.data.len() < size.pixels()
        {
            return None;
        }
        let mut data = raw.data;
        data.truncate(size.pixels());
        let pixels = Array2::from_shape_vec((size.height as usize, size.width as usize), data).ok()?;
        Some(Self {
            pixels,
            captured_at: Some(captured_at),
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.captured_at.is_none()
    }

    pub fn width(&self) -> u32 {
        self.pixels.ncols() as u32
    }

    pub fn height(&self) -> u32 {
        self.pixels.nrows() as u32
    }

    /// Row-major pixel bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.pixels.iter().copied().collect()
    }
}
