//! Frame data handed from a capture source to the pipeline.
//!
//! - `FrameCapture`: borrowed view of the source's live buffers. Valid only until
//!   the source is told it may reuse them.
//! - `FrameSnapshot`: private owned copy taken before any asynchronous work.
//! - `CropImage`: the square RGB raster fed to the local and remote detectors.
//!
//! The pipeline never holds a `FrameCapture` past `on_frame`; everything that
//! outlives the call works from a `FrameSnapshot`.

use anyhow::{anyhow, Result};
use std::time::Instant;

// ----------------------------------------------------------------------------
// FrameCapture: borrowed source buffers
// ----------------------------------------------------------------------------

/// One captured image as the source hands it over.
#[derive(Clone, Copy, Debug)]
pub struct FrameCapture<'a> {
    /// Monotonically increasing sequence id.
    pub seq: u64,
    /// Capture instant. Drives dedup expiry and remote rate limiting.
    pub timestamp: Instant,
    pub width: u32,
    pub height: u32,
    /// Row stride of the luminance plane in bytes.
    pub stride: u32,
    /// Sensor orientation relative to the display, in degrees.
    pub rotation: i32,
    /// Luminance plane (tracking input). May be empty.
    pub luminance: &'a [u8],
    /// Packed RGB24 pixels, `width * height * 3` bytes.
    pub rgb: &'a [u8],
}

impl<'a> FrameCapture<'a> {
    /// Copy the buffers this frame's detection cycle needs.
    ///
    /// After this returns the source may overwrite its own buffers.
    pub fn snapshot(&self) -> Result<FrameSnapshot> {
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if self.rgb.len() != expected {
            return Err(anyhow!(
                "frame {} RGB length mismatch: expected {}, got {}",
                self.seq,
                expected,
                self.rgb.len()
            ));
        }
        if !self.luminance.is_empty() {
            let min_luma = (self.stride as usize)
                .checked_mul(self.height.saturating_sub(1) as usize)
                .and_then(|v| v.checked_add(self.width as usize))
                .ok_or_else(|| anyhow!("luminance dimensions overflow"))?;
            if self.stride < self.width || self.luminance.len() < min_luma {
                return Err(anyhow!(
                    "frame {} luminance plane too small: stride {}, {} bytes",
                    self.seq,
                    self.stride,
                    self.luminance.len()
                ));
            }
        }

        Ok(FrameSnapshot {
            seq: self.seq,
            timestamp: self.timestamp,
            width: self.width,
            height: self.height,
            stride: self.stride,
            rotation: self.rotation,
            luminance: self.luminance.to_vec(),
            rgb: self.rgb.to_vec(),
        })
    }
}

// ----------------------------------------------------------------------------
// FrameSnapshot: owned copy for the detection cycle
// ----------------------------------------------------------------------------

/// Owned copy of a frame. Immutable for the duration of its detection cycle.
#[derive(Clone, Debug)]
pub struct FrameSnapshot {
    seq: u64,
    timestamp: Instant,
    width: u32,
    height: u32,
    stride: u32,
    rotation: i32,
    luminance: Vec<u8>,
    rgb: Vec<u8>,
}

impl FrameSnapshot {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn rotation(&self) -> i32 {
        self.rotation
    }

    pub fn luminance(&self) -> &[u8] {
        &self.luminance
    }

    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }
}

// ----------------------------------------------------------------------------
// CropImage: model input raster
// ----------------------------------------------------------------------------

/// Packed RGB24 raster in model-input space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CropImage {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl CropImage {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn capture<'a>(rgb: &'a [u8], luminance: &'a [u8]) -> FrameCapture<'a> {
        FrameCapture {
            seq: 7,
            timestamp: Instant::now(),
            width: 2,
            height: 2,
            stride: 2,
            rotation: 90,
            luminance,
            rgb,
        }
    }

    #[test]
    fn snapshot_is_independent_of_source_buffer() -> Result<()> {
        let mut rgb = vec![1u8; 12];
        let luminance = vec![9u8; 4];
        let snapshot = capture(&rgb, &luminance).snapshot()?;

        // Source reuses its buffer after release.
        rgb.iter_mut().for_each(|p| *p = 0);

        assert_eq!(snapshot.rgb(), &[1u8; 12]);
        assert_eq!(snapshot.luminance(), &[9u8; 4]);
        assert_eq!(snapshot.seq(), 7);
        assert_eq!(snapshot.rotation(), 90);
        Ok(())
    }

    #[test]
    fn snapshot_rejects_mismatched_buffers() {
        assert!(capture(&[0u8; 11], &[]).snapshot().is_err());
        assert!(capture(&[0u8; 12], &[0u8; 3]).snapshot().is_err());
        assert!(capture(&[0u8; 12], &[]).snapshot().is_ok());
    }
}
