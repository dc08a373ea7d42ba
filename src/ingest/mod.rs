//! Frame sources.
//!
//! A source hands out one frame at a time and must be told, through
//! `ImageRelease`, when the pipeline is done with the buffer before it will
//! produce the next one.
//!
//! Only the synthetic `stub://` source is built in. It renders a moving block
//! over a gradient so the pipeline, tracker and daemon can run without a camera.

pub mod normalize;

use anyhow::{anyhow, bail, Result};
use std::time::Instant;

use crate::frame::FrameCapture;
use crate::pipeline::ImageRelease;

pub use normalize::{luminance_from_rgb, nv12_len, nv12_to_rgb, PixelFormat};

#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Source URL (e.g. "stub://front_camera").
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Clockwise degrees from sensor to display orientation.
    pub rotation: i32,
    /// Layout the source produces before normalization.
    pub pixel_format: PixelFormat,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://front_camera".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
            rotation: 0,
            pixel_format: PixelFormat::Rgb24,
        }
    }
}

/// A frame owned by the caller until it is released back to its source.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    pub seq: u64,
    pub timestamp: Instant,
    pub width: u32,
    pub height: u32,
    pub rotation: i32,
    pub rgb: Vec<u8>,
    pub luminance: Vec<u8>,
}

impl CapturedFrame {
    pub fn capture(&self) -> FrameCapture<'_> {
        FrameCapture {
            seq: self.seq,
            timestamp: self.timestamp,
            width: self.width,
            height: self.height,
            stride: self.width,
            rotation: self.rotation,
            luminance: &self.luminance,
            rgb: &self.rgb,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub frames_released: u64,
    pub url: String,
}

pub struct FrameSource {
    backend: SourceBackend,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
}

impl FrameSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if config.url.starts_with("stub://") {
            Ok(Self {
                backend: SourceBackend::Synthetic(SyntheticSource::new(config)?),
            })
        } else {
            bail!(
                "unsupported frame source '{}'; only stub:// sources are built in",
                config.url
            )
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.connect(),
        }
    }

    /// Capture the next frame. Fails if the previous one was not released.
    pub fn next_frame(&mut self) -> Result<CapturedFrame> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.stats(),
        }
    }
}

impl ImageRelease for FrameSource {
    fn ready_for_next_image(&mut self) {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.ready_for_next_image(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

pub struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    released: u64,
    awaiting_release: bool,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            bail!("synthetic source needs non-zero dimensions");
        }
        Ok(Self {
            config,
            frame_count: 0,
            released: 0,
            awaiting_release: false,
        })
    }

    /// Synthetic sources are always connected.
    pub fn connect(&mut self) -> Result<()> {
        log::info!("FrameSource: connected to {} (synthetic)", self.config.url);
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<CapturedFrame> {
        if self.awaiting_release {
            return Err(anyhow!(
                "frame {} has not been released yet",
                self.frame_count
            ));
        }
        self.frame_count += 1;
        let (width, height) = (self.config.width, self.config.height);
        let raw = match self.config.pixel_format {
            PixelFormat::Rgb24 => self.render_rgb(),
            PixelFormat::Nv12 => self.render_nv12()?,
        };
        let rgb = normalize::normalize_to_rgb(&raw, width, height, self.config.pixel_format)?;
        let luminance = normalize::luminance(&raw, width, height, self.config.pixel_format)?;
        self.awaiting_release = true;

        Ok(CapturedFrame {
            seq: self.frame_count,
            timestamp: Instant::now(),
            width,
            height,
            rotation: self.config.rotation,
            rgb,
            luminance,
        })
    }

    pub fn is_healthy(&self) -> bool {
        true
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_released: self.released,
            url: self.config.url.clone(),
        }
    }

    /// Horizontal position of the moving block for the current frame.
    fn block_origin(&self) -> (u32, u32, u32) {
        let (w, h) = (self.config.width, self.config.height);
        let side = (w.min(h) / 4).max(1);
        let travel = w.saturating_sub(side).max(1) as u64;
        let x = ((self.frame_count * 8) % travel) as u32;
        (x, (h - side) / 2, side)
    }

    fn render_rgb(&self) -> Vec<u8> {
        let (w, h) = (self.config.width, self.config.height);
        let (bx, by, side) = self.block_origin();
        let mut pixels = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let inside = x >= bx && x < bx + side && y >= by && y < by + side;
                if inside {
                    pixels.extend_from_slice(&[240, 240, 240]);
                } else {
                    let shade = ((x * 255) / w.max(1)) as u8;
                    pixels.extend_from_slice(&[shade / 2, shade / 3, 64]);
                }
            }
        }
        pixels
    }

    fn render_nv12(&self) -> Result<Vec<u8>> {
        let (w, h) = (self.config.width, self.config.height);
        let (bx, by, side) = self.block_origin();
        let mut pixels = vec![128u8; normalize::nv12_len(w, h)?];
        for y in 0..h {
            for x in 0..w {
                let inside = x >= bx && x < bx + side && y >= by && y < by + side;
                pixels[(y * w + x) as usize] = if inside {
                    235
                } else {
                    16 + ((x * 200) / w.max(1)) as u8
                };
            }
        }
        Ok(pixels)
    }
}

impl ImageRelease for SyntheticSource {
    fn ready_for_next_image(&mut self) {
        if self.awaiting_release {
            self.awaiting_release = false;
            self.released += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(format: PixelFormat) -> SourceConfig {
        SourceConfig {
            width: 32,
            height: 24,
            pixel_format: format,
            ..SourceConfig::default()
        }
    }

    #[test]
    fn frames_must_be_released_before_the_next() -> Result<()> {
        let mut source = FrameSource::new(config(PixelFormat::Rgb24))?;
        source.connect()?;
        let first = source.next_frame()?;
        assert_eq!(first.seq, 1);
        assert_eq!(first.rgb.len(), 32 * 24 * 3);
        assert_eq!(first.luminance.len(), 32 * 24);
        assert!(source.next_frame().is_err());

        source.ready_for_next_image();
        source.ready_for_next_image();
        assert_eq!(source.next_frame()?.seq, 2);
        assert_eq!(source.stats().frames_released, 1);
        Ok(())
    }

    #[test]
    fn nv12_source_produces_valid_snapshots() -> Result<()> {
        let mut source = SyntheticSource::new(config(PixelFormat::Nv12))?;
        let frame = source.next_frame()?;
        let snapshot = frame.capture().snapshot()?;
        assert_eq!(snapshot.width(), 32);
        assert_eq!(snapshot.luminance().len(), 32 * 24);
        Ok(())
    }

    #[test]
    fn odd_sized_nv12_source_converts_without_overrun() -> Result<()> {
        let mut source = SyntheticSource::new(SourceConfig {
            width: 33,
            height: 25,
            pixel_format: PixelFormat::Nv12,
            ..SourceConfig::default()
        })?;
        let frame = source.next_frame()?;
        assert_eq!(frame.rgb.len(), 33 * 25 * 3);
        assert_eq!(frame.luminance.len(), 33 * 25);
        Ok(())
    }

    #[test]
    fn only_stub_urls_are_supported() {
        let cfg = SourceConfig {
            url: "rtsp://camera-1/stream".to_string(),
            ..SourceConfig::default()
        };
        assert!(FrameSource::new(cfg).is_err());
    }
}
