use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Stub backend for testing and demo runs.
///
/// Returns the same scripted detections for every crop.
pub struct StubBackend {
    input_size: u32,
    script: Vec<Detection>,
    calls: u64,
}

impl StubBackend {
    pub fn new(input_size: u32) -> Self {
        Self {
            input_size,
            script: Vec::new(),
            calls: 0,
        }
    }

    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.script = detections;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        if width != self.input_size || height != self.input_size {
            return Err(anyhow!(
                "crop size {}x{} does not match model input {}x{}",
                width,
                height,
                self.input_size,
                self.input_size
            ));
        }
        if pixels.len() != (width as usize) * (height as usize) * 3 {
            return Err(anyhow!("expected packed RGB24 crop"));
        }
        self.calls += 1;
        Ok(self.script.clone())
    }
}
