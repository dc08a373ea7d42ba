use anyhow::Result;

use crate::detect::result::Detection;

/// Local object detector.
///
/// Backends run on the pipeline's detection worker, one call at a time, and may
/// be slow. Boxes are returned in model-input space: pixels of the
/// `input_size x input_size` crop they were given.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Side length of the square crop this backend expects.
    fn input_size(&self) -> u32;

    /// Run detection on a packed RGB24 crop.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook. A failure here keeps the pipeline from starting.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
