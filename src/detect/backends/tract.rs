#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::LabelMap;
use crate::detect::result::Detection;
use crate::geometry::BoundingBox;

/// TF object-detection-API class ids are offset by the `???` background row.
const LABEL_OFFSET: usize = 1;
const MAX_RESULTS: usize = 10;

/// Tract-based backend for SSD-style ONNX detectors.
///
/// Expects four outputs: boxes `[1, N, 4]` as normalized
/// `(ymin, xmin, ymax, xmax)`, classes `[1, N]`, scores `[1, N]` and a
/// detection count `[1]`. Missing model or label files fail construction.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: LabelMap,
    input_size: u32,
    quantized: bool,
}

impl TractBackend {
    /// Load an ONNX model and its label map from disk.
    pub fn new<P: AsRef<Path>, L: AsRef<Path>>(
        model_path: P,
        labels_path: L,
        input_size: u32,
        quantized: bool,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let labels = LabelMap::load(labels_path.as_ref())?;
        let datum = if quantized {
            u8::datum_type()
        } else {
            f32::datum_type()
        };
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(datum, tvec!(1, side, side, 3)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            labels,
            input_size,
            quantized,
        })
    }

    fn build_input(&self, pixels: &[u8]) -> Result<Tensor> {
        let side = self.input_size as usize;
        let expected_len = side
            .checked_mul(side)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("input dimensions overflow"))?;
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let tensor = if self.quantized {
            tract_ndarray::Array4::from_shape_fn((1, side, side, 3), |(_, y, x, channel)| {
                pixels[(y * side + x) * 3 + channel]
            })
            .into_tensor()
        } else {
            tract_ndarray::Array4::from_shape_fn((1, side, side, 3), |(_, y, x, channel)| {
                (pixels[(y * side + x) * 3 + channel] as f32 - 128.0) / 128.0
            })
            .into_tensor()
        };
        Ok(tensor)
    }

    fn decode_outputs(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        if outputs.len() < 4 {
            return Err(anyhow!("expected 4 model outputs, got {}", outputs.len()));
        }
        let boxes = outputs[0]
            .to_array_view::<f32>()
            .context("box output tensor was not f32")?;
        let classes = outputs[1]
            .to_array_view::<f32>()
            .context("class output tensor was not f32")?;
        let scores = outputs[2]
            .to_array_view::<f32>()
            .context("score output tensor was not f32")?;
        let count = outputs[3]
            .to_array_view::<f32>()
            .context("count output tensor was not f32")?
            .iter()
            .next()
            .copied()
            .unwrap_or(0.0) as usize;

        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let classes: Vec<f32> = classes.iter().copied().collect();
        let scores: Vec<f32> = scores.iter().copied().collect();
        let n = count
            .min(MAX_RESULTS)
            .min(scores.len())
            .min(classes.len())
            .min(boxes.len() / 4);

        let side = self.input_size as f32;
        let mut detections = Vec::with_capacity(n);
        for i in 0..n {
            let class_index = classes[i].max(0.0) as usize + LABEL_OFFSET;
            let Some(label) = self.labels.get(class_index) else {
                continue;
            };
            let b = &boxes[i * 4..i * 4 + 4];
            let location = BoundingBox::new(b[1] * side, b[0] * side, b[3] * side, b[2] * side);
            detections.push(Detection::in_model_input(
                i.to_string(),
                label,
                scores[i],
                location,
            ));
        }
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
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
        let input = self.build_input(pixels)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode_outputs(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size as usize;
        let blank = vec![0u8; side * side * 3];
        self.detect(&blank, self.input_size, self.input_size)
            .map(|_| ())
            .context("detector warm-up failed")
    }
}
