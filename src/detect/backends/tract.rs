#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::{Frame, CHANNELS};

/// Candidates scoring below this are not worth returning at all.
const MIN_CANDIDATE_SCORE: f32 = 0.01;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects a single output of shape `[1, 4 + classes, anchors]` (or its transpose)
/// with boxes as centre x, centre y, width, height in input pixels, followed by
/// one score per class. Frames are stretched to the square input size.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    labels: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model, and optionally a labels file with one class name per line.
    pub fn load(model_path: &Path, labels_path: Option<&Path>, input_size: u32) -> Result<Self> {
        if input_size == 0 {
            return Err(anyhow!("model input size must be > 0"));
        }
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let labels = match labels_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read labels from {}", path.display()))?
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };
        log::info!(
            "TractBackend: loaded {} ({} labels, input {}x{})",
            model_path.display(),
            labels.len(),
            input_size,
            input_size
        );

        Ok(Self {
            model,
            input_size,
            labels,
        })
    }

    fn label(&self, class: usize) -> String {
        self.labels
            .get(class)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class))
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let resized = frame.resize_to(self.input_size, self.input_size)?;
        let pixels = resized.pixels();
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            pixels[(y * size + x) * CHANNELS + channel] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not rank 3")?;

        let (_, d1, d2) = view.dim();
        // features are the short axis
        let channels_first = d1 < d2;
        let (features, anchors) = if channels_first { (d1, d2) } else { (d2, d1) };
        if features <= 4 {
            return Err(anyhow!("model output has no class scores"));
        }
        let at = |f: usize, a: usize| {
            if channels_first {
                view[[0, f, a]]
            } else {
                view[[0, a, f]]
            }
        };

        let scale_x = frame.width as f32 / self.input_size as f32;
        let scale_y = frame.height as f32 / self.input_size as f32;
        let mut detections = Vec::new();
        for a in 0..anchors {
            let (class, score) = (4..features)
                .map(|f| (f - 4, at(f, a)))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < MIN_CANDIDATE_SCORE {
                continue;
            }
            let (cx, cy, w, h) = (at(0, a), at(1, a), at(2, a), at(3, a));
            let bbox = BoundingBox::new(
                ((cx - w / 2.0) * scale_x).round() as i32,
                ((cy - h / 2.0) * scale_y).round() as i32,
                (w * scale_x).max(0.0).round() as u32,
                (h * scale_y).max(0.0).round() as u32,
            );
            detections.push(Detection::new(self.label(class), score, bbox));
        }
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::filled("warm_up", self.input_size, self.input_size, [0, 0, 0]);
        self.detect(&blank).map(|_| ())
    }
}
