#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use super::analyzer::{FaceBox, FaceEncoder};
use crate::frame::{Frame, CHANNELS};

/// Face embedding network (ArcFace/FaceNet style) run through tract.
///
/// The face crop is stretched to the square input, normalised to roughly
/// `[-1, 1]`, and the output vector is L2-normalised.
pub struct TractFaceEncoder {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
}

impl TractFaceEncoder {
    pub fn load(model_path: &Path, input_size: u32) -> Result<Self> {
        if input_size == 0 {
            return Err(anyhow!("embedding input size must be > 0"));
        }
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| {
                format!("failed to load embedding model from {}", model_path.display())
            })?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize embedding model")?
            .into_runnable()
            .context("failed to build runnable embedding model")?;
        log::info!("TractFaceEncoder: loaded {}", model_path.display());
        Ok(Self { model, input_size })
    }
}

impl FaceEncoder for TractFaceEncoder {
    fn encode(&mut self, frame: &Frame, face: &FaceBox) -> Result<Vec<f32>> {
        let crop = frame
            .crop(face.x, face.y, face.width, face.height)?
            .resize_to(self.input_size, self.input_size)?;
        let pixels = crop.pixels();
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            (pixels[(y * size + x) * CHANNELS + c] as f32 - 127.5) / 128.0
        });
        let outputs = self
            .model
            .run(tvec!(input.into_tensor().into()))
            .context("embedding inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("embedding model produced no outputs"))?;
        let mut vector: Vec<f32> = output
            .to_array_view::<f32>()
            .context("embedding output was not f32")?
            .iter()
            .copied()
            .collect();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if !norm.is_finite() || norm < f32::EPSILON {
            return Err(anyhow!("embedding model returned a zero vector"));
        }
        for v in &mut vector {
            *v /= norm;
        }
        Ok(vector)
    }
}
