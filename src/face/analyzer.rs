//! Face location and encoding.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// Face rectangle in frame pixels, clipped to the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    /// Clip a possibly out-of-frame rectangle. Returns `None` when nothing is left.
    pub fn clipped(x: i32, y: i32, width: u32, height: u32, frame: &Frame) -> Option<Self> {
        let x0 = x.max(0) as i64;
        let y0 = y.max(0) as i64;
        let x1 = (x as i64 + width as i64).min(frame.width as i64);
        let y1 = (y as i64 + height as i64).min(frame.height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

/// Finds faces in a frame, most prominent first.
pub trait FaceLocator {
    fn locate(&mut self, frame: &Frame) -> Result<Vec<FaceBox>>;
}

/// Turns one located face into a fixed-length vector.
pub trait FaceEncoder {
    fn encode(&mut self, frame: &Frame, face: &FaceBox) -> Result<Vec<f32>>;
}

/// Treats the whole frame as one face.
///
/// Suited to a door camera that is already framed on the person standing in
/// front of it. Frames with almost no contrast (lens covered, lights off) hold
/// no face.
#[derive(Clone, Debug)]
pub struct FullFrameLocator {
    min_contrast: f64,
}

impl FullFrameLocator {
    pub const DEFAULT_MIN_CONTRAST: f64 = 8.0;

    pub fn new(min_contrast: f64) -> Self {
        Self { min_contrast }
    }
}

impl Default for FullFrameLocator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_CONTRAST)
    }
}

impl FaceLocator for FullFrameLocator {
    fn locate(&mut self, frame: &Frame) -> Result<Vec<FaceBox>> {
        if frame.width == 0 || frame.height == 0 {
            return Ok(Vec::new());
        }
        let gray = frame.to_gray();
        let n = gray.data.len() as f64;
        let mean = gray.data.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = gray
            .data
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        if variance.sqrt() < self.min_contrast {
            return Ok(Vec::new());
        }
        Ok(vec![FaceBox {
            x: 0,
            y: 0,
            width: frame.width,
            height: frame.height,
        }])
    }
}

/// Appearance descriptor: the face crop as an 8×16 gray thumbnail, zero-mean and
/// unit length, giving 128 values. Distances lie in `[0, 2]`.
#[derive(Clone, Debug, Default)]
pub struct PixelDescriptorEncoder;

impl PixelDescriptorEncoder {
    pub const WIDTH: u32 = 8;
    pub const HEIGHT: u32 = 16;
}

impl FaceEncoder for PixelDescriptorEncoder {
    fn encode(&mut self, frame: &Frame, face: &FaceBox) -> Result<Vec<f32>> {
        let thumb = frame
            .crop(face.x, face.y, face.width, face.height)?
            .resize_to(Self::WIDTH, Self::HEIGHT)?
            .to_gray();
        let mean = thumb.data.iter().map(|&v| v as f32).sum::<f32>() / thumb.data.len() as f32;
        let mut vector: Vec<f32> = thumb.data.iter().map(|&v| v as f32 - mean).collect();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm < f32::EPSILON {
            return Err(anyhow!("face crop is uniform; nothing to encode"));
        }
        for v in &mut vector {
            *v /= norm;
        }
        Ok(vector)
    }
}

/// Frontal face detector backed by the SeetaFace cascade in `rustface`.
#[cfg(feature = "face-rustface")]
pub struct RustfaceLocator {
    detector: Box<dyn rustface::Detector>,
}

#[cfg(feature = "face-rustface")]
impl RustfaceLocator {
    pub fn load(model_path: &std::path::Path) -> Result<Self> {
        let path = model_path
            .to_str()
            .ok_or_else(|| anyhow!("face model path is not UTF-8"))?;
        let mut detector = rustface::create_detector(path)
            .map_err(|e| anyhow!("failed to load face model {}: {}", path, e))?;
        detector.set_min_face_size(40);
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);
        log::info!("RustfaceLocator: loaded {}", path);
        Ok(Self { detector })
    }
}

#[cfg(feature = "face-rustface")]
impl FaceLocator for RustfaceLocator {
    fn locate(&mut self, frame: &Frame) -> Result<Vec<FaceBox>> {
        let gray = frame.to_gray();
        let image = rustface::ImageData::new(&gray.data, gray.width, gray.height);
        let mut faces = self.detector.detect(&image);
        faces.sort_by(|a, b| b.score().total_cmp(&a.score()));
        Ok(faces
            .iter()
            .filter_map(|f| {
                let b = f.bbox();
                FaceBox::clipped(b.x(), b.y(), b.width(), b.height(), frame)
            })
            .collect())
    }
}
