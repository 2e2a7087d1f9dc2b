//! Object detection.
//!
//! `ObjectDetector` wraps an optional `DetectorBackend`, applies the confidence
//! threshold and class-agnostic NMS. Backends:
//! - `ScriptedBackend` replays configured detections
//! - `TractBackend` runs a YOLO-style ONNX model (feature: backend-tract)

mod backend;
pub mod backends;
mod detector;
mod result;

pub use backend::DetectorBackend;
pub use backends::ScriptedBackend;
pub use detector::{DetectorConfig, ObjectDetector};
pub use result::{iou, non_max_suppression, BoundingBox, Detection, Point};
