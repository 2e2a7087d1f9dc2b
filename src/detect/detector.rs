use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::backend::DetectorBackend;
use super::result::{non_max_suppression, Detection};
use crate::frame::Frame;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Candidates below this confidence are dropped before NMS.
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    /// ONNX model. When unset, or when it fails to load, detection is disabled.
    pub model_path: Option<PathBuf>,
    /// One class name per line, indexed by class id.
    pub labels_path: Option<PathBuf>,
    /// Square model input edge in pixels.
    pub input_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_iou_threshold: 0.4,
            model_path: None,
            labels_path: None,
            input_size: 640,
        }
    }
}

/// Confidence filter and NMS around an optional backend.
///
/// Without a backend every frame yields no detections. Backend failures are
/// logged and also yield no detections.
pub struct ObjectDetector {
    backend: Option<Box<dyn DetectorBackend>>,
    config: DetectorConfig,
}

impl ObjectDetector {
    pub fn new(backend: Box<dyn DetectorBackend>, config: DetectorConfig) -> Self {
        Self {
            backend: Some(backend),
            config,
        }
    }

    pub fn unloaded(config: DetectorConfig) -> Self {
        Self {
            backend: None,
            config,
        }
    }

    /// Load the configured model. A missing or broken model leaves the detector
    /// unloaded rather than failing startup.
    pub fn from_config(config: DetectorConfig) -> Self {
        let Some(model_path) = config.model_path.clone() else {
            log::info!("no detection model configured; object detection disabled");
            return Self::unloaded(config);
        };

        #[cfg(feature = "backend-tract")]
        {
            match super::backends::TractBackend::load(
                &model_path,
                config.labels_path.as_deref(),
                config.input_size,
            ) {
                Ok(backend) => Self::new(Box::new(backend), config),
                Err(e) => {
                    log::warn!(
                        "detection model {} not loaded: {:#}; object detection disabled",
                        model_path.display(),
                        e
                    );
                    Self::unloaded(config)
                }
            }
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            log::warn!(
                "detection model {} configured but built without backend-tract; object detection disabled",
                model_path.display()
            );
            Self::unloaded(config)
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn warm_up(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            if let Err(e) = backend.warm_up() {
                log::warn!("detector {} warm-up failed: {:#}", backend.name(), e);
            }
        }
    }

    /// Detections above the confidence threshold, after NMS.
    pub fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        let Some(backend) = self.backend.as_mut() else {
            return Vec::new();
        };
        let candidates = match backend.detect(frame) {
            Ok(candidates) => candidates,
            Err(e) => {
                log::warn!(
                    "detector {} failed on zone {}: {:#}",
                    backend.name(),
                    frame.zone,
                    e
                );
                return Vec::new();
            }
        };
        let total = candidates.len();
        let confident: Vec<Detection> = candidates
            .into_iter()
            .filter(|d| d.confidence > self.config.confidence_threshold)
            .collect();
        let kept = non_max_suppression(confident, self.config.nms_iou_threshold);
        log::debug!(
            "zone {}: {} candidate(s), {} detection(s)",
            frame.zone,
            total,
            kept.len()
        );
        kept
    }

    /// Run `detect` on several zones.
    pub fn detect_zones<'a>(
        &mut self,
        frames: impl IntoIterator<Item = &'a Frame>,
    ) -> BTreeMap<String, Vec<Detection>> {
        frames
            .into_iter()
            .map(|frame| (frame.zone.clone(), self.detect(frame)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedBackend;
    use crate::detect::result::BoundingBox;

    fn frame() -> Frame {
        Frame::filled("shelf_1", 64, 64, [0, 0, 0])
    }

    #[test]
    fn unloaded_detector_returns_nothing() {
        let mut detector = ObjectDetector::unloaded(DetectorConfig::default());
        assert!(!detector.is_loaded());
        assert!(detector.detect(&frame()).is_empty());
    }

    #[test]
    fn missing_model_does_not_abort() {
        let detector = ObjectDetector::from_config(DetectorConfig {
            model_path: Some(PathBuf::from("/nonexistent/yolo.onnx")),
            ..DetectorConfig::default()
        });
        assert!(!detector.is_loaded());
    }

    #[test]
    fn filters_low_confidence_then_suppresses() {
        let backend = ScriptedBackend::constant(vec![
            Detection::new("apple", 0.3, BoundingBox::new(40, 40, 10, 10)),
            Detection::new("apple", 0.9, BoundingBox::new(0, 0, 20, 20)),
            Detection::new("apple", 0.7, BoundingBox::new(1, 1, 20, 20)),
            Detection::new("milk", 0.55, BoundingBox::new(30, 0, 10, 30)),
            // exactly at the threshold is dropped
            Detection::new("egg", 0.5, BoundingBox::new(60, 0, 10, 10)),
        ]);
        let mut detector = ObjectDetector::new(Box::new(backend), DetectorConfig::default());
        let mut labels: Vec<(String, f32)> = detector
            .detect(&frame())
            .into_iter()
            .map(|d| (d.class_label, d.confidence))
            .collect();
        labels.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            labels,
            vec![("apple".to_string(), 0.9), ("milk".to_string(), 0.55)]
        );
    }

    #[test]
    fn backend_errors_yield_empty() {
        let mut detector = ObjectDetector::new(
            Box::new(ScriptedBackend::failing("inference exploded")),
            DetectorConfig::default(),
        );
        assert!(detector.detect(&frame()).is_empty());
    }

    #[test]
    fn detect_zones_keys_by_zone() {
        let backend = ScriptedBackend::constant(vec![Detection::new(
            "cheese",
            0.8,
            BoundingBox::new(0, 0, 5, 5),
        )]);
        let mut detector = ObjectDetector::new(Box::new(backend), DetectorConfig::default());
        let a = Frame::filled("a", 8, 8, [0, 0, 0]);
        let b = Frame::filled("b", 8, 8, [0, 0, 0]);
        let results = detector.detect_zones([&a, &b]);
        assert_eq!(results.len(), 2);
        assert_eq!(results["b"][0].class_label, "cheese");
    }
}
