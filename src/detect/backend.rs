use anyhow::Result;

use super::result::Detection;
use crate::frame::Frame;

/// Object detector backend.
///
/// Backends return raw candidates. Confidence filtering and NMS are applied by
/// `ObjectDetector`, so a backend only decodes its model's output into boxes in
/// the frame's own pixel coordinates.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
