//! Camera capture.
//!
//! This module provides the sources frames are captured from and the manager that
//! captures every zone of the fridge at once:
//! - Synthetic sources (`stub://`, testing and demos)
//! - Still-image files (a file-backed camera)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - HTTP JPEG snapshot endpoints (feature: ingest-http)
//!
//! A failing zone never aborts its siblings. `CameraManager::capture_all` returns
//! whatever subset of zones produced a frame within their individual timeout.

#[cfg(feature = "ingest-http")]
pub mod http;
mod manager;
mod snapshot;
mod source;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

#[cfg(feature = "ingest-http")]
pub use http::HttpSnapshotSource;
pub use manager::{CameraInfo, CameraManager, DEFAULT_CAPTURE_TIMEOUT};
pub use snapshot::{SnapshotStage, SnapshotWriter};
pub use source::{open_source, FrameSource, ImageFileSource, SyntheticPattern, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

use thiserror::Error;

/// Why a single zone produced no frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera zone '{0}' is not registered")]
    NotRegistered(String),
    #[error("camera for zone '{0}' could not be opened: {1}")]
    NotOpen(String, String),
    #[error("camera for zone '{0}' failed to read a frame: {1}")]
    ReadError(String, String),
    #[error("camera for zone '{0}' did not answer within its timeout")]
    Timeout(String),
}

impl CaptureError {
    pub fn zone(&self) -> &str {
        match self {
            CaptureError::NotRegistered(zone)
            | CaptureError::NotOpen(zone, _)
            | CaptureError::ReadError(zone, _)
            | CaptureError::Timeout(zone) => zone,
        }
    }
}
