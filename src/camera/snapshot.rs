//! JPEG snapshot persistence.
//!
//! Layout: `<root>/<stage>/<stage>_<zone>_<ms>.jpg`. Writes are best-effort: a
//! failed snapshot is logged and never fails the capture that produced it.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotStage {
    Before,
    After,
    Faces,
    Annotated,
}

impl SnapshotStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStage::Before => "before",
            SnapshotStage::After => "after",
            SnapshotStage::Faces => "faces",
            SnapshotStage::Annotated => "annotated",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SnapshotWriter {
    root: PathBuf,
}

impl SnapshotWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, stage: SnapshotStage, zone: &str, timestamp_ms: u64) -> PathBuf {
        self.root.join(stage.as_str()).join(format!(
            "{}_{}_{}.jpg",
            stage.as_str(),
            zone,
            timestamp_ms
        ))
    }

    /// Write one frame. Returns the path written.
    pub fn write(&self, stage: SnapshotStage, frame: &Frame) -> Result<PathBuf> {
        let dir = self.root.join(stage.as_str());
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create snapshot dir {}", dir.display()))?;
        let path = self.path_for(stage, &frame.zone, frame.captured_at_ms);
        frame.save_jpeg(&path)?;
        Ok(path)
    }

    /// Write every frame, logging failures.
    pub fn write_all<'a>(&self, stage: SnapshotStage, frames: impl IntoIterator<Item = &'a Frame>) {
        for frame in frames {
            if let Err(e) = self.write(stage, frame) {
                log::warn!(
                    "snapshot {} for zone {} not written: {:#}",
                    stage.as_str(),
                    frame.zone,
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_into_stage_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = SnapshotWriter::new(dir.path());
        let frame = Frame::filled("shelf_1", 8, 8, [10, 10, 10]).with_captured_at(1234);

        let path = writer.write(SnapshotStage::Before, &frame)?;
        assert_eq!(path, dir.path().join("before").join("before_shelf_1_1234.jpg"));
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn unwritable_root_is_logged_not_fatal() {
        let writer = SnapshotWriter::new("/proc/definitely/not/writable");
        let frame = Frame::filled("shelf_1", 4, 4, [0, 0, 0]);
        assert!(writer.write(SnapshotStage::After, &frame).is_err());
        writer.write_all(SnapshotStage::After, [&frame]);
    }
}
