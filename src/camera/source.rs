//! Frame sources.
//!
//! A source owns one physical (or simulated) camera. The manager serialises access
//! to each source, so implementations only need to be `Send`.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

use crate::frame::Frame;

/// One camera.
pub trait FrameSource: Send {
    /// Source string the camera was configured with.
    fn describe(&self) -> String;

    /// Open the underlying device. Called lazily before the first capture.
    fn connect(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Capture one still frame tagged with `zone`.
    fn capture(&mut self, zone: &str) -> Result<Frame>;

    /// Release the underlying device. The next capture reconnects.
    fn release(&mut self) {}
}

/// Build a source from its configured string.
///
/// - `stub://blank|gradient|scene` synthetic frames
/// - `http://` / `https://` JPEG snapshot endpoint (feature: ingest-http)
/// - `/dev/video*` V4L2 device (feature: ingest-v4l2)
/// - any other local path is read as a still image on every capture
pub fn open_source(source: &str, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
    let source = source.trim();
    if source.is_empty() {
        return Err(anyhow!("camera source must not be empty"));
    }
    if let Some(pattern) = source.strip_prefix("stub://") {
        let pattern = SyntheticPattern::parse(pattern)?;
        return Ok(Box::new(SyntheticSource::new(pattern, width, height)));
    }
    if source.starts_with("http://") || source.starts_with("https://") {
        #[cfg(feature = "ingest-http")]
        {
            return Ok(Box::new(super::http::HttpSnapshotSource::new(source)?));
        }
        #[cfg(not(feature = "ingest-http"))]
        {
            return Err(anyhow!(
                "http camera sources require the ingest-http feature"
            ));
        }
    }
    if source.starts_with("/dev/video") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(super::v4l2::V4l2Source::new(
                super::v4l2::V4l2Config {
                    device: source.to_string(),
                    width,
                    height,
                },
            )));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(anyhow!(
                "v4l2 camera sources require the ingest-v4l2 feature"
            ));
        }
    }
    if source.contains("://") {
        return Err(anyhow!("unsupported camera source scheme: {}", source));
    }
    Ok(Box::new(ImageFileSource::new(source)))
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntheticPattern {
    /// All black.
    Blank,
    /// Static horizontal gradient.
    Gradient,
    /// Shelf that gains an item, keeps it for one more capture, then loses it:
    /// empty, item, item, empty, empty, item, ...
    /// Consecutive before/after captures therefore alternate addition and removal.
    Scene,
}

impl SyntheticPattern {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "" | "blank" => Ok(Self::Blank),
            "gradient" => Ok(Self::Gradient),
            "scene" | "shelf" => Ok(Self::Scene),
            other => Err(anyhow!("unknown synthetic pattern 'stub://{}'", other)),
        }
    }
}

/// Generates frames in memory. Always healthy.
pub struct SyntheticSource {
    pattern: SyntheticPattern,
    width: u32,
    height: u32,
    open: bool,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(pattern: SyntheticPattern, width: u32, height: u32) -> Self {
        Self {
            pattern,
            width: width.max(1),
            height: height.max(1),
            open: false,
            frame_count: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn item_present(&self) -> bool {
        // frame_count is already incremented for the frame being generated
        let k = self.frame_count.saturating_sub(1);
        ((k + 1) / 2) % 2 == 1
    }

    fn generate(&self, zone: &str) -> Frame {
        match self.pattern {
            SyntheticPattern::Blank => Frame::filled(zone, self.width, self.height, [0, 0, 0]),
            SyntheticPattern::Gradient => {
                let mut frame = Frame::filled(zone, self.width, self.height, [0, 0, 0]);
                for x in 0..self.width {
                    let v = ((x as u64 * 255) / self.width.max(2) as u64) as u8;
                    for y in 0..self.height {
                        frame.put_pixel(x, y, [v, v, v]);
                    }
                }
                frame
            }
            SyntheticPattern::Scene => {
                let mut frame = Frame::filled(zone, self.width, self.height, [40, 40, 40]);
                if self.item_present() {
                    frame.fill_rect(
                        self.width / 3,
                        self.height / 3,
                        (self.width / 4).max(1),
                        (self.height / 4).max(1),
                        [230, 230, 230],
                    );
                }
                frame
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        let name = match self.pattern {
            SyntheticPattern::Blank => "blank",
            SyntheticPattern::Gradient => "gradient",
            SyntheticPattern::Scene => "scene",
        };
        format!("stub://{}", name)
    }

    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.describe(),
            self.width,
            self.height
        );
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn capture(&mut self, zone: &str) -> Result<Frame> {
        if !self.open {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        self.frame_count += 1;
        Ok(self.generate(zone))
    }

    fn release(&mut self) {
        self.open = false;
    }
}

// ----------------------------------------------------------------------------
// Still-image file source
// ----------------------------------------------------------------------------

/// Reads an image file on every capture.
pub struct ImageFileSource {
    path: PathBuf,
    open: bool,
}

impl ImageFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            open: false,
        }
    }
}

impl FrameSource for ImageFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn connect(&mut self) -> Result<()> {
        let meta = std::fs::metadata(&self.path)
            .with_context(|| format!("image source {} is not readable", self.path.display()))?;
        if !meta.is_file() {
            return Err(anyhow!("image source {} is not a file", self.path.display()));
        }
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn capture(&mut self, zone: &str) -> Result<Frame> {
        Frame::load(zone, &self.path)
    }

    fn release(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_scene_alternates_item() -> Result<()> {
        let mut source = SyntheticSource::new(SyntheticPattern::Scene, 40, 40);
        source.connect()?;
        let probe = |f: &Frame| f.pixel(40 / 3 + 1, 40 / 3 + 1)[0] > 200;

        let seq: Vec<bool> = (0..6)
            .map(|_| source.capture("shelf").map(|f| probe(&f)))
            .collect::<Result<_>>()?;
        assert_eq!(seq, vec![false, true, true, false, false, true]);
        assert_eq!(source.frames_captured(), 6);
        Ok(())
    }

    #[test]
    fn stub_requires_connect() {
        let mut source = SyntheticSource::new(SyntheticPattern::Blank, 8, 8);
        assert!(source.capture("z").is_err());
    }

    #[test]
    fn open_source_dispatches_on_scheme() {
        assert!(open_source("stub://gradient", 16, 16).is_ok());
        assert!(open_source("stub://nonsense", 16, 16).is_err());
        assert!(open_source("rtsp://camera", 16, 16).is_err());
        assert!(open_source("", 16, 16).is_err());

        let file = open_source("/nonexistent/shelf.jpg", 16, 16).expect("file source");
        assert_eq!(file.describe(), "/nonexistent/shelf.jpg");
    }

    #[test]
    fn missing_file_fails_to_connect() {
        let mut source = ImageFileSource::new("/nonexistent/shelf.jpg");
        assert!(source.connect().is_err());
        assert!(!source.is_open());
    }
}
