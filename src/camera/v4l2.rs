//! V4L2 camera.
//!
//! Opens a local device node (e.g. /dev/video0) with memory-mapped buffers and
//! requests packed RGB24. Cameras that refuse the format keep their own and the
//! capture fails with a read error rather than returning garbage pixels.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::source::FrameSource;
use crate::frame::{Frame, CHANNELS};

/// Buffers kept in flight. Still captures discard the first, possibly stale, one.
const STREAM_BUFFERS: u32 = 4;

#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g. "/dev/video0")
    pub device: String,
    pub width: u32,
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
        }
    }
}

pub struct V4l2Source {
    config: V4l2Config,
    state: Option<V4l2State>,
    active_width: u32,
    active_height: u32,
    rgb: bool,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            rgb: false,
        }
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        self.config.device.clone()
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.active_width = format.width;
        self.active_height = format.height;
        self.rgb = format.fourcc == v4l::FourCC::new(b"RGB3");

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{})",
            self.config.device,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }

    fn capture(&mut self, zone: &str) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        if !self.rgb {
            return Err(anyhow!(
                "{} does not deliver RGB24 frames",
                self.config.device
            ));
        }
        let expected = self.active_width as usize * self.active_height as usize * CHANNELS;
        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let pixels = state.with_mut(|fields| -> Result<Vec<u8>> {
            // the first dequeued buffer may predate the request
            fields.stream.next().context("capture v4l2 frame")?;
            let (buf, _meta) = fields.stream.next().context("capture v4l2 frame")?;
            Ok(buf.get(..expected).map(<[u8]>::to_vec).unwrap_or_default())
        })?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "short v4l2 buffer from {}: expected {} bytes",
                self.config.device,
                expected
            ));
        }
        Frame::from_rgb(zone, self.active_width, self.active_height, pixels)
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.config.device);
        }
    }
}
