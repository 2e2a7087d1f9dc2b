//! HTTP snapshot camera.
//!
//! Fetches one JPEG per capture from a snapshot endpoint, as served by most
//! network cameras and ESP32 camera boards (`/capture`, `/snapshot.jpg`, ...).

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use url::Url;

use super::source::FrameSource;
use crate::frame::Frame;

const MAX_JPEG_BYTES: u64 = 5 * 1024 * 1024;
const HTTP_TIMEOUT: Duration = Duration::from_secs(4);

pub struct HttpSnapshotSource {
    url: Url,
    agent: Option<ureq::Agent>,
    frames_captured: u64,
}

impl HttpSnapshotSource {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).context("parse camera url")?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported snapshot scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        Ok(Self {
            url,
            agent: None,
            frames_captured: 0,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }
}

impl FrameSource for HttpSnapshotSource {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    fn connect(&mut self) -> Result<()> {
        let agent = ureq::AgentBuilder::new().timeout(HTTP_TIMEOUT).build();
        // Probe once so an unreachable camera fails at open time.
        agent
            .head(self.url.as_str())
            .call()
            .with_context(|| format!("connect to snapshot endpoint {}", self.url))?;
        self.agent = Some(agent);
        log::info!("HttpSnapshotSource: connected to {}", self.url);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.agent.is_some()
    }

    fn capture(&mut self, zone: &str) -> Result<Frame> {
        let agent = self
            .agent
            .as_ref()
            .ok_or_else(|| anyhow!("http source not connected; call connect() first"))?;
        let response = agent
            .get(self.url.as_str())
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot"));
        }
        let image = image::load_from_memory(&bytes).context("decode jpeg")?;
        self.frames_captured += 1;
        Ok(Frame::from_image(zone, image))
    }

    fn release(&mut self) {
        self.agent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_urls() {
        assert!(HttpSnapshotSource::new("udp://10.0.0.2:5000").is_err());
        assert!(HttpSnapshotSource::new("not a url").is_err());
    }

    #[test]
    fn capture_requires_connect() -> Result<()> {
        let mut source = HttpSnapshotSource::new("http://127.0.0.1:9/capture")?;
        assert!(!source.is_open());
        assert!(source.capture("door").is_err());
        Ok(())
    }
}
