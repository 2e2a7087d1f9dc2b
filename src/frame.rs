//! Frame containers.
//!
//! - `Frame`: owned RGB8 pixel grid tagged with the zone it was captured from.
//! - `GrayPlane`: single-channel intensity plane used by comparison and face encoding.
//!
//! Frames are ephemeral. They live for one door cycle and are only persisted as
//! JPEG snapshots by the camera layer.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};
use std::path::Path;

use crate::now_ms;

/// Bytes per pixel in `Frame` storage.
pub const CHANNELS: usize = 3;

/// JPEG quality used for snapshots.
pub const SNAPSHOT_JPEG_QUALITY: u8 = 85;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Owned RGB frame. Pixel data is row-major, 3 bytes per pixel.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Zone the frame was captured from.
    pub zone: String,
    /// Capture time in milliseconds since the Unix epoch.
    pub captured_at_ms: u64,
}

impl Frame {
    /// Wrap raw RGB bytes. The length must be `width * height * 3`.
    pub fn from_rgb(zone: impl Into<String>, width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            zone: zone.into(),
            captured_at_ms: now_ms(),
        })
    }

    /// Frame filled with a single colour.
    pub fn filled(zone: impl Into<String>, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
            zone: zone.into(),
            captured_at_ms: now_ms(),
        }
    }

    pub fn from_image(zone: impl Into<String>, image: DynamicImage) -> Self {
        let rgb = image.into_rgb8();
        let (width, height) = rgb.dimensions();
        Self {
            data: rgb.into_raw(),
            width,
            height,
            zone: zone.into(),
            captured_at_ms: now_ms(),
        }
    }

    /// Decode an image file from disk.
    pub fn load(zone: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image =
            image::open(path).with_context(|| format!("failed to decode image {}", path.display()))?;
        Ok(Self::from_image(zone, image))
    }

    pub fn with_captured_at(mut self, captured_at_ms: u64) -> Self {
        self.captured_at_ms = captured_at_ms;
        self
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = self.index(x, y);
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = self.index(x, y);
        self.data[idx..idx + CHANNELS].copy_from_slice(&rgb);
    }

    /// Fill a rectangle, clipped to the frame.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgb: [u8; 3]) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for py in y..y_end {
            for px in x..x_end {
                self.put_pixel(px, py, rgb);
            }
        }
    }

    /// Draw a rectangle outline, clipped to the frame.
    pub fn draw_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgb: [u8; 3], thickness: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let t = thickness.max(1);
        self.fill_rect(x, y, width, t.min(height), rgb);
        self.fill_rect(x, (y + height).saturating_sub(t), width, t.min(height), rgb);
        self.fill_rect(x, y, t.min(width), height, rgb);
        self.fill_rect((x + width).saturating_sub(t), y, t.min(width), height, rgb);
    }

    /// ITU-R 601 luma.
    pub fn to_gray(&self) -> GrayPlane {
        let data = self
            .data
            .chunks_exact(CHANNELS)
            .map(|rgb| {
                ((rgb[0] as u32 * 299 + rgb[1] as u32 * 587 + rgb[2] as u32 * 114 + 500) / 1000)
                    as u8
            })
            .collect();
        GrayPlane {
            width: self.width,
            height: self.height,
            data,
        }
    }

    pub fn resize_to(&self, target_width: u32, target_height: u32) -> Result<Frame> {
        if target_width == 0 || target_height == 0 {
            return Err(anyhow!("cannot resize frame to {}x{}", target_width, target_height));
        }
        let resized = image::imageops::resize(
            &self.to_rgb_image()?,
            target_width,
            target_height,
            FilterType::Triangle,
        );
        Ok(Frame {
            data: resized.into_raw(),
            width: target_width,
            height: target_height,
            zone: self.zone.clone(),
            captured_at_ms: self.captured_at_ms,
        })
    }

    /// Copy out a sub-rectangle, clipped to the frame.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Frame> {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        if x >= x_end || y >= y_end {
            return Err(anyhow!(
                "crop {}x{}+{}+{} lies outside {}x{} frame",
                width,
                height,
                x,
                y,
                self.width,
                self.height
            ));
        }
        let mut data = Vec::with_capacity(((x_end - x) * (y_end - y)) as usize * CHANNELS);
        for py in y..y_end {
            let start = self.index(x, py);
            let end = self.index(x_end - 1, py) + CHANNELS;
            data.extend_from_slice(&self.data[start..end]);
        }
        Ok(Frame {
            data,
            width: x_end - x,
            height: y_end - y,
            zone: self.zone.clone(),
            captured_at_ms: self.captured_at_ms,
        })
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let image = self.to_rgb_image()?;
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode_image(&image)
            .context("jpeg encode failed")?;
        Ok(out)
    }

    pub fn save_jpeg(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.encode_jpeg(SNAPSHOT_JPEG_QUALITY)?;
        std::fs::write(path, bytes)
            .with_context(|| format!("failed to write snapshot {}", path.display()))
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }
}

// ----------------------------------------------------------------------------
// GrayPlane
// ----------------------------------------------------------------------------

/// Single-channel 8-bit intensity plane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayPlane {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl GrayPlane {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() != width as usize * height as usize {
            return Err(anyhow!(
                "gray plane length mismatch: expected {}, got {}",
                width as usize * height as usize,
                data.len()
            ));
        }
        Ok(Self { width, height, data })
    }

    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Mean intensity inside a rectangle clipped to the plane. Empty rectangles yield 0.
    pub fn mean_in(&self, x: u32, y: u32, width: u32, height: u32) -> f64 {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        if x >= x_end || y >= y_end {
            return 0.0;
        }
        let w = self.width as usize;
        let mut sum = 0u64;
        for py in y as usize..y_end as usize {
            let row = &self.data[py * w + x as usize..py * w + x_end as usize];
            sum += row.iter().map(|&v| v as u64).sum::<u64>();
        }
        sum as f64 / ((x_end - x) as u64 * (y_end - y) as u64) as f64
    }

    pub fn to_image(&self) -> Result<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("gray plane does not match {}x{}", self.width, self.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::from_rgb("z", 4, 4, vec![0; 10]).is_err());
        assert!(Frame::from_rgb("z", 4, 4, vec![0; 48]).is_ok());
    }

    #[test]
    fn gray_of_white_and_black() {
        let mut frame = Frame::filled("z", 4, 2, [0, 0, 0]);
        frame.put_pixel(1, 1, [255, 255, 255]);
        let gray = frame.to_gray();
        assert_eq!(gray.get(0, 0), 0);
        assert_eq!(gray.get(1, 1), 255);
    }

    #[test]
    fn fill_rect_is_clipped() {
        let mut frame = Frame::filled("z", 10, 10, [0, 0, 0]);
        frame.fill_rect(8, 8, 5, 5, [255, 0, 0]);
        assert_eq!(frame.pixel(9, 9), [255, 0, 0]);
        assert_eq!(frame.pixel(7, 7), [0, 0, 0]);
    }

    #[test]
    fn draw_rect_leaves_interior() {
        let mut frame = Frame::filled("z", 20, 20, [0, 0, 0]);
        frame.draw_rect(2, 2, 10, 10, [0, 255, 0], 2);
        assert_eq!(frame.pixel(2, 2), [0, 255, 0]);
        assert_eq!(frame.pixel(11, 11), [0, 255, 0]);
        assert_eq!(frame.pixel(6, 6), [0, 0, 0]);
    }

    #[test]
    fn resize_and_crop() -> Result<()> {
        let frame = Frame::filled("z", 100, 50, [10, 20, 30]);
        let resized = frame.resize_to(40, 20)?;
        assert_eq!((resized.width, resized.height), (40, 20));
        assert_eq!(resized.pixels().len(), 40 * 20 * 3);
        assert_eq!(resized.zone, "z");

        let cropped = frame.crop(90, 40, 20, 20)?;
        assert_eq!((cropped.width, cropped.height), (10, 10));
        assert!(frame.crop(200, 0, 5, 5).is_err());
        Ok(())
    }

    #[test]
    fn mean_in_rectangle() {
        let mut frame = Frame::filled("z", 10, 10, [0, 0, 0]);
        frame.fill_rect(0, 0, 5, 10, [255, 255, 255]);
        let gray = frame.to_gray();
        assert!((gray.mean_in(0, 0, 10, 10) - 127.5).abs() < 0.01);
        assert_eq!(gray.mean_in(20, 20, 5, 5), 0.0);
    }

    #[test]
    fn jpeg_roundtrip_keeps_dimensions() -> Result<()> {
        let frame = Frame::filled("z", 32, 16, [200, 100, 50]);
        let bytes = frame.encode_jpeg(80)?;
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
        Ok(())
    }
}
