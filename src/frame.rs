//! Frame input layer.
//!
//! - `Frame`: validated single-channel (luma) frame. Construction is the only
//!   place where malformed input is rejected; everything downstream assumes a
//!   non-empty frame.
//! - `Roi`: rectangle of interest in analysis-frame coordinates.
//!
//! Colour input is reduced to luma with ITU-R BT.601 weights so that a uniform
//! grey RGB frame keeps its intensity value.

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

/// Validated grayscale frame.
#[derive(Clone, Debug)]
pub struct Frame {
    gray: GrayImage,
}

impl Frame {
    /// Build from tightly packed 8-bit luma samples.
    pub fn from_gray(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = expected_len(width, height, 1)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "gray frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let gray = GrayImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("gray frame buffer rejected"))?;
        Ok(Self { gray })
    }

    /// Build from tightly packed RGB24 samples.
    pub fn from_rgb(width: u32, height: u32, pixels: &[u8]) -> Result<Self> {
        let expected = expected_len(width, height, 3)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let luma = pixels
            .chunks_exact(3)
            .map(|px| rgb_to_luma(px[0], px[1], px[2]))
            .collect();
        Self::from_gray(width, height, luma)
    }

    /// Build from any decoded image.
    pub fn from_image(image: &DynamicImage) -> Result<Self> {
        match image {
            DynamicImage::ImageLuma8(gray) => {
                Self::from_gray(gray.width(), gray.height(), gray.as_raw().clone())
            }
            other => {
                let rgb = other.to_rgb8();
                Self::from_rgb(rgb.width(), rgb.height(), rgb.as_raw())
            }
        }
    }

    /// Decode an encoded image (JPEG/PNG) held in memory.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(anyhow!("empty image buffer"));
        }
        let image = image::load_from_memory(bytes).context("decode frame")?;
        Self::from_image(&image)
    }

    /// Load and decode an image file.
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .map_err(|e| anyhow!("failed to read frame {}: {}", path.display(), e))?;
        Self::from_image(&image)
    }

    /// Frame filled with a single intensity.
    pub fn uniform(width: u32, height: u32, value: u8) -> Result<Self> {
        let len = expected_len(width, height, 1)?;
        Self::from_gray(width, height, vec![value; len])
    }

    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    pub fn height(&self) -> u32 {
        self.gray.height()
    }

    pub fn pixels(&self) -> &[u8] {
        self.gray.as_raw()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.gray
    }

    /// Copy of this frame no wider than `max_width`, aspect ratio preserved.
    pub fn downscaled_to_width(&self, max_width: u32) -> Frame {
        let (w, h) = (self.width(), self.height());
        if max_width == 0 || w <= max_width {
            return self.clone();
        }
        let new_h = ((h as u64 * max_width as u64) / w as u64).max(1) as u32;
        Frame {
            gray: image::imageops::resize(&self.gray, max_width, new_h, FilterType::Triangle),
        }
    }

    /// Copy scaled by `factor` in both dimensions (at least 1x1).
    pub fn scaled(&self, factor: f32) -> GrayImage {
        let w = ((self.width() as f32 * factor).round() as u32).max(1);
        let h = ((self.height() as f32 * factor).round() as u32).max(1);
        if w == self.width() && h == self.height() {
            return self.gray.clone();
        }
        image::imageops::resize(&self.gray, w, h, FilterType::Triangle)
    }

    /// PNG encoding, used when shipping a frame to a remote collaborator.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        DynamicImage::ImageLuma8(self.gray.clone())
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .context("encode frame as png")?;
        Ok(out)
    }
}

fn expected_len(width: u32, height: u32, channels: u32) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(anyhow!("frame must not be empty ({}x{})", width, height));
    }
    let len = width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(channels))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    Ok(len as usize)
}

fn rgb_to_luma(r: u8, g: u8, b: u8) -> u8 {
    let y = 0.299_f32 * r as f32 + 0.587_f32 * g as f32 + 0.114_f32 * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}

/// Rectangle `[x1, x2) x [y1, y2)` in analysis-frame pixels.
///
/// Coordinates are signed so that configuration may reach past the frame edge;
/// they are clamped at analysis time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl Roi {
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Clamp to a `width x height` frame. `None` when nothing is left.
    pub fn clamp(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x1.max(0);
        let y1 = self.y1.max(0);
        let x2 = self.x2.min(width as i64);
        let y2 = self.y2.min(height as i64);
        if x2 > x1 && y2 > y1 {
            Some((x1 as u32, y1 as u32, x2 as u32, y2 as u32))
        } else {
            None
        }
    }
}

/// Default regions where room lights usually show up: ceiling centre, the two
/// upper corners, then the middle of the scene.
pub fn suggest_rois(width: u32, height: u32, count: usize) -> Vec<Roi> {
    let (w, h) = (width as i64, height as i64);
    let suggestions = [
        Roi::new(w / 4, 0, 3 * w / 4, h / 4),
        Roi::new(0, 0, w / 3, h / 3),
        Roi::new(2 * w / 3, 0, w, h / 3),
        Roi::new(w / 3, h / 3, 2 * w / 3, 2 * h / 3),
    ];
    suggestions.into_iter().take(count).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_short_frames() {
        assert!(Frame::from_gray(0, 10, vec![]).is_err());
        assert!(Frame::from_gray(4, 4, vec![0u8; 15]).is_err());
        assert!(Frame::from_rgb(2, 2, &[0u8; 11]).is_err());
        assert!(Frame::decode(&[]).is_err());
    }

    #[test]
    fn uniform_rgb_keeps_intensity() -> Result<()> {
        let frame = Frame::from_rgb(2, 1, &[200, 200, 200, 40, 40, 40])?;
        assert_eq!(frame.pixels(), &[200, 40]);
        Ok(())
    }

    #[test]
    fn downscale_preserves_aspect_ratio() -> Result<()> {
        let frame = Frame::uniform(640, 480, 90)?;
        let small = frame.downscaled_to_width(320);
        assert_eq!((small.width(), small.height()), (320, 240));
        assert!(small.pixels().iter().all(|&p| (89..=91).contains(&p)));

        let narrow = Frame::uniform(100, 50, 1)?;
        assert_eq!(narrow.downscaled_to_width(320).width(), 100);
        Ok(())
    }

    #[test]
    fn roi_clamps_to_bounds() {
        let roi = Roi::new(-10, -10, 50, 50);
        assert_eq!(roi.clamp(40, 30), Some((0, 0, 40, 30)));
        assert_eq!(Roi::new(100, 100, 200, 200).clamp(40, 30), None);
    }

    #[test]
    fn png_round_trip_decodes() -> Result<()> {
        let frame = Frame::uniform(8, 6, 77)?;
        let decoded = Frame::decode(&frame.to_png()?)?;
        assert_eq!(decoded.pixels(), frame.pixels());
        Ok(())
    }

    #[test]
    fn suggests_ceiling_first() {
        let rois = suggest_rois(320, 240, 2);
        assert_eq!(rois.len(), 2);
        assert_eq!(rois[0], Roi::new(80, 0, 240, 60));
    }
}
