//! Overlay rendering.
//!
//! Rendering is a pure sink: it receives each decoded frame with its faces
//! and never feeds back into the control loop. Failures are logged by the
//! loop and otherwise ignored.

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::faces::{DetectedFace, FaceRegion};
use crate::frame::DecodedImage;

const MATCHED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNMATCHED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;

pub trait RenderSink: Send {
    fn render(&mut self, image: &DecodedImage, faces: &[DetectedFace]) -> Result<()>;

    /// Release the rendering surface. Called once at shutdown.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Logs face labels at debug level.
#[derive(Debug, Default)]
pub struct LogRenderer;

impl RenderSink for LogRenderer {
    fn render(&mut self, image: &DecodedImage, faces: &[DetectedFace]) -> Result<()> {
        for face in faces {
            log::debug!(
                "frame {}: {} at ({}, {})-({}, {})",
                image.sequence,
                face.verdict.label(),
                face.region.left,
                face.region.top,
                face.region.right,
                face.region.bottom
            );
        }
        Ok(())
    }
}

/// Writes the latest annotated frame to a JPEG file, at most once per
/// interval. The file is replaced atomically so viewers never see a torn
/// image.
pub struct SnapshotRenderer {
    path: PathBuf,
    interval: Duration,
    last_written: Option<Instant>,
    released: bool,
}

impl SnapshotRenderer {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            last_written: None,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, canvas: &RgbImage) -> Result<()> {
        let tmp = self.path.with_extension("tmp.jpg");
        canvas
            .save_with_format(&tmp, image::ImageFormat::Jpeg)
            .with_context(|| format!("failed to write snapshot {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace snapshot {}", self.path.display()))?;
        Ok(())
    }
}

impl RenderSink for SnapshotRenderer {
    fn render(&mut self, image: &DecodedImage, faces: &[DetectedFace]) -> Result<()> {
        if self.released {
            return Err(anyhow!("snapshot renderer already released"));
        }
        let now = Instant::now();
        if let Some(last) = self.last_written {
            if now.duration_since(last) < self.interval {
                return Ok(());
            }
        }
        let mut canvas = image
            .to_rgb_image()
            .ok_or_else(|| anyhow!("pixel buffer does not match image size"))?;
        draw_overlay(&mut canvas, faces);
        self.write(&canvas)?;
        self.last_written = Some(now);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.released = true;
        Ok(())
    }
}

/// Draw a box per face: green when matched, red otherwise.
pub fn draw_overlay(canvas: &mut RgbImage, faces: &[DetectedFace]) {
    for face in faces {
        let color = if face.verdict.is_match() {
            MATCHED_COLOR
        } else {
            UNMATCHED_COLOR
        };
        draw_box(canvas, &face.region, color);
    }
}

fn draw_box(canvas: &mut RgbImage, region: &FaceRegion, color: Rgb<u8>) {
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let left = region.left.min(width - 1);
    let right = region.right.min(width - 1);
    let top = region.top.min(height - 1);
    let bottom = region.bottom.min(height - 1);

    for t in 0..BOX_THICKNESS {
        for x in left..=right {
            if top + t <= bottom {
                canvas.put_pixel(x, top + t, color);
            }
            if bottom >= top + t {
                canvas.put_pixel(x, bottom - t, color);
            }
        }
        for y in top..=bottom {
            if left + t <= right {
                canvas.put_pixel(left + t, y, color);
            }
            if right >= left + t {
                canvas.put_pixel(right - t, y, color);
            }
        }
    }
}
