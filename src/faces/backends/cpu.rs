use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};

use crate::faces::recognizer::{FaceRecognizer, LocatedFace, RecognitionCapability};
use crate::faces::result::FaceRegion;
use crate::faces::store::DEFAULT_TOLERANCE;
use crate::frame::DecodedImage;

const DEFAULT_THUMBNAIL_SIDE: u32 = 16;
const DEFAULT_MIN_CONTRAST: f32 = 12.0;

/// CPU appearance matcher.
///
/// Treats the whole frame as a single face region when it has enough
/// contrast to hold one, and embeds it as a normalized grayscale thumbnail.
/// This is a coarse placeholder for a real face model: it suits a fixed
/// camera aimed at a doorway, not crowds.
pub struct CpuRecognizer {
    thumbnail_side: u32,
    min_contrast: f32,
    tolerance: f32,
}

impl CpuRecognizer {
    pub fn new(tolerance: f32) -> Self {
        Self {
            thumbnail_side: DEFAULT_THUMBNAIL_SIDE,
            min_contrast: DEFAULT_MIN_CONTRAST,
            tolerance,
        }
    }

    /// Luma standard deviation below which a frame is considered empty.
    pub fn with_min_contrast(mut self, min_contrast: f32) -> Self {
        self.min_contrast = min_contrast;
        self
    }

    fn grayscale(image: &DecodedImage) -> Result<GrayImage> {
        let rgb = image
            .to_rgb_image()
            .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", image.width, image.height))?;
        Ok(DynamicImage::ImageRgb8(rgb).to_luma8())
    }

    fn embed(&self, gray: &GrayImage) -> Option<Vec<f32>> {
        let thumb = imageops::resize(
            gray,
            self.thumbnail_side,
            self.thumbnail_side,
            FilterType::Triangle,
        );
        let values: Vec<f32> = thumb.pixels().map(|p| p.0[0] as f32).collect();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let centered: Vec<f32> = values.iter().map(|v| v - mean).collect();
        let norm = centered.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return None;
        }
        Some(centered.into_iter().map(|v| v / norm).collect())
    }
}

impl Default for CpuRecognizer {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

fn luma_std_dev(gray: &GrayImage) -> f32 {
    let n = (gray.width() as f32) * (gray.height() as f32);
    if n == 0.0 {
        return 0.0;
    }
    let mean = gray.pixels().map(|p| p.0[0] as f32).sum::<f32>() / n;
    let var = gray
        .pixels()
        .map(|p| {
            let d = p.0[0] as f32 - mean;
            d * d
        })
        .sum::<f32>()
        / n;
    var.sqrt()
}

impl FaceRecognizer for CpuRecognizer {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn supports(&self, capability: RecognitionCapability) -> bool {
        matches!(
            capability,
            RecognitionCapability::Identify | RecognitionCapability::Enroll
        )
    }

    fn detects_faces(&self) -> bool {
        false
    }

    fn tolerance(&self) -> f32 {
        self.tolerance
    }

    fn locate_faces(&mut self, image: &DecodedImage) -> Result<Vec<LocatedFace>> {
        let gray = Self::grayscale(image)?;
        if luma_std_dev(&gray) < self.min_contrast {
            return Ok(Vec::new());
        }
        Ok(self
            .embed(&gray)
            .map(|embedding| LocatedFace {
                region: FaceRegion::full(image.width, image.height),
                embedding,
            })
            .into_iter()
            .collect())
    }
}
