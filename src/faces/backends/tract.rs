#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::faces::recognizer::{FaceRecognizer, LocatedFace, RecognitionCapability};
use crate::faces::result::FaceRegion;
use crate::faces::store::DEFAULT_TOLERANCE;
use crate::frame::DecodedImage;

/// ONNX face embedding backend.
///
/// Runs a local embedding model (NCHW float input, one embedding vector out)
/// on the frame resized to the model's input size. The frame is expected to
/// be framed on a single face, as with a door camera; there is no separate
/// detector stage.
pub struct TractRecognizer {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    tolerance: f32,
}

impl TractRecognizer {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            tolerance: DEFAULT_TOLERANCE,
        })
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    fn build_input(&self, image: &DecodedImage) -> Result<Tensor> {
        let rgb = image
            .to_rgb_image()
            .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", image.width, image.height))?;
        let resized = imageops::resize(&rgb, self.width, self.height, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| {
                let pixel = resized.get_pixel(x as u32, y as u32);
                (pixel.0[channel] as f32 - 127.5) / 128.0
            },
        );
        Ok(input.into_tensor())
    }

    fn extract_embedding(&self, outputs: TVec<TValue>) -> Result<Vec<f32>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values: Vec<f32> = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .iter()
            .copied()
            .collect();
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if !norm.is_finite() || norm <= f32::EPSILON {
            return Err(anyhow!("model produced a degenerate embedding"));
        }
        Ok(values.into_iter().map(|v| v / norm).collect())
    }
}

impl FaceRecognizer for TractRecognizer {
    fn name(&self) -> &'static str {
        "tract"
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
        let input = self.build_input(image)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let embedding = self.extract_embedding(outputs)?;
        Ok(vec![LocatedFace {
            region: FaceRegion::full(image.width, image.height),
            embedding,
        }])
    }
}
