use anyhow::Result;

use super::result::{DetectedFace, FaceRegion};
use super::store::{KnownFaceSet, DEFAULT_TOLERANCE};
use crate::frame::DecodedImage;

/// What a recognizer backend can be used for.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecognitionCapability {
    /// Locate faces in a live frame and identify them.
    Identify,
    /// Produce reference embeddings from enrollment photos.
    Enroll,
}

/// A face located in an image, before identification.
#[derive(Clone, Debug, PartialEq)]
pub struct LocatedFace {
    pub region: FaceRegion,
    pub embedding: Vec<f32>,
}

/// Face recognition backend.
///
/// Backends locate faces and compute embeddings; identification against the
/// enrolled set is shared. Errors are returned, never panicked, and the
/// control loop treats them as a skipped frame.
pub trait FaceRecognizer: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn supports(&self, capability: RecognitionCapability) -> bool;

    /// Locate every face in the image with its embedding.
    fn locate_faces(&mut self, image: &DecodedImage) -> Result<Vec<LocatedFace>>;

    /// False when the backend has no face detector and reports any frame
    /// with enough structure as a single full-frame face. Such a backend
    /// will send `failed` for an empty scene.
    fn detects_faces(&self) -> bool {
        true
    }

    /// Maximum embedding distance that still counts as a match.
    fn tolerance(&self) -> f32 {
        DEFAULT_TOLERANCE
    }

    /// Locate faces and identify each against the enrolled set.
    fn detect_and_identify(
        &mut self,
        image: &DecodedImage,
        known: &KnownFaceSet,
    ) -> Result<Vec<DetectedFace>> {
        let tolerance = self.tolerance();
        let faces = self.locate_faces(image)?;
        Ok(faces
            .into_iter()
            .map(|face| {
                let (verdict, distance) = known.identify(&face.embedding, tolerance);
                DetectedFace {
                    region: face.region,
                    verdict,
                    distance,
                }
            })
            .collect())
    }

    /// Embedding of the first face in an enrollment photo, if any.
    fn reference_embedding(&mut self, image: &DecodedImage) -> Result<Option<Vec<f32>>> {
        Ok(self
            .locate_faces(image)?
            .into_iter()
            .next()
            .map(|face| face.embedding))
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
