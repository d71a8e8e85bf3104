use anyhow::Result;
use std::collections::VecDeque;

use crate::faces::recognizer::{FaceRecognizer, LocatedFace, RecognitionCapability};
use crate::faces::result::DetectedFace;
use crate::faces::store::KnownFaceSet;
use crate::frame::DecodedImage;

/// Stub backend for testing and dry runs.
///
/// Replays a script of per-frame results in order; once the script is
/// exhausted every frame has no faces.
pub struct StubRecognizer {
    script: VecDeque<Vec<DetectedFace>>,
}

impl StubRecognizer {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
        }
    }

    pub fn with_script(script: Vec<Vec<DetectedFace>>) -> Self {
        Self {
            script: script.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl Default for StubRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceRecognizer for StubRecognizer {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: RecognitionCapability) -> bool {
        matches!(capability, RecognitionCapability::Identify)
    }

    fn locate_faces(&mut self, _image: &DecodedImage) -> Result<Vec<LocatedFace>> {
        Ok(Vec::new())
    }

    fn detect_and_identify(
        &mut self,
        _image: &DecodedImage,
        _known: &KnownFaceSet,
    ) -> Result<Vec<DetectedFace>> {
        Ok(self.script.pop_front().unwrap_or_default())
    }
}
