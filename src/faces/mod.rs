//! Face recognition boundary.
//!
//! - `store`: enrolled identities (`KnownFaceSet`)
//! - `recognizer`: the backend trait the control loop calls once per frame
//! - `registry`: backend selection by name
//! - `backends`: `stub`, `cpu`, and `tract` (feature `backend-tract`)

pub mod backends;
mod recognizer;
mod registry;
mod result;
pub mod store;

pub use backends::{CpuRecognizer, StubRecognizer};
pub use recognizer::{FaceRecognizer, LocatedFace, RecognitionCapability};
pub use registry::RecognizerRegistry;
pub use result::{DetectedFace, FaceRegion, Verdict};
pub use store::{KnownFace, KnownFaceSet};

use anyhow::Result;

use crate::config::RecognitionSettings;

/// Registry of the built-in backends, with the configured one as default.
pub fn builtin_registry(settings: &RecognitionSettings) -> Result<RecognizerRegistry> {
    let mut registry = RecognizerRegistry::new();
    registry.register(CpuRecognizer::new(settings.tolerance));
    registry.register(StubRecognizer::new());

    #[cfg(feature = "backend-tract")]
    if let Some(model_path) = &settings.model_path {
        let backend = backends::TractRecognizer::new(
            model_path,
            settings.model_width,
            settings.model_height,
        )?
        .with_tolerance(settings.tolerance);
        registry.register(backend);
    }

    registry.set_default(&settings.backend)?;
    Ok(registry)
}
