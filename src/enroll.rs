//! Enrollment: build a `KnownFaceSet` from a directory of reference photos.
//!
//! Each `.jpg`/`.jpeg`/`.png` file contributes one identity named after the
//! file stem, using the first face the recognizer finds. Photos without a
//! face are skipped and reported.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use crate::faces::{FaceRecognizer, KnownFace, KnownFaceSet};
use crate::frame::DecodedImage;

const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnrollOutcome {
    Encoded(String),
    NoFace(PathBuf),
    Unreadable { path: PathBuf, reason: String },
}

#[derive(Debug)]
pub struct EnrollReport {
    pub faces: KnownFaceSet,
    pub outcomes: Vec<EnrollOutcome>,
}

/// Reference photos in `dir`, sorted by file name so store order is stable.
pub fn list_photos(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read enrollment directory {}", dir.display()))?;
    let mut photos = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_photo = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                PHOTO_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });
        if path.is_file() && is_photo {
            photos.push(path);
        }
    }
    photos.sort();
    Ok(photos)
}

pub fn load_photo(path: &Path) -> Result<DecodedImage> {
    let rgb = image::open(path)
        .with_context(|| format!("failed to decode {}", path.display()))?
        .into_rgb8();
    let (width, height) = rgb.dimensions();
    DecodedImage::from_rgb(rgb.into_raw(), width, height, 0)
        .ok_or_else(|| anyhow!("{} decoded to an invalid buffer", path.display()))
}

/// Encode one photo. The identity name is the file stem.
pub fn enroll_photo(recognizer: &mut dyn FaceRecognizer, path: &Path) -> EnrollOutcome {
    encode_photo(recognizer, path).0
}

fn encode_photo(
    recognizer: &mut dyn FaceRecognizer,
    path: &Path,
) -> (EnrollOutcome, Option<KnownFace>) {
    let unreadable = |reason: String| EnrollOutcome::Unreadable {
        path: path.to_path_buf(),
        reason,
    };
    let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
        return (unreadable("file name is not valid UTF-8".to_string()), None);
    };
    let image = match load_photo(path) {
        Ok(image) => image,
        Err(err) => return (unreadable(format!("{:#}", err)), None),
    };
    match recognizer.reference_embedding(&image) {
        Ok(Some(embedding)) => (
            EnrollOutcome::Encoded(name.to_string()),
            Some(KnownFace {
                name: name.to_string(),
                embedding,
            }),
        ),
        Ok(None) => (EnrollOutcome::NoFace(path.to_path_buf()), None),
        Err(err) => (unreadable(format!("{:#}", err)), None),
    }
}

/// Enroll every photo in `dir`. `on_outcome` is called once per photo.
pub fn enroll_directory(
    recognizer: &mut dyn FaceRecognizer,
    dir: &Path,
    mut on_outcome: impl FnMut(&EnrollOutcome),
) -> Result<EnrollReport> {
    let mut faces = Vec::new();
    let mut outcomes = Vec::new();
    for path in list_photos(dir)? {
        let (outcome, face) = encode_photo(recognizer, &path);
        faces.extend(face);
        on_outcome(&outcome);
        outcomes.push(outcome);
    }
    Ok(EnrollReport {
        faces: KnownFaceSet::new(faces)?,
        outcomes,
    })
}
