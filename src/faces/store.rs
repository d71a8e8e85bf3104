//! Enrolled identities (`KnownFaceSet`) and their on-disk store.
//!
//! The store is produced by the `enroll` tool and loaded once at daemon
//! start. It is read-only for the lifetime of the control loop.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::result::Verdict;

pub const STORE_VERSION: u32 = 1;

/// Default match threshold on Euclidean embedding distance.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnownFace {
    pub name: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    faces: Vec<KnownFace>,
}

#[derive(Clone, Debug, Default)]
pub struct KnownFaceSet {
    faces: Vec<KnownFace>,
}

impl KnownFaceSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a set, rejecting blank names, non-finite values and mixed
    /// embedding dimensions.
    pub fn new(faces: Vec<KnownFace>) -> Result<Self> {
        let mut dimension = None;
        for face in &faces {
            if face.name.trim().is_empty() {
                return Err(anyhow!("enrolled face has an empty name"));
            }
            if face.embedding.is_empty() {
                return Err(anyhow!("enrolled face '{}' has an empty embedding", face.name));
            }
            if face.embedding.iter().any(|v| !v.is_finite()) {
                return Err(anyhow!(
                    "enrolled face '{}' has a non-finite embedding value",
                    face.name
                ));
            }
            match dimension {
                None => dimension = Some(face.embedding.len()),
                Some(dim) if dim != face.embedding.len() => {
                    return Err(anyhow!(
                        "enrolled face '{}' has embedding dimension {}, expected {}",
                        face.name,
                        face.embedding.len(),
                        dim
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(Self { faces })
    }

    /// Load the store. A missing file yields an empty set; every face will
    /// then be unmatched.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::warn!(
                "face store {} not found; no identities enrolled",
                path.display()
            );
            return Ok(Self::empty());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read face store {}", path.display()))?;
        let file: StoreFile = serde_json::from_str(&raw)
            .with_context(|| format!("invalid face store {}", path.display()))?;
        if file.version != STORE_VERSION {
            return Err(anyhow!(
                "face store {} has version {}, expected {}",
                path.display(),
                file.version,
                STORE_VERSION
            ));
        }
        Self::new(file.faces)
    }

    /// Write the store atomically (temp file then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = StoreFile {
            version: STORE_VERSION,
            faces: self.faces.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move face store into {}", path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.faces.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.faces.first().map(|f| f.embedding.len())
    }

    /// Compare an embedding against the enrolled identities.
    ///
    /// Matches the first identity in store order within `tolerance`. The
    /// returned distance is to that identity, or to the closest one when
    /// nothing matched.
    pub fn identify(&self, embedding: &[f32], tolerance: f32) -> (Verdict, Option<f32>) {
        if let Some(dim) = self.dimension() {
            if dim != embedding.len() {
                log::warn!(
                    "embedding dimension {} does not match enrolled dimension {}",
                    embedding.len(),
                    dim
                );
                return (Verdict::Unmatched, None);
            }
        }

        let mut closest: Option<f32> = None;
        for face in &self.faces {
            let distance = euclidean_distance(&face.embedding, embedding);
            if distance <= tolerance {
                return (Verdict::Matched(face.name.clone()), Some(distance));
            }
            closest = Some(closest.map_or(distance, |c| c.min(distance)));
        }
        (Verdict::Unmatched, closest)
    }
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn face(name: &str, embedding: &[f32]) -> KnownFace {
        KnownFace {
            name: name.to_string(),
            embedding: embedding.to_vec(),
        }
    }

    #[test]
    fn identify_picks_first_match_in_store_order() {
        let set = KnownFaceSet::new(vec![
            face("alice", &[0.0, 0.0]),
            face("bob", &[0.1, 0.0]),
        ])
        .unwrap();
        let (verdict, distance) = set.identify(&[0.05, 0.0], 0.6);
        assert_eq!(verdict, Verdict::Matched("alice".to_string()));
        assert!((distance.unwrap() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn identify_reports_closest_when_unmatched() {
        let set = KnownFaceSet::new(vec![
            face("alice", &[0.0, 0.0]),
            face("bob", &[3.0, 4.0]),
        ])
        .unwrap();
        let (verdict, distance) = set.identify(&[3.0, 5.0], 0.6);
        assert_eq!(verdict, Verdict::Unmatched);
        assert_eq!(distance, Some(1.0));
    }

    #[test]
    fn empty_set_never_matches() {
        let (verdict, distance) = KnownFaceSet::empty().identify(&[1.0], 10.0);
        assert_eq!(verdict, Verdict::Unmatched);
        assert_eq!(distance, None);
    }

    #[test]
    fn dimension_mismatch_is_unmatched() {
        let set = KnownFaceSet::new(vec![face("alice", &[0.0, 0.0])]).unwrap();
        assert_eq!(set.identify(&[0.0, 0.0, 0.0], 1.0).0, Verdict::Unmatched);
    }

    #[test]
    fn rejects_mixed_dimensions_and_blank_names() {
        assert!(KnownFaceSet::new(vec![face("a", &[1.0]), face("b", &[1.0, 2.0])]).is_err());
        assert!(KnownFaceSet::new(vec![face(" ", &[1.0])]).is_err());
        assert!(KnownFaceSet::new(vec![face("a", &[f32::NAN])]).is_err());
    }

    #[test]
    fn save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("faces.json");
        let set = KnownFaceSet::new(vec![face("alice", &[0.25, -0.5])]).unwrap();
        set.save(&path).unwrap();

        let loaded = KnownFaceSet::load(&path).unwrap();
        assert_eq!(loaded.names(), vec!["alice"]);
        assert_eq!(loaded.dimension(), Some(2));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn missing_store_is_empty() {
        let dir = tempdir().unwrap();
        let loaded = KnownFaceSet::load(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn corrupt_store_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("faces.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(KnownFaceSet::load(&path).is_err());

        std::fs::write(&path, r#"{"version": 9, "faces": []}"#).unwrap();
        let err = KnownFaceSet::load(&path).unwrap_err();
        assert!(err.to_string().contains("version 9"));
    }
}
