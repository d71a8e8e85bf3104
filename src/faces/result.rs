/// Pixel bounding box of a detected face.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaceRegion {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl FaceRegion {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: right.max(left),
            bottom: bottom.max(top),
        }
    }

    /// Region covering a whole `width x height` image.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(
            0,
            0,
            width.saturating_sub(1),
            height.saturating_sub(1),
        )
    }

    pub fn width(&self) -> u32 {
        self.right - self.left + 1
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top + 1
    }
}

/// Outcome of comparing a face against the enrolled identities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Matched(String),
    Unmatched,
}

impl Verdict {
    pub fn is_match(&self) -> bool {
        matches!(self, Verdict::Matched(_))
    }

    /// Label drawn next to the face.
    pub fn label(&self) -> &str {
        match self {
            Verdict::Matched(name) => name,
            Verdict::Unmatched => "Unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectedFace {
    pub region: FaceRegion,
    pub verdict: Verdict,
    /// Distance to the matched identity, or to the closest one when unmatched.
    pub distance: Option<f32>,
}

impl DetectedFace {
    pub fn matched(region: FaceRegion, name: impl Into<String>) -> Self {
        Self {
            region,
            verdict: Verdict::Matched(name.into()),
            distance: None,
        }
    }

    pub fn unmatched(region: FaceRegion) -> Self {
        Self {
            region,
            verdict: Verdict::Unmatched,
            distance: None,
        }
    }
}
