use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Dimensionality of every embedding the recognizer produces and the gallery accepts.
pub const EMBEDDING_DIM: usize = 128;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Map this box (and its landmarks) from one pixel space into another.
    ///
    /// Used to report detections in the display surface's resolution rather
    /// than the capture resolution.
    pub fn rescale(&self, from: FrameSize, to: FrameSize) -> BoundingBox {
        let sx = if from.width > 0 { to.width as f32 / from.width as f32 } else { 1.0 };
        let sy = if from.height > 0 { to.height as f32 / from.height as f32 } else { 1.0 };

        BoundingBox {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * sx, ly * sy))),
        }
    }
}

/// Width and height of a frame or rendering surface, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Face embedding vector (128-dimensional dlib descriptor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True if the vector has exactly `dim` finite components.
    pub fn is_valid(&self, dim: usize) -> bool {
        self.values.len() == dim && self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Closed set of roster categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    Staff,
    Student,
}

impl RoleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleType::Staff => "staff",
            RoleType::Student => "student",
        }
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staff" => Ok(RoleType::Staff),
            "student" => Ok(RoleType::Student),
            other => Err(format!("unknown role type: {other} (expected staff or student)")),
        }
    }
}

/// An enrolled identity record.
///
/// Owned by the profile store; the matching pipeline only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub role_type: RoleType,
    pub designation: String,
    pub qualification: String,
    pub photo_url: Option<String>,
    /// Raw descriptor as persisted. `None` means the profile cannot be matched.
    pub face_descriptor: Option<Vec<f32>>,
    pub created_at: String,
}

impl Profile {
    /// The descriptor as an [`Embedding`], if present.
    pub fn embedding(&self) -> Option<Embedding> {
        self.face_descriptor.clone().map(Embedding::new)
    }
}

/// Outcome of matching one query embedding against the gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchLabel {
    /// Matched the profile with this id.
    Known(String),
    Unknown,
}

impl MatchLabel {
    pub fn profile_id(&self) -> Option<&str> {
        match self {
            MatchLabel::Known(id) => Some(id),
            MatchLabel::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, MatchLabel::Known(_))
    }
}

impl fmt::Display for MatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchLabel::Known(id) => f.write_str(id),
            MatchLabel::Unknown => f.write_str("unknown"),
        }
    }
}

/// One face found in one frame, in display-space coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
    pub label: MatchLabel,
    /// Distance to the best gallery candidate (`f32::INFINITY` for an empty gallery).
    pub distance: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_embedding_validity() {
        assert!(Embedding::new(vec![0.1; EMBEDDING_DIM]).is_valid(EMBEDDING_DIM));
        assert!(!Embedding::new(vec![0.1; 127]).is_valid(EMBEDDING_DIM));
        assert!(!Embedding::new(vec![]).is_valid(EMBEDDING_DIM));

        let mut values = vec![0.1; EMBEDDING_DIM];
        values[7] = f32::NAN;
        assert!(!Embedding::new(values).is_valid(EMBEDDING_DIM));
    }

    #[test]
    fn test_role_type_parse() {
        assert_eq!("Staff".parse::<RoleType>().unwrap(), RoleType::Staff);
        assert_eq!(" student ".parse::<RoleType>().unwrap(), RoleType::Student);
        assert!("visitor".parse::<RoleType>().is_err());
    }

    #[test]
    fn test_role_type_serde_lowercase() {
        let json = serde_json::to_string(&RoleType::Student).unwrap();
        assert_eq!(json, "\"student\"");
    }

    #[test]
    fn test_bbox_rescale_to_display() {
        let bbox = BoundingBox {
            x: 100.0, y: 50.0, width: 200.0, height: 100.0,
            confidence: 0.9, landmarks: Some([(110.0, 60.0); 5]),
        };
        let scaled = bbox.rescale(FrameSize::new(640, 480), FrameSize::new(1280, 960));
        assert_eq!(scaled.x, 200.0);
        assert_eq!(scaled.y, 100.0);
        assert_eq!(scaled.width, 400.0);
        assert_eq!(scaled.height, 200.0);
        assert_eq!(scaled.landmarks.unwrap()[0], (220.0, 120.0));
    }

    #[test]
    fn test_bbox_rescale_identity() {
        let bbox = BoundingBox {
            x: 1.0, y: 2.0, width: 3.0, height: 4.0, confidence: 0.5, landmarks: None,
        };
        let size = FrameSize::new(720, 560);
        assert_eq!(bbox.rescale(size, size), bbox);
    }

    #[test]
    fn test_match_label_display() {
        assert_eq!(MatchLabel::Unknown.to_string(), "unknown");
        assert_eq!(MatchLabel::Known("a".into()).to_string(), "a");
        assert_eq!(MatchLabel::Known("a".into()).profile_id(), Some("a"));
    }
}
