//! greeter-core: Face matching pipeline for the welcome kiosk.
//!
//! SCRFD finds faces, a dlib ResNet-34 describes them, and a Euclidean matcher compares
//! each embedding against the roster gallery. The overlay and feedback
//! modules turn per-tick results into drawings and welcome announcements.

pub mod detector;
pub mod feedback;
pub mod gallery;
pub mod matcher;
pub mod overlay;
pub mod recognizer;
pub mod scan;
pub mod types;

pub use detector::{DetectorProfile, FaceDetector};
pub use feedback::{FeedbackCoordinator, FeedbackEffect, FeedbackTimings, WelcomeMessages};
pub use gallery::{EmbeddingStore, Gallery};
pub use matcher::{EuclideanMatcher, MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use recognizer::FaceRecognizer;
pub use scan::{FaceDetect, FaceEmbed, ScanError};
pub use types::{BoundingBox, Detection, Embedding, FrameSize, MatchLabel, Profile, RoleType, EMBEDDING_DIM};

use std::path::PathBuf;

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_500m.onnx";
/// File name of the ResNet-34 recognition model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "dlib_face_recognition_resnet_model_v1.onnx";

/// Model directory used when none is configured: `$XDG_DATA_HOME/greeter/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("greeter/models")
}
