//! One detection pass over one frame: detect, embed, match, rescale.

use crate::detector::DetectorError;
use crate::gallery::Gallery;
use crate::matcher::Matcher;
use crate::recognizer::RecognizerError;
use crate::types::{BoundingBox, Detection, Embedding, FrameSize, MatchLabel};
use image::RgbImage;
use thiserror::Error;

/// Something that finds faces in a frame.
pub trait FaceDetect {
    /// Boxes in frame coordinates, highest confidence first.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Something that turns a detected face into an embedding.
pub trait FaceEmbed {
    fn extract(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError>;
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detect every face in `frame`, embed it and match it against `gallery`.
///
/// An empty gallery skips matching entirely and labels every face unknown.
/// Returned boxes are in `display` coordinates.
pub fn scan_frame<D, E, M>(
    detector: &mut D,
    embedder: &mut E,
    matcher: &M,
    gallery: &Gallery,
    frame: &RgbImage,
    display: FrameSize,
) -> Result<Vec<Detection>, ScanError>
where
    D: FaceDetect + ?Sized,
    E: FaceEmbed + ?Sized,
    M: Matcher + ?Sized,
{
    let capture = FrameSize::new(frame.width(), frame.height());
    let faces = detector.detect(frame)?;
    let mut detections = Vec::with_capacity(faces.len());

    for face in &faces {
        let embedding = embedder.extract(frame, face)?;
        let (label, distance) = if gallery.is_empty() {
            (MatchLabel::Unknown, f32::INFINITY)
        } else {
            let result = matcher.best_match(&embedding, gallery);
            (result.label, result.distance)
        };

        detections.push(Detection {
            bbox: face.rescale(capture, display),
            embedding,
            label,
            distance,
        });
    }

    tracing::debug!(
        faces = detections.len(),
        known = detections.iter().filter(|d| d.label.is_known()).count(),
        "scanned frame"
    );
    Ok(detections)
}

/// Embedding of the most confident face in a still image, if any face is found.
pub fn embed_best_face<D, E>(
    detector: &mut D,
    embedder: &mut E,
    image: &RgbImage,
) -> Result<Option<Embedding>, ScanError>
where
    D: FaceDetect + ?Sized,
    E: FaceEmbed + ?Sized,
{
    let faces = detector.detect(image)?;
    let Some(best) = faces
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    else {
        return Ok(None);
    };
    tracing::debug!(confidence = best.confidence, candidates = faces.len(), "selected face for enrollment");
    Ok(Some(embedder.extract(image, best)?))
}
