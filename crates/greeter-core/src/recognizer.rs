//! dlib ResNet-34 face recognizer via ONNX Runtime.
//!
//! Produces 128-dimensional descriptors in the dlib metric space, where two
//! faces of the same person lie within Euclidean distance 0.6. Descriptors
//! are used as the network emits them; rescaling them (e.g. unit-normalising)
//! would invalidate that threshold.

use crate::scan::FaceEmbed;
use crate::types::{BoundingBox, Embedding, EMBEDDING_DIM};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Side of the square network input.
pub const RESNET_INPUT_SIZE: u32 = 150;
// Per-channel RGB means, then a shared divisor (face-api / dlib preprocessing).
const RESNET_MEAN: [f32; 3] = [122.782, 117.001, 104.298];
const RESNET_SCALE: f32 = 256.0;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; place the dlib ResNet-34 ONNX export in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// dlib ResNet-34 face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ResNet-34 ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ResNet-34 recognizer"
        );

        Ok(Self { session })
    }

    /// Crop `face` out of `frame` and compute its descriptor.
    pub fn extract(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let chip = face_chip(frame, face).ok_or(RecognizerError::EmptyCrop)?;
        let input = preprocess(&chip);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        descriptor_from_output(raw)
    }
}

impl FaceEmbed for FaceRecognizer {
    fn extract(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        FaceRecognizer::extract(self, frame, face)
    }
}

/// Crop the face box, pad it to a centred square with black and resize to
/// the network input. `None` if the box does not overlap the frame.
fn face_chip(frame: &RgbImage, face: &BoundingBox) -> Option<RgbImage> {
    let x0 = face.x.max(0.0).floor() as u32;
    let y0 = face.y.max(0.0).floor() as u32;
    let x1 = ((face.x + face.width).ceil().max(0.0) as u32).min(frame.width());
    let y1 = ((face.y + face.height).ceil().max(0.0) as u32).min(frame.height());
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let (w, h) = (x1 - x0, y1 - y0);
    let crop = imageops::crop_imm(frame, x0, y0, w, h).to_image();

    let side = w.max(h);
    let mut square = RgbImage::from_pixel(side, side, Rgb([0, 0, 0]));
    imageops::replace(&mut square, &crop, ((side - w) / 2) as i64, ((side - h) / 2) as i64);

    Some(imageops::resize(&square, RESNET_INPUT_SIZE, RESNET_INPUT_SIZE, FilterType::Triangle))
}

/// 150×150 RGB chip → NCHW float tensor.
fn preprocess(chip: &RgbImage) -> Array4<f32> {
    let size = RESNET_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in chip.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x >= size || y >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, y, x]] = (pixel.0[c] as f32 - RESNET_MEAN[c]) / RESNET_SCALE;
        }
    }
    tensor
}

/// Validate the raw network output. Values are kept as emitted.
fn descriptor_from_output(raw: &[f32]) -> Result<Embedding, RecognizerError> {
    if raw.len() != EMBEDDING_DIM {
        return Err(RecognizerError::InferenceFailed(format!(
            "expected {EMBEDDING_DIM}-dim descriptor, got {}",
            raw.len()
        )));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(RecognizerError::InferenceFailed("non-finite descriptor".into()));
    }
    Ok(Embedding::new(raw.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{EuclideanMatcher, Matcher};
    use crate::gallery::Gallery;
    use crate::types::{MatchLabel, Profile, RoleType};

    fn face(x: f32, y: f32, width: f32, height: f32) -> BoundingBox {
        BoundingBox { x, y, width, height, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_chip_is_square_and_centred() {
        // Tall white face on a grey frame: padding shows up left and right.
        let mut frame = RgbImage::from_pixel(400, 400, Rgb([128, 128, 128]));
        for y in 100..300 {
            for x in 150..250 {
                frame.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let chip = face_chip(&frame, &face(150.0, 100.0, 100.0, 200.0)).unwrap();
        assert_eq!(chip.dimensions(), (150, 150));
        assert_eq!(chip.get_pixel(2, 75), &Rgb([0, 0, 0]));
        assert_eq!(chip.get_pixel(147, 75), &Rgb([0, 0, 0]));
        assert_eq!(chip.get_pixel(75, 75), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_chip_clamped_to_frame() {
        let frame = RgbImage::from_pixel(100, 100, Rgb([10, 10, 10]));
        assert!(face_chip(&frame, &face(-20.0, -20.0, 60.0, 60.0)).is_some());
        assert!(face_chip(&frame, &face(200.0, 200.0, 50.0, 50.0)).is_none());
    }

    #[test]
    fn test_preprocess_subtracts_channel_means() {
        let chip = RgbImage::from_pixel(150, 150, Rgb([122, 117, 104]));
        let tensor = preprocess(&chip);
        assert_eq!(tensor.shape(), &[1, 3, 150, 150]);
        assert!((tensor[[0, 0, 0, 0]] - (122.0 - 122.782) / 256.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 149, 149]] - (104.0 - 104.298) / 256.0).abs() < 1e-6);
    }

    #[test]
    fn test_descriptor_keeps_network_scale() {
        let raw: Vec<f32> = (0..EMBEDDING_DIM).map(|i| (i as f32 - 64.0) * 0.003).collect();
        let descriptor = descriptor_from_output(&raw).unwrap();
        assert_eq!(descriptor.values, raw);
    }

    #[test]
    fn test_descriptor_rejects_bad_output() {
        assert!(descriptor_from_output(&[0.1; 512]).is_err());
        let mut raw = vec![0.0; EMBEDDING_DIM];
        raw[3] = f32::NAN;
        assert!(descriptor_from_output(&raw).is_err());
    }

    #[test]
    fn test_typical_distances_match_at_default_threshold() {
        // Descriptors differing by a spread typical of one person (about 0.45)
        // match; the spread typical of two people (about 0.8) does not.
        let base: Vec<f32> = (0..EMBEDDING_DIM).map(|i| ((i % 7) as f32 - 3.0) * 0.03).collect();
        let shifted = |delta: f32| {
            let mut v = base.clone();
            v[0] += delta;
            descriptor_from_output(&v).unwrap()
        };
        let gallery = Gallery::from_profiles(
            &[Profile {
                id: "alice".into(),
                name: "Alice".into(),
                role_type: RoleType::Staff,
                designation: String::new(),
                qualification: String::new(),
                photo_url: None,
                face_descriptor: Some(base.clone()),
                created_at: String::new(),
            }],
            EMBEDDING_DIM,
        );
        let matcher = EuclideanMatcher::default();

        assert_eq!(matcher.best_match(&shifted(0.45), &gallery).label, MatchLabel::Known("alice".into()));
        assert_eq!(matcher.best_match(&shifted(0.8), &gallery).label, MatchLabel::Unknown);
    }
}
