use greeter_core::scan::{embed_best_face, scan_frame};
use greeter_core::{
    Detection, DetectorProfile, Embedding, EuclideanMatcher, FaceDetector, FaceRecognizer, FrameSize, Gallery,
    ScanError,
};
use greeter_hw::Camera;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] greeter_hw::CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] greeter_core::detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] greeter_core::recognizer::RecognizerError),
    #[error("{0}")]
    Scan(#[from] ScanError),
    #[error("failed to read photo {path}: {source}")]
    Photo {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("no camera available")]
    NoCamera,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the kiosk to the engine thread.
pub enum EngineRequest {
    /// Capture one frame and match every face in it against `gallery`.
    Scan {
        gallery: Arc<Gallery>,
        display: FrameSize,
        reply: oneshot::Sender<Result<Vec<Detection>, EngineError>>,
    },
    /// Embed the most confident face in a still photo.
    EmbedPhoto {
        path: PathBuf,
        reply: oneshot::Sender<Result<Option<Embedding>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub(crate) fn new(tx: mpsc::Sender<EngineRequest>) -> Self {
        Self { tx }
    }

    /// Request one detection pass over a fresh camera frame.
    pub async fn scan(&self, gallery: Arc<Gallery>, display: FrameSize) -> Result<Vec<Detection>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Scan {
                gallery,
                display,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Request an enrollment embedding from the photo at `path`.
    /// `Ok(None)` means the photo contains no detectable face.
    pub async fn embed_photo(&self, path: PathBuf) -> Result<Option<Embedding>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::EmbedPhoto { path, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Settings for [`spawn_engine`].
pub struct EngineConfig {
    pub detector_path: String,
    pub recognizer_path: String,
    pub match_threshold: f32,
    /// Frames dropped once after the models load, before the first scan.
    pub warmup_frames: usize,
}

/// Load both ONNX models and spawn the engine on a dedicated OS thread.
///
/// `camera` may be `None` when it could not be opened; photo embedding still
/// works and scans fail with [`EngineError::NoCamera`]. Blocks while the
/// models load and the camera warms up.
pub fn spawn_engine(mut camera: Option<Camera>, config: EngineConfig) -> Result<EngineHandle, EngineError> {
    // Live frames use the fast profile; enrollment photos get the full input size.
    let mut live_detector = FaceDetector::load(&config.detector_path, DetectorProfile::Fast)?;
    let mut photo_detector = FaceDetector::load(&config.detector_path, DetectorProfile::Accurate)?;
    tracing::info!(path = %config.detector_path, "SCRFD detector loaded");

    let mut recognizer = FaceRecognizer::load(&config.recognizer_path)?;
    tracing::info!(path = %config.recognizer_path, "ResNet-34 recognizer loaded");

    // Discard warmup frames for camera AGC/AE stabilization
    if let Some(camera) = camera.as_mut() {
        camera.warm_up(config.warmup_frames);
    }

    let matcher = EuclideanMatcher::new(config.match_threshold);
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("greeter-engine".into())
        .spawn(move || {
            tracing::info!(camera = camera.is_some(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Scan { gallery, display, reply } => {
                        let result = run_scan(
                            camera.as_mut(),
                            &mut live_detector,
                            &mut recognizer,
                            &matcher,
                            &gallery,
                            display,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::EmbedPhoto { path, reply } => {
                        let result = run_embed_photo(&mut photo_detector, &mut recognizer, path);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle::new(tx))
}

fn run_scan(
    camera: Option<&mut Camera>,
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    matcher: &EuclideanMatcher,
    gallery: &Gallery,
    display: FrameSize,
) -> Result<Vec<Detection>, EngineError> {
    let camera = camera.ok_or(EngineError::NoCamera)?;
    let frame = camera.capture_frame()?;
    tracing::trace!(sequence = frame.sequence, "captured frame");

    Ok(scan_frame(detector, recognizer, matcher, gallery, &frame.image, display)?)
}

fn run_embed_photo(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    path: PathBuf,
) -> Result<Option<Embedding>, EngineError> {
    let image = match image::open(&path) {
        Ok(image) => image.to_rgb8(),
        Err(source) => return Err(EngineError::Photo { path, source }),
    };
    tracing::debug!(path = %path.display(), width = image.width(), height = image.height(), "embedding photo");

    let embedding = embed_best_face(detector, recognizer, &image)?;
    if embedding.is_none() {
        tracing::warn!(path = %path.display(), "no face detected in photo");
    }
    Ok(embedding)
}
