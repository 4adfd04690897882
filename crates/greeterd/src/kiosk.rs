//! Kiosk coordinator: owns the roster, the embedding gallery, welcome
//! feedback and the per-tick overlay, and drives the detection loop.

use crate::engine::{EngineError, EngineHandle};
use crate::store::{NewProfile, ProfileStore, StoreError};
use ab_glyph::FontArc;
use greeter_core::feedback::BannerView;
use greeter_core::overlay::{build_overlay, rasterize, Overlay, OverlayStyle};
use greeter_core::{
    BoundingBox, Detection, EmbeddingStore, FeedbackCoordinator, FeedbackEffect, FeedbackTimings, FrameSize,
    Profile, RoleType, WelcomeMessages, EMBEDDING_DIM,
};
use greeter_hw::Speaker;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

pub const NO_FACE_WARNING: &str = "No face detected in the photo. Profile will be created without face data.";
pub const NO_FACE_REENROLL_WARNING: &str =
    "No face detected in the photo. Profile will be saved without face data.";
pub const NO_PHOTO_WARNING: &str = "No photo provided. Profile will be created without face data.";

#[derive(Error, Debug)]
pub enum KioskError {
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Engine(#[from] EngineError),
    #[error("face models are not loaded")]
    ModelsUnavailable,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("profile not found: {0}")]
    NotFound(String),
    #[error("failed to write overlay: {0}")]
    Overlay(#[from] image::ImageError),
    #[error("failed to write overlay: {0}")]
    Io(#[from] std::io::Error),
}

/// Load state of the face models.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "lowercase")]
pub enum ModelStatus {
    Loading,
    Ready,
    Failed(String),
}

/// Presentation settings fixed at startup.
pub struct KioskOptions {
    pub display: FrameSize,
    pub timings: FeedbackTimings,
    pub messages: WelcomeMessages,
    pub style: OverlayStyle,
    pub font: Option<FontArc>,
    pub overlay_path: Option<PathBuf>,
}

impl Default for KioskOptions {
    fn default() -> Self {
        Self {
            display: FrameSize::new(720, 560),
            timings: FeedbackTimings::default(),
            messages: WelcomeMessages::default(),
            style: OverlayStyle::default(),
            font: None,
            overlay_path: None,
        }
    }
}

/// Operator-supplied enrollment fields.
#[derive(Debug, Clone)]
pub struct EnrollRequest {
    pub name: String,
    pub role_type: RoleType,
    pub designation: String,
    pub qualification: String,
    pub photo_path: Option<PathBuf>,
}

/// A profile as reported to operators, without the raw descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSummary {
    pub id: String,
    pub name: String,
    pub role_type: RoleType,
    pub designation: String,
    pub qualification: String,
    pub photo_url: Option<String>,
    pub has_face: bool,
    pub created_at: String,
}

impl From<&Profile> for ProfileSummary {
    fn from(p: &Profile) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            role_type: p.role_type,
            designation: p.designation.clone(),
            qualification: p.qualification.clone(),
            photo_url: p.photo_url.clone(),
            has_face: p.embedding().is_some_and(|e| e.is_valid(EMBEDDING_DIM)),
            created_at: p.created_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollOutcome {
    pub profile: ProfileSummary,
    pub warning: Option<String>,
}

/// Side-panel card for the identity being welcomed.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveCard {
    pub id: String,
    pub name: String,
    pub role_type: RoleType,
    pub designation: String,
    pub qualification: String,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub profiles: usize,
    pub enrolled_faces: usize,
    pub models: ModelStatus,
    pub camera_error: Option<String>,
    pub detection_armed: bool,
    pub state: &'static str,
    pub speaking: bool,
    pub faces_in_view: usize,
    pub banner: Option<BannerView>,
    pub active: Option<ActiveCard>,
}

struct KioskState {
    profiles: Vec<Profile>,
    embeddings: EmbeddingStore,
    feedback: FeedbackCoordinator,
    speaker: Box<dyn Speaker>,
    engine: Option<EngineHandle>,
    models: ModelStatus,
    camera_error: Option<String>,
    display: FrameSize,
    style: OverlayStyle,
    font: Option<FontArc>,
    overlay: Overlay,
    faces_in_view: usize,
}

impl KioskState {
    fn is_armed(&self) -> bool {
        self.engine.is_some() && self.models == ModelStatus::Ready && self.camera_error.is_none()
    }

    /// Pick up completion of the in-flight utterance.
    fn sync_voice(&mut self) {
        if self.feedback.is_speaking() && !self.speaker.is_speaking() {
            self.feedback.voice_finished();
        }
    }

    fn observe(&mut self, detections: &[Detection], now: Instant) {
        let matches: Vec<(&Profile, &BoundingBox)> = detections
            .iter()
            .filter_map(|d| {
                let id = d.label.profile_id()?;
                let profile = self.profiles.iter().find(|p| p.id == id)?;
                Some((profile, &d.bbox))
            })
            .collect();
        let effects = self.feedback.observe(&matches, now);
        self.apply(effects);

        self.overlay = build_overlay(detections, &self.profiles, self.display, &self.style);
        self.faces_in_view = detections.len();
    }

    fn apply(&mut self, effects: Vec<FeedbackEffect>) {
        for effect in effects {
            match effect {
                FeedbackEffect::Speak { profile_id, text } => {
                    tracing::info!(profile = %profile_id, text = %text, "announcing");
                    if let Err(e) = self.speaker.speak(&text) {
                        tracing::warn!(error = %e, "speech failed");
                        self.feedback.voice_finished();
                    }
                }
                FeedbackEffect::ShowBanner { text } => tracing::info!(banner = %text, "banner shown"),
                FeedbackEffect::HideBanner => tracing::debug!("banner hiding"),
                FeedbackEffect::BannerHidden => tracing::debug!("banner hidden"),
                FeedbackEffect::SessionReset => tracing::debug!("welcome session cleared"),
            }
        }
    }

    fn set_profiles(&mut self, profiles: Vec<Profile>) {
        self.embeddings.rebuild(&profiles);
        let removed = self
            .feedback
            .active()
            .filter(|a| !profiles.iter().any(|p| p.id == a.profile.id))
            .map(|a| a.profile.id.clone());
        if let Some(id) = removed {
            tracing::info!(profile = %id, "active profile removed from roster");
            let effects = self.feedback.reset();
            self.apply(effects);
        }
        self.profiles = profiles;
    }
}

/// The running kiosk. Shared between the detection loop and D-Bus handlers.
pub struct Kiosk {
    state: Mutex<KioskState>,
    store: ProfileStore,
    overlay_path: Option<PathBuf>,
}

impl Kiosk {
    /// A kiosk with models still loading and no engine attached.
    pub fn new(store: ProfileStore, speaker: Box<dyn Speaker>, options: KioskOptions) -> Self {
        let state = KioskState {
            profiles: Vec::new(),
            embeddings: EmbeddingStore::new(EMBEDDING_DIM),
            feedback: FeedbackCoordinator::new(options.timings, options.messages),
            speaker,
            engine: None,
            models: ModelStatus::Loading,
            camera_error: None,
            display: options.display,
            style: options.style,
            font: options.font,
            overlay: Overlay::empty(options.display),
            faces_in_view: 0,
        };
        Self {
            state: Mutex::new(state),
            store,
            overlay_path: options.overlay_path,
        }
    }

    /// Record the outcome of model loading.
    pub async fn attach_engine(&self, engine: Result<EngineHandle, EngineError>) {
        let mut state = self.state.lock().await;
        match engine {
            Ok(engine) => {
                state.engine = Some(engine);
                state.models = ModelStatus::Ready;
                let profiles = state.profiles.clone();
                state.embeddings.rebuild(&profiles);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load face models; detection disabled");
                state.models = ModelStatus::Failed(e.to_string());
            }
        }
    }

    /// Record a persistent camera failure. Detection is never armed afterwards.
    pub async fn set_camera_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(error = %message, "camera unavailable; detection disabled");
        self.state.lock().await.camera_error = Some(message);
    }

    pub async fn is_armed(&self) -> bool {
        self.state.lock().await.is_armed()
    }

    /// Re-read the roster and rebuild the gallery. Returns the profile count.
    pub async fn reload_profiles(&self) -> Result<usize, KioskError> {
        let profiles = self.store.list().await?;
        let count = profiles.len();
        self.state.lock().await.set_profiles(profiles);
        Ok(count)
    }

    pub async fn profiles(&self) -> Vec<ProfileSummary> {
        let state = self.state.lock().await;
        state.profiles.iter().map(ProfileSummary::from).collect()
    }

    /// Run one detection pass at `now`.
    ///
    /// Timers advance even when detection is not armed. The state lock is
    /// released while the engine works.
    pub async fn tick(&self, now: Instant) -> Result<(), KioskError> {
        let (engine, gallery, display) = {
            let mut state = self.state.lock().await;
            state.sync_voice();
            let effects = state.feedback.poll(now);
            state.apply(effects);

            if !state.is_armed() {
                return Ok(());
            }
            let Some(engine) = state.engine.clone() else {
                return Ok(());
            };
            (engine, state.embeddings.gallery(), state.display)
        };

        let scanned = engine.scan(gallery, display).await;

        let frame = {
            let mut state = self.state.lock().await;
            match &scanned {
                Ok(detections) => state.observe(detections, now),
                // Previous boxes must not outlive a failed scan.
                Err(_) => {
                    state.overlay = Overlay::empty(state.display);
                    state.faces_in_view = 0;
                }
            }
            self.overlay_path
                .as_ref()
                .map(|_| rasterize(&state.overlay, state.font.clone()))
        };

        let written = match (self.overlay_path.clone(), frame) {
            (Some(path), Some(frame)) => {
                match tokio::task::spawn_blocking(move || write_overlay(&path, &frame)).await {
                    Ok(result) => result,
                    Err(e) => Err(std::io::Error::other(e).into()),
                }
            }
            _ => Ok(()),
        };

        scanned?;
        written
    }

    /// Forget the current match. The banner runs out on its own timer.
    pub async fn clear_detection(&self) {
        let mut state = self.state.lock().await;
        let effects = state.feedback.reset();
        state.apply(effects);
        state.overlay = Overlay::empty(state.display);
        state.faces_in_view = 0;
        tracing::info!("detection cleared");
    }

    pub async fn overlay(&self) -> Overlay {
        self.state.lock().await.overlay.clone()
    }

    pub async fn status(&self) -> StatusReport {
        let state = self.state.lock().await;
        let active = state.feedback.active().map(|a| ActiveCard {
            id: a.profile.id.clone(),
            name: a.profile.name.clone(),
            role_type: a.profile.role_type,
            designation: a.profile.designation.clone(),
            qualification: a.profile.qualification.clone(),
            photo_url: a.profile.photo_url.clone(),
        });
        StatusReport {
            version: env!("CARGO_PKG_VERSION"),
            profiles: state.profiles.len(),
            enrolled_faces: state.embeddings.gallery().len(),
            models: state.models.clone(),
            camera_error: state.camera_error.clone(),
            detection_armed: state.is_armed(),
            state: state.feedback.state().name(),
            speaking: state.feedback.is_speaking(),
            faces_in_view: state.faces_in_view,
            banner: state.feedback.banner(),
            active,
        }
    }

    /// Create a profile, embedding the face in its photo when one is found.
    pub async fn enroll(&self, req: EnrollRequest) -> Result<EnrollOutcome, KioskError> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(KioskError::InvalidInput("name is required".into()));
        }

        let (face_descriptor, warning) = match req.photo_path.as_deref() {
            Some(path) => match self.embed_photo(path).await? {
                Some(values) => (Some(values), None),
                None => (None, Some(NO_FACE_WARNING.to_string())),
            },
            None => (None, Some(NO_PHOTO_WARNING.to_string())),
        };

        let profile = self
            .store
            .create(NewProfile {
                name: name.to_string(),
                role_type: req.role_type,
                designation: req.designation,
                qualification: req.qualification,
                photo_url: req.photo_path.map(|p| p.to_string_lossy().into_owned()),
                face_descriptor,
            })
            .await?;
        self.reload_profiles().await?;

        Ok(EnrollOutcome {
            profile: ProfileSummary::from(&profile),
            warning,
        })
    }

    /// Replace a profile's photo and face data.
    pub async fn reenroll(&self, id: &str, photo_path: PathBuf) -> Result<EnrollOutcome, KioskError> {
        if self.store.get(id).await?.is_none() {
            return Err(KioskError::NotFound(id.to_string()));
        }

        let face_descriptor = self.embed_photo(&photo_path).await?;
        let warning = face_descriptor
            .is_none()
            .then(|| NO_FACE_REENROLL_WARNING.to_string());

        let profile = self
            .store
            .update_face(id, Some(photo_path.to_string_lossy().into_owned()), face_descriptor)
            .await?;
        self.reload_profiles().await?;

        Ok(EnrollOutcome {
            profile: ProfileSummary::from(&profile),
            warning,
        })
    }

    pub async fn remove_profile(&self, id: &str) -> Result<bool, KioskError> {
        let removed = self.store.delete(id).await?;
        if removed {
            self.reload_profiles().await?;
        }
        Ok(removed)
    }

    async fn embed_photo(&self, path: &Path) -> Result<Option<Vec<f32>>, KioskError> {
        let engine = self
            .state
            .lock()
            .await
            .engine
            .clone()
            .ok_or(KioskError::ModelsUnavailable)?;
        let embedding = engine.embed_photo(path.to_path_buf()).await?;
        Ok(embedding.map(|e| e.values))
    }
}

/// Write the overlay PNG via a temporary file so readers never see a partial image.
fn write_overlay(path: &Path, frame: &image::RgbaImage) -> Result<(), KioskError> {
    let tmp = path.with_extension("png.tmp");
    frame.save_with_format(&tmp, image::ImageFormat::Png)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Tick the kiosk every `period` until the task is dropped.
///
/// Ticks never overlap: a tick that overruns makes the next ones skip.
/// A failed tick is logged and the loop continues.
pub async fn run_detection_loop(kiosk: Arc<Kiosk>, period: Duration) {
    if !kiosk.is_armed().await {
        tracing::warn!("detection not armed; detection loop not started");
        return;
    }

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(period_ms = period.as_millis() as u64, "detection loop started");

    loop {
        interval.tick().await;
        if let Err(e) = kiosk.tick(Instant::now()).await {
            tracing::warn!(error = %e, "detection tick failed");
        }
    }
}
