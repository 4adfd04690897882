use anyhow::{Context, Result};
use greeter_core::overlay::{load_font, OverlayStyle};
use greeter_core::{FeedbackTimings, FrameSize, WelcomeMessages};
use greeter_hw::{Camera, CommandSpeaker, SilentSpeaker, Speaker};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod kiosk;
mod store;

use config::Config;
use engine::EngineConfig;
use kiosk::{Kiosk, KioskOptions};

const BUS_NAME: &str = "org.greeter.Kiosk1";
const OBJECT_PATH: &str = "/org/greeter/Kiosk1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("greeterd starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        camera = %config.camera_device,
        model_dir = %config.model_dir.display(),
        db = %config.db_path.display(),
        threshold = config.match_threshold,
        "configuration loaded"
    );

    let store = store::ProfileStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open profile database {}", config.db_path.display()))?;

    let kiosk = Arc::new(Kiosk::new(store, speaker(&config), kiosk_options(&config)));
    let count = kiosk.reload_profiles().await.context("failed to load profiles")?;
    tracing::info!(profiles = count, "roster loaded");

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, dbus_interface::KioskService::new(kiosk.clone()))?
        .build()
        .await
        .context("failed to register on the session bus")?;
    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");

    // Camera and models are acquired once. Failures leave the kiosk serving
    // D-Bus but with detection disarmed; there is no retry.
    let device = config.camera_device.clone();
    let (width, height) = (config.capture_width, config.capture_height);
    let engine_config = EngineConfig {
        detector_path: config.detector_model_path(),
        recognizer_path: config.recognizer_model_path(),
        match_threshold: config.match_threshold,
        warmup_frames: config.warmup_frames,
    };
    let (camera_error, engine) = tokio::task::spawn_blocking(move || {
        let (camera, camera_error) = match Camera::open(&device, width, height) {
            Ok(camera) => {
                tracing::info!(
                    device = %camera.device_path,
                    width = camera.width,
                    height = camera.height,
                    fourcc = ?camera.fourcc,
                    "camera opened"
                );
                (Some(camera), None)
            }
            Err(e) => {
                tracing::error!(device = %device, error = %e, "failed to open camera");
                (None, Some(e.user_message()))
            }
        };
        (camera_error, engine::spawn_engine(camera, engine_config))
    })
    .await
    .context("hardware setup task panicked")?;

    if let Some(message) = camera_error {
        kiosk.set_camera_error(message).await;
    }
    kiosk.attach_engine(engine).await;

    let detection = tokio::spawn(kiosk::run_detection_loop(kiosk.clone(), config.tick_interval));

    tracing::info!("greeterd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("greeterd shutting down");
    detection.abort();

    Ok(())
}

fn speaker(config: &Config) -> Box<dyn Speaker> {
    if config.speech_program.is_empty() {
        tracing::info!("speech output disabled");
        Box::new(SilentSpeaker)
    } else {
        Box::new(CommandSpeaker::new(
            config.speech_program.clone(),
            config.speech_args.clone(),
        ))
    }
}

fn kiosk_options(config: &Config) -> KioskOptions {
    let font = config.font_path.as_deref().and_then(|path| match load_font(path) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load label font; labels drawn without text");
            None
        }
    });

    KioskOptions {
        display: FrameSize::new(config.display_width, config.display_height),
        timings: FeedbackTimings {
            banner_dwell: config.banner_dwell,
            banner_transition: config.banner_transition,
            session_reset: config.session_reset,
        },
        messages: WelcomeMessages::new(config.venue.clone()),
        style: OverlayStyle::default(),
        font,
        overlay_path: config.overlay_path.clone(),
    }
}
