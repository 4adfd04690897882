use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file, then `GREETER_*`
/// environment variables. Later layers win.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture resolution.
    pub capture_width: u32,
    pub capture_height: u32,
    /// Frames discarded once at startup while auto-exposure settles.
    pub warmup_frames: usize,
    /// Size of the surface the overlay is drawn for.
    pub display_width: u32,
    pub display_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite profile database.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance (inclusive) for a positive match.
    pub match_threshold: f32,
    pub tick_interval: Duration,
    pub banner_dwell: Duration,
    pub banner_transition: Duration,
    pub session_reset: Duration,
    /// Venue named in the welcome message.
    pub venue: String,
    /// Speech synthesiser command. Empty disables speech.
    pub speech_program: String,
    pub speech_args: Vec<String>,
    /// TTF/OTF font for overlay labels. Without one, each character is drawn as a solid block.
    pub font_path: Option<PathBuf>,
    /// Where to write the rendered overlay PNG after each tick.
    pub overlay_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let db_path = data_dir().join("profiles.db");
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_width: 720,
            capture_height: 560,
            warmup_frames: 4,
            display_width: 720,
            display_height: 560,
            model_dir: greeter_core::default_model_dir(),
            db_path,
            match_threshold: greeter_core::DEFAULT_MATCH_THRESHOLD,
            tick_interval: Duration::from_millis(300),
            banner_dwell: Duration::from_secs(5),
            banner_transition: Duration::from_millis(500),
            session_reset: Duration::from_secs(8),
            venue: "IT Department".to_string(),
            speech_program: "espeak-ng".to_string(),
            speech_args: vec!["-s".to_string(), "165".to_string()],
            font_path: None,
            overlay_path: None,
        }
    }
}

/// On-disk representation. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    capture_width: Option<u32>,
    capture_height: Option<u32>,
    warmup_frames: Option<usize>,
    display_width: Option<u32>,
    display_height: Option<u32>,
    model_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    tick_interval_ms: Option<u64>,
    banner_dwell_ms: Option<u64>,
    banner_transition_ms: Option<u64>,
    session_reset_ms: Option<u64>,
    venue: Option<String>,
    speech_program: Option<String>,
    speech_args: Option<Vec<String>>,
    font_path: Option<PathBuf>,
    overlay_path: Option<PathBuf>,
}

impl Config {
    /// Load the full layered configuration for the running process.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let explicit = std::env::var_os("GREETER_CONFIG").map(PathBuf::from);
        let path = explicit.clone().unwrap_or_else(default_config_path);
        if explicit.is_some() || path.exists() {
            config.apply_file(&path)?;
            tracing::info!(path = %path.display(), "loaded config file");
        }

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.apply_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_toml(&mut self, text: &str) -> Result<(), toml::de::Error> {
        let file: FileConfig = toml::from_str(text)?;

        macro_rules! take {
            ($($field:ident),*) => {
                $(if let Some(v) = file.$field { self.$field = v; })*
            };
        }
        take!(
            camera_device,
            capture_width,
            capture_height,
            warmup_frames,
            display_width,
            display_height,
            model_dir,
            db_path,
            match_threshold,
            venue,
            speech_program,
            speech_args
        );

        if let Some(ms) = file.tick_interval_ms {
            self.tick_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.banner_dwell_ms {
            self.banner_dwell = Duration::from_millis(ms);
        }
        if let Some(ms) = file.banner_transition_ms {
            self.banner_transition = Duration::from_millis(ms);
        }
        if let Some(ms) = file.session_reset_ms {
            self.session_reset = Duration::from_millis(ms);
        }
        if file.font_path.is_some() {
            self.font_path = file.font_path;
        }
        if file.overlay_path.is_some() {
            self.overlay_path = file.overlay_path;
        }
        Ok(())
    }

    /// Overlay `GREETER_*` variables, read through `var`.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = var("GREETER_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("GREETER_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("GREETER_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("GREETER_VENUE") {
            self.venue = v;
        }
        if let Some(v) = var("GREETER_SPEECH_PROGRAM") {
            self.speech_program = v;
        }
        if let Some(v) = var("GREETER_FONT_PATH") {
            self.font_path = non_empty_path(v);
        }
        if let Some(v) = var("GREETER_OVERLAY_PATH") {
            self.overlay_path = non_empty_path(v);
        }

        env_parse(&var, "GREETER_CAPTURE_WIDTH", &mut self.capture_width)?;
        env_parse(&var, "GREETER_CAPTURE_HEIGHT", &mut self.capture_height)?;
        env_parse(&var, "GREETER_WARMUP_FRAMES", &mut self.warmup_frames)?;
        env_parse(&var, "GREETER_DISPLAY_WIDTH", &mut self.display_width)?;
        env_parse(&var, "GREETER_DISPLAY_HEIGHT", &mut self.display_height)?;
        env_parse(&var, "GREETER_MATCH_THRESHOLD", &mut self.match_threshold)?;
        env_millis(&var, "GREETER_TICK_INTERVAL_MS", &mut self.tick_interval)?;
        env_millis(&var, "GREETER_BANNER_DWELL_MS", &mut self.banner_dwell)?;
        env_millis(&var, "GREETER_BANNER_TRANSITION_MS", &mut self.banner_transition)?;
        env_millis(&var, "GREETER_SESSION_RESET_MS", &mut self.session_reset)?;
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(greeter_core::DETECTOR_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ResNet-34 recognition model.
    pub fn recognizer_model_path(&self) -> String {
        self.model_dir
            .join(greeter_core::RECOGNIZER_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("greeter")
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("greeter/greeter.toml")
}

fn non_empty_path(v: String) -> Option<PathBuf> {
    (!v.is_empty()).then(|| PathBuf::from(v))
}

fn env_parse<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = var(key) {
        *slot = value.parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value,
        })?;
    }
    Ok(())
}

fn env_millis(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut Duration,
) -> Result<(), ConfigError> {
    let mut ms = slot.as_millis() as u64;
    env_parse(var, key, &mut ms)?;
    *slot = Duration::from_millis(ms);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tick_interval, Duration::from_millis(300));
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!((config.capture_width, config.capture_height), (720, 560));
        assert_eq!(config.warmup_frames, 4);
        assert_eq!(config.banner_dwell, Duration::from_secs(5));
        assert_eq!(config.session_reset, Duration::from_secs(8));
        assert!(config.detector_model_path().ends_with("det_500m.onnx"));
        assert!(config
            .recognizer_model_path()
            .ends_with("dlib_face_recognition_resnet_model_v1.onnx"));
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let mut config = Config::default();
        config
            .apply_toml(
                r#"
                camera_device = "/dev/video4"
                match_threshold = 0.5
                tick_interval_ms = 250
                warmup_frames = 10
                venue = "Library"
                overlay_path = "/run/greeter/overlay.png"
                "#,
            )
            .unwrap();

        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.match_threshold, 0.5);
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.warmup_frames, 10);
        assert_eq!(config.venue, "Library");
        assert_eq!(config.overlay_path, Some(PathBuf::from("/run/greeter/overlay.png")));
        // untouched keys keep their defaults
        assert_eq!(config.session_reset, Duration::from_secs(8));
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        let mut config = Config::default();
        assert!(config.apply_toml("similarity_threshold = 0.4").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::default();
        config.apply_toml("venue = \"Library\"\nmatch_threshold = 0.5").unwrap();
        config
            .apply_env(env(&[
                ("GREETER_VENUE", "Admissions"),
                ("GREETER_MATCH_THRESHOLD", "0.45"),
                ("GREETER_SESSION_RESET_MS", "10000"),
                ("GREETER_WARMUP_FRAMES", "0"),
            ]))
            .unwrap();

        assert_eq!(config.venue, "Admissions");
        assert_eq!(config.match_threshold, 0.45);
        assert_eq!(config.session_reset, Duration::from_secs(10));
        assert_eq!(config.warmup_frames, 0);
    }

    #[test]
    fn test_env_empty_path_disables_overlay() {
        let mut config = Config {
            overlay_path: Some(PathBuf::from("/tmp/x.png")),
            ..Config::default()
        };
        config.apply_env(env(&[("GREETER_OVERLAY_PATH", "")])).unwrap();
        assert_eq!(config.overlay_path, None);
    }

    #[test]
    fn test_env_invalid_number() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("GREETER_TICK_INTERVAL_MS", "fast")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "GREETER_TICK_INTERVAL_MS"));
    }
}
