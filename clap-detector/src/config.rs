/// Configuration
///
/// `DetectionConfig` is fixed for the lifetime of one detector worker.
/// Changing it means starting a new worker (see `DetectorHandle::reload`).
/// `AppConfig` is the on-disk JSON file: detection settings plus the two
/// clap actions and launcher options.

use crate::audio_buffer::SAMPLE_RATE;
use crate::audio_source::StreamSpec;
use crate::clap_counter::ClapCounterConfig;
use crate::dispatch::TriggerActions;
use crate::wake::is_supported_keyword;
use action_launcher::{Action, LaunchStep, LauncherConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Default config file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "clapwake.json";

pub const ENV_CONFIG_PATH: &str = "CLAPWAKE_CONFIG";
pub const ENV_ACCESS_KEY: &str = "PORCUPINE_ACCESS_KEY";
pub const ENV_KEYWORD: &str = "CLAPWAKE_KEYWORD";
pub const ENV_THRESHOLD: &str = "CLAPWAKE_THRESHOLD";
pub const ENV_REPLAY: &str = "CLAPWAKE_REPLAY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Porcupine access key is missing (set PORCUPINE_ACCESS_KEY or detection.access_key; get one at https://console.picovoice.ai/)")]
    MissingAccessKey,

    #[error("Unsupported wake word '{0}'")]
    UnknownKeyword(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read {0}: {1}")]
    Io(PathBuf, String),

    #[error("Failed to parse {0}: {1}")]
    Parse(PathBuf, String),
}

/// Detection parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Keyword engine access credential
    pub access_key: String,

    /// Built-in keyword name or path to a `.ppn` model
    pub keyword: String,

    /// Keyword sensitivity (0.0 - 1.0, higher = more false positives)
    pub sensitivity: f32,

    /// Capture rate; the keyword engine requires 16kHz
    pub sample_rate: u32,

    /// Samples per frame while counting claps (64ms at 16kHz)
    pub clap_frame_size: usize,

    /// RMS a frame must exceed to count as a clap (0 - 32767)
    pub amplitude_threshold: f32,

    /// Minimum gap between two counted claps
    pub debounce_ms: u64,

    /// Clap sequence window, measured from the first clap
    pub clap_interval_ms: u64,

    /// How long to wait for the first clap after the wake word
    pub listen_timeout_ms: u64,

    /// Claps that trigger the primary action
    pub primary_clap_count: u32,

    /// Claps that trigger the secondary action
    pub secondary_clap_count: u32,

    /// RMS that maps to a full-scale audio level
    pub level_ceiling: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(), // Must be provided by user
            keyword: "jarvis".to_string(),
            sensitivity: 0.5,
            sample_rate: SAMPLE_RATE,
            clap_frame_size: 1024,
            amplitude_threshold: 1500.0,
            debounce_ms: 150,
            clap_interval_ms: 1000,
            listen_timeout_ms: 30_000,
            primary_clap_count: 2,
            secondary_clap_count: 3,
            level_ceiling: crate::loudness::DEFAULT_LEVEL_CEILING,
        }
    }
}

impl DetectionConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn clap_interval(&self) -> Duration {
        Duration::from_millis(self.clap_interval_ms)
    }

    pub fn listen_timeout(&self) -> Duration {
        Duration::from_millis(self.listen_timeout_ms)
    }

    /// Stream shape used while counting claps
    pub fn clap_stream_spec(&self) -> StreamSpec {
        StreamSpec::new(self.sample_rate, self.clap_frame_size)
    }

    pub fn counter_config(&self) -> ClapCounterConfig {
        ClapCounterConfig {
            amplitude_threshold: self.amplitude_threshold,
            debounce: self.debounce(),
            interval: self.clap_interval(),
            timeout: self.listen_timeout(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_key.trim().is_empty() {
            return Err(ConfigError::MissingAccessKey);
        }

        if !is_supported_keyword(&self.keyword) {
            return Err(ConfigError::UnknownKeyword(self.keyword.clone()));
        }

        if !(0.0..=1.0).contains(&self.sensitivity) {
            return Err(ConfigError::Invalid(
                "sensitivity must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.sample_rate != SAMPLE_RATE {
            return Err(ConfigError::Invalid(format!(
                "sample_rate must be {} Hz",
                SAMPLE_RATE
            )));
        }

        if self.clap_frame_size == 0 {
            return Err(ConfigError::Invalid(
                "clap_frame_size must be greater than 0".to_string(),
            ));
        }

        if self.amplitude_threshold.is_nan()
            || self.amplitude_threshold <= 0.0
            || self.amplitude_threshold > i16::MAX as f32
        {
            return Err(ConfigError::Invalid(
                "amplitude_threshold must be between 0 and 32767".to_string(),
            ));
        }

        if self.clap_interval_ms == 0 || self.listen_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "clap_interval_ms and listen_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.debounce_ms >= self.clap_interval_ms {
            return Err(ConfigError::Invalid(
                "debounce_ms must be shorter than clap_interval_ms".to_string(),
            ));
        }

        if self.primary_clap_count == self.secondary_clap_count {
            return Err(ConfigError::Invalid(
                "primary and secondary clap counts must differ".to_string(),
            ));
        }

        if self.primary_clap_count == 0 || self.secondary_clap_count == 0 {
            return Err(ConfigError::Invalid(
                "clap counts must be at least 1".to_string(),
            ));
        }

        if !self.level_ceiling.is_finite() || self.level_ceiling <= 0.0 {
            return Err(ConfigError::Invalid(
                "level_ceiling must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Actions bound to the two clap patterns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    pub primary: Action,
    pub secondary: Action,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            primary: Action::new(
                "Opening workspace",
                vec![
                    LaunchStep::command("code", &["~/Downloads/Development"]),
                    LaunchStep::OpenApp {
                        app: "Terminal".to_string(),
                        path: None,
                    },
                ],
            ),
            secondary: Action::new(
                "Playing YouTube video",
                vec![LaunchStep::OpenUrl {
                    url: "https://youtube.com".to_string(),
                    browser: Some("Google Chrome".to_string()),
                    new_window: true,
                }],
            ),
        }
    }
}

/// Whole application configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detection: DetectionConfig,
    pub actions: ActionsConfig,
    pub launcher: LauncherConfig,

    /// Verbose detector logging
    pub debug: bool,

    /// Replay this WAV file instead of opening the microphone
    pub replay: Option<PathBuf>,
}

impl AppConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        let config: AppConfig = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `$CLAPWAKE_CONFIG` (or `clapwake.json`), falling back to
    /// defaults when the file does not exist, then apply env overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            info!("Using configuration file {}", path.display());
            Self::load(&path)?
        } else {
            info!("No configuration file at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_ACCESS_KEY).filter(|k| !k.trim().is_empty()) {
            self.detection.access_key = key;
        }

        if let Some(keyword) = lookup(ENV_KEYWORD).filter(|k| !k.trim().is_empty()) {
            self.detection.keyword = keyword;
        }

        if let Some(threshold) = lookup(ENV_THRESHOLD) {
            self.detection.amplitude_threshold = threshold.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} is not a number: {}", ENV_THRESHOLD, threshold))
            })?;
        }

        if let Some(replay) = lookup(ENV_REPLAY).filter(|p| !p.trim().is_empty()) {
            self.replay = Some(PathBuf::from(replay));
        }

        Ok(())
    }

    pub fn trigger_actions(&self) -> TriggerActions<Action> {
        TriggerActions::new(
            self.detection.primary_clap_count,
            self.actions.primary.clone(),
            self.detection.secondary_clap_count,
            self.actions.secondary.clone(),
        )
    }
}
