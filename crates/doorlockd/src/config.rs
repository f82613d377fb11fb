use crate::control_loop::LoopConfig;
use doorlock_hw::{camera_candidates, Calibration, SourceCandidate};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Config file read when `DOORLOCK_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/doorlock/doorlockd.toml";

/// Resolution of the synthetic fallback source.
const SYNTHETIC_SIZE: (u32, u32) = (640, 480);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    System,
    Session,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "session" => Ok(Self::Session),
            other => Err(format!("unknown bus `{other}`")),
        }
    }
}

/// Daemon configuration: defaults, then the TOML file, then `DOORLOCK_*` variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// GStreamer launch description tried first. Empty disables the pipeline backend.
    pub camera_pipeline: String,
    /// V4L2 indices tried in order after the pipeline.
    pub camera_indices: Vec<u32>,
    /// Append a synthetic test pattern as the last fallback.
    pub camera_synthetic: bool,
    /// Nominal tick interval in milliseconds.
    pub cycle_interval_ms: u64,
    /// Whether recognition starts enabled.
    pub recognition_enabled: bool,
    /// Use in-memory servo/indicator instead of sysfs.
    pub mock_hardware: bool,
    pub pwm_chip: u32,
    pub pwm_channel: u32,
    /// GPIO line driving the status indicator.
    pub status_gpio: u32,
    /// Servo position for the locked state, in [-1, 1].
    pub locked_position: f32,
    /// Servo position for the unlocked state, in [-1, 1].
    pub unlocked_position: f32,
    /// Wait after each move before the indicator goes dark.
    pub settle_ms: u64,
    pub gallery_path: PathBuf,
    /// Cosine similarity needed for a match.
    pub match_threshold: f32,
    pub bus: BusKind,
}

impl Default for Config {
    fn default() -> Self {
        let calibration = Calibration::default();
        Self {
            camera_pipeline: doorlock_hw::pipeline::DEFAULT_PIPELINE.to_string(),
            camera_indices: vec![0, 1, 2],
            camera_synthetic: false,
            cycle_interval_ms: 33,
            recognition_enabled: true,
            mock_hardware: false,
            pwm_chip: 0,
            pwm_channel: 0,
            status_gpio: 3,
            locked_position: calibration.locked_position,
            unlocked_position: calibration.unlocked_position,
            settle_ms: calibration.settle.as_millis() as u64,
            gallery_path: doorlock_core::gallery::default_gallery_path(),
            match_threshold: 0.80,
            bus: BusKind::System,
        }
    }
}

impl Config {
    /// Load from `DOORLOCK_CONFIG` (or the default path) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("DOORLOCK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                tracing::debug!(path = %path.display(), "loading config file");
                Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply `DOORLOCK_*` overrides. Values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("DOORLOCK_CAMERA_PIPELINE") {
            self.camera_pipeline = v;
        }
        if let Some(v) = lookup("DOORLOCK_CAMERA_INDICES") {
            match parse_indices(&v) {
                Some(indices) => self.camera_indices = indices,
                None => tracing::warn!(value = %v, "ignoring unparsable DOORLOCK_CAMERA_INDICES"),
            }
        }
        if let Some(v) = lookup("DOORLOCK_GALLERY_PATH") {
            self.gallery_path = PathBuf::from(v);
        }

        env_flag(&lookup, "DOORLOCK_CAMERA_SYNTHETIC", &mut self.camera_synthetic);
        env_flag(&lookup, "DOORLOCK_RECOGNITION_ENABLED", &mut self.recognition_enabled);
        env_flag(&lookup, "DOORLOCK_MOCK_HARDWARE", &mut self.mock_hardware);
        env_parsed(&lookup, "DOORLOCK_CYCLE_INTERVAL_MS", &mut self.cycle_interval_ms);
        env_parsed(&lookup, "DOORLOCK_PWM_CHIP", &mut self.pwm_chip);
        env_parsed(&lookup, "DOORLOCK_PWM_CHANNEL", &mut self.pwm_channel);
        env_parsed(&lookup, "DOORLOCK_STATUS_GPIO", &mut self.status_gpio);
        env_parsed(&lookup, "DOORLOCK_LOCKED_POSITION", &mut self.locked_position);
        env_parsed(&lookup, "DOORLOCK_UNLOCKED_POSITION", &mut self.unlocked_position);
        env_parsed(&lookup, "DOORLOCK_SETTLE_MS", &mut self.settle_ms);
        env_parsed(&lookup, "DOORLOCK_MATCH_THRESHOLD", &mut self.match_threshold);
        env_parsed(&lookup, "DOORLOCK_BUS", &mut self.bus);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cycle_interval_ms == 0 {
            return Err(ConfigError::Invalid("cycle_interval_ms must be positive".into()));
        }
        for (key, value) in [
            ("locked_position", self.locked_position),
            ("unlocked_position", self.unlocked_position),
            ("match_threshold", self.match_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{key} {value} outside [-1, 1]")));
            }
        }
        if self.camera_pipeline.trim().is_empty()
            && self.camera_indices.is_empty()
            && !self.camera_synthetic
        {
            return Err(ConfigError::Invalid("no camera source configured".into()));
        }
        Ok(())
    }

    /// Frame sources in fallback order: pipeline, V4L2 indices, then synthetic.
    pub fn source_candidates(&self) -> Vec<SourceCandidate> {
        let pipeline = Some(self.camera_pipeline.trim()).filter(|p| !p.is_empty());
        let mut candidates = camera_candidates(pipeline, &self.camera_indices);
        if self.camera_synthetic {
            candidates.push(SourceCandidate::synthetic(SYNTHETIC_SIZE.0, SYNTHETIC_SIZE.1));
        }
        candidates
    }

    pub fn calibration(&self) -> Calibration {
        Calibration {
            locked_position: self.locked_position,
            unlocked_position: self.unlocked_position,
            settle: Duration::from_millis(self.settle_ms),
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            interval: Duration::from_millis(self.cycle_interval_ms),
            recognition_enabled: self.recognition_enabled,
        }
    }
}

fn parse_indices(raw: &str) -> Option<Vec<u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}

fn env_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable override"),
        }
    }
}

fn env_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut bool) {
    if let Some(raw) = lookup(key) {
        *slot = !matches!(raw.trim(), "0" | "false" | "no" | "off");
    }
}
