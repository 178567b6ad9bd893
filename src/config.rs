use anyhow::{Context, Result};
use findme_vision::{DetectorSettings, ModelPaths};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::matcher::MatchStrategy;
use crate::metric::DistanceMetric;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FINDME_CONFIG_PATH").unwrap_or("/usr/local/etc/findme/config.toml"))
});

pub const DEFAULT_TOLERANCE: f32 = 0.50;
pub const DEFAULT_MIN_FACE_SIZE: u32 = 20;

/// On-disk configuration. Every field has a default so partial files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tolerance: f32,
    pub min_face_size: u32,
    pub metric: DistanceMetric,
    pub strategy: MatchStrategy,
    pub workers: usize,
    /// 0 disables the per-candidate timeout.
    pub candidate_timeout_secs: u64,
    pub detector: DetectorConfig,
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            metric: DistanceMetric::Cosine,
            strategy: MatchStrategy::EarlyExit,
            workers: 1,
            candidate_timeout_secs: 30,
            detector: DetectorConfig::default(),
            models: ModelsConfig::default(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let s = DetectorSettings::default();
        Self {
            score_threshold: s.score_threshold,
            nms_threshold: s.nms_threshold,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let p = ModelPaths::default();
        Self {
            detector: p.detector,
            recognizer: p.recognizer,
        }
    }
}

impl Config {
    /// Validate and freeze the matching parameters for one run.
    pub fn run_configuration(&self) -> Result<RunConfiguration, ConfigError> {
        let run = RunConfiguration {
            tolerance: self.tolerance,
            min_face_size: self.min_face_size,
            metric: self.metric,
            strategy: self.strategy,
            workers: self.workers,
            candidate_timeout: (self.candidate_timeout_secs > 0)
                .then(|| Duration::from_secs(self.candidate_timeout_secs)),
        };
        run.validate()?;
        Ok(run)
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            score_threshold: self.detector.score_threshold,
            nms_threshold: self.detector.nms_threshold,
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.models.detector.clone(),
            recognizer: self.models.recognizer.clone(),
        }
    }
}

/// Parameters every candidate in a run is evaluated under.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunConfiguration {
    /// Maximum distance still considered the same person, in [0, 1].
    pub tolerance: f32,
    /// Faces narrower or shorter than this are ignored.
    pub min_face_size: u32,
    pub metric: DistanceMetric,
    pub strategy: MatchStrategy,
    /// Candidates processed concurrently; 1 scans on the calling thread.
    pub workers: usize,
    pub candidate_timeout: Option<Duration>,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            metric: DistanceMetric::Cosine,
            strategy: MatchStrategy::EarlyExit,
            workers: 1,
            candidate_timeout: None,
        }
    }
}

impl RunConfiguration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.tolerance) {
            return Err(ConfigError::ToleranceOutOfRange(self.tolerance));
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data).with_context(|| format!("writing config {}", path.display()))?;
    Ok(())
}
