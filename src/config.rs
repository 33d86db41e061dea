//! TOML configuration for flakeguard.
//!
//! Layered lookup: an explicit `--config` path, then the `FLAKEGUARD_CONFIG`
//! environment variable, then `./flakeguard.toml`, then compiled-in
//! defaults. Command-line flags override whatever the file says.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const CONFIG_ENV: &str = "FLAKEGUARD_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "flakeguard.toml";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("instability_threshold must be strictly between 0 and 1, got {0}")]
    Threshold(f64),

    #[error("window_runs must be at least 1")]
    EmptyWindow,

    #[error("logging.format must be \"pretty\" or \"json\", got \"{0}\"")]
    LogFormat(String),
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration file.
    ///
    /// Whichever file is selected (the explicit path, `FLAKEGUARD_CONFIG`, or
    /// `./flakeguard.toml` when present) must exist and parse; a broken file
    /// is an error rather than a silent fall back to default paths.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&env_path))
                .with_context(|| format!("{} points at an unusable config file", CONFIG_ENV));
        }

        Self::resolve_in(Path::new("."))
    }

    /// Look for `flakeguard.toml` in `dir`, falling back to defaults only when it is absent.
    pub fn resolve_in(dir: &Path) -> Result<Self> {
        let local = dir.join(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load(&local);
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Reject settings that would make classification meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.analysis.validate()?;
        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::LogFormat(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Failure rate at or above which a test counts as failing rather than flaky.
    pub instability_threshold: f64,
    /// Number of most recent CI runs considered per pass.
    pub window_runs: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            instability_threshold: 0.20,
            window_runs: 30,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.instability_threshold;
        if !(t > 0.0 && t < 1.0) {
            return Err(ConfigError::Threshold(t));
        }
        if self.window_runs == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// JSON-lines history of test outcomes.
    pub history: PathBuf,
    /// Quarantine file read by the test runner.
    pub quarantine: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            history: PathBuf::from(".flakeguard/history.jsonl"),
            quarantine: PathBuf::from(".flakeguard/quarantine.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Notify
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Chat webhook that receives `{"text": ...}` for new quarantines.
    pub webhook_url: Option<String>,
    /// Where to write the notification payload for a downstream step.
    pub payload_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// `pretty` for humans, `json` for log collectors.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
