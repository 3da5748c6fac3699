//! Detector configuration
//!
//! Loaded from TOML; every key is optional:
//!
//! ```toml
//! poll_interval_ms = 100
//! debounce_window_ms = 250
//! stability_threshold = 2
//! native_events = true
//! ignore_temp_files = true
//! ignore_patterns = ["*.log", "cache/"]
//!
//! [operations]
//! time_window_ms = 500
//! min_confidence = 0.7
//! min_events_for_complex = 3
//! ```

use ignore::gitignore::GitignoreBuilder;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid ignore pattern: {0}")]
    Pattern(#[from] ignore::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tuning for a [`crate::FileOperationDetector`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Sampling period of the poll loop
    pub poll_interval_ms: u64,

    /// Quiet period after the last change before an event is emitted
    pub debounce_window_ms: u64,

    /// Consecutive unchanged poll samples before a file counts as complete
    pub stability_threshold: u32,

    /// Subscribe to OS notifications as a low-latency hint source
    pub native_events: bool,

    /// Skip editor and atomic-writer temp files in directory watches
    pub ignore_temp_files: bool,

    /// Gitignore-style patterns excluded from directory watches
    pub ignore_patterns: Vec<String>,

    /// Operation pattern recognition
    pub operations: OperationConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            debounce_window_ms: 250,
            stability_threshold: 2,
            native_events: true,
            ignore_temp_files: true,
            ignore_patterns: Vec::new(),
            operations: OperationConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.stability_threshold == 0 {
            return Err(ConfigError::Invalid(
                "stability_threshold must be at least 1".to_string(),
            ));
        }
        if !self.ignore_patterns.is_empty() {
            let mut builder = GitignoreBuilder::new("/");
            for pattern in &self.ignore_patterns {
                builder.add_line(None, pattern)?;
            }
            builder.build()?;
        }
        self.operations.validate()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }
}

/// Tuning for [`crate::OperationDetector`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationConfig {
    /// Largest gap between two notifications of the same operation
    pub time_window_ms: u64,

    /// Matches below this confidence are discarded
    pub min_confidence: f32,

    /// Fewest notifications that can form a batch update
    pub min_events_for_complex: usize,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            time_window_ms: 500,
            min_confidence: 0.7,
            min_events_for_complex: 3,
        }
    }
}

impl OperationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.time_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "operations.time_window_ms must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::Invalid(
                "operations.min_confidence must be between 0 and 1".to_string(),
            ));
        }
        if self.min_events_for_complex < 2 {
            return Err(ConfigError::Invalid(
                "operations.min_events_for_complex must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    pub fn time_window(&self) -> Duration {
        Duration::from_millis(self.time_window_ms)
    }
}
