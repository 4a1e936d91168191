//! Session configuration.
//!
//! [`ControlConfig`] bundles the per-component configs the way a pipeline
//! config bundles stage configs. Every field has a default, so a JSON file
//! only needs to mention what it overrides.
//!
//! ```json
//! {
//!   "cadence_ms": 250,
//!   "reps": { "enter_threshold": 0.6 },
//!   "classifier": { "x_bounds": { "lower": 200.0, "upper": 400.0 } }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationConfig;
use crate::classifier::ClassifierConfig;
use crate::error::ConfigError;
use crate::rep_counter::RepCounterConfig;
use crate::resistance::ResistanceConfig;
use crate::signal::{FilterConfig, MAX_WINDOW_SIZE};

/// Longest accepted control period (one minute).
pub const MAX_CADENCE_MS: u64 = 60_000;

/// Complete configuration of one control session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub filter: FilterConfig,
    pub calibration: CalibrationConfig,
    pub classifier: ClassifierConfig,
    pub reps: RepCounterConfig,
    pub resistance: ResistanceConfig,

    /// Period of one control cycle in milliseconds.
    pub cadence_ms: u64,

    /// Consecutive failed reads before the session stops.
    pub consecutive_failure_limit: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            calibration: CalibrationConfig::default(),
            classifier: ClassifierConfig::default(),
            reps: RepCounterConfig::default(),
            resistance: ResistanceConfig::default(),
            cadence_ms: 500,
            consecutive_failure_limit: 6, // ~3s at the default cadence
        }
    }
}

impl ControlConfig {
    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::FileRead`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is not valid JSON for this schema, and
    /// [`ConfigError::InvalidValue`] if validation fails.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ControlConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes this configuration as pretty-printed JSON, creating parent
    /// directories if necessary.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileRead {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks every component config and the loop timing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filter.window_size == 0 {
            return Err(ConfigError::invalid_value("filter.window_size", "must be > 0"));
        }
        if self.filter.window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::invalid_value(
                "filter.window_size",
                format!("must be <= {MAX_WINDOW_SIZE}"),
            ));
        }
        if !(self.filter.trend_threshold_deg >= 0.0) {
            return Err(ConfigError::invalid_value(
                "filter.trend_threshold_deg",
                "must be >= 0",
            ));
        }

        self.calibration.validate()?;
        self.classifier.validate()?;
        self.reps.validate()?;
        self.resistance.validate()?;

        if self.cadence_ms == 0 {
            return Err(ConfigError::invalid_value("cadence_ms", "must be > 0"));
        }
        if self.cadence_ms > MAX_CADENCE_MS {
            return Err(ConfigError::invalid_value(
                "cadence_ms",
                format!("must be <= {MAX_CADENCE_MS}"),
            ));
        }
        if self.consecutive_failure_limit == 0 {
            return Err(ConfigError::invalid_value(
                "consecutive_failure_limit",
                "must be > 0",
            ));
        }
        Ok(())
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }
}
