//! Error types for the control core.
//!
//! ```text
//! ReadFailure      (sensor boundary, transient, per cycle)
//! ControlError     (session control)
//! └── ConfigError  (validation / file loading)
//! ```
//!
//! A `ReadFailure` never escapes the control loop; it is folded into the
//! status snapshot as a fault flag. Only session-control operations return
//! `ControlError`.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::SessionState;

/// Convenient `Result` alias used by session-level operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// A single failed poll of the sensor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadFailure {
    /// The sensor returned nothing this poll.
    #[error("sensor returned no data")]
    NoData,

    /// Fewer axes than expected were reported.
    #[error("incomplete sample: {axes} of 3 axes reported")]
    Incomplete { axes: usize },

    /// Transport-level failure (I2C/serial).
    #[error("sensor bus error: {0}")]
    Bus(String),
}

/// Why a calibration protocol was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CalibrationShortfall {
    #[error("{collected} valid samples, {required} required")]
    TooFewSamples { collected: usize, required: usize },

    /// Every sample reported the same angle.
    #[error("no movement detected (all samples at {angle:.2} deg)")]
    NoMovement { angle: f32 },
}

/// Configuration validation or loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has a value that violates its constraints.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// The configuration file could not be read or written.
    #[error("cannot access config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for this schema.
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level error for session control.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The sensor failed too many consecutive cycles.
    #[error("sensor unresponsive after {failures} consecutive failed reads")]
    SensorUnresponsive { failures: u32 },

    /// A calibration protocol could not produce usable limits.
    #[error("{protocol} calibration failed: {shortfall}")]
    CalibrationFailed {
        protocol: &'static str,
        shortfall: CalibrationShortfall,
    },

    /// Calibration was interrupted by a stop signal.
    #[error("calibration cancelled by stop signal")]
    CalibrationCancelled,

    /// Tracking requested without a valid calibration profile.
    #[error("no valid calibration profile; calibrate before tracking")]
    NotCalibrated,

    /// Rejected configuration or directly supplied limits.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    /// The requested action is not allowed from the current session state.
    #[error("cannot {action} while {from:?}")]
    InvalidTransition {
        from: SessionState,
        action: &'static str,
    },

    /// The session has stopped; a new session is required.
    #[error("session stopped")]
    SessionStopped,

    /// The control worker thread is no longer accepting requests.
    #[error("control worker is not running")]
    WorkerUnavailable,
}

impl ControlError {
    /// True for errors after which the session cannot continue.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            ControlError::SensorUnresponsive { .. }
                | ControlError::CalibrationCancelled
                | ControlError::SessionStopped
                | ControlError::WorkerUnavailable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ControlError::CalibrationFailed {
            protocol: "range",
            shortfall: CalibrationShortfall::TooFewSamples {
                collected: 4,
                required: 5,
            },
        };
        assert_eq!(
            err.to_string(),
            "range calibration failed: 4 valid samples, 5 required"
        );

        let err = ControlError::InvalidTransition {
            from: SessionState::Stopped,
            action: "start calibration",
        };
        assert_eq!(err.to_string(), "cannot start calibration while Stopped");
    }

    #[test]
    fn test_config_error_converts() {
        let err: ControlError = ConfigError::invalid_value("window_size", "must be > 0").into();
        assert!(matches!(err, ControlError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("window_size"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ControlError::SensorUnresponsive { failures: 6 }.is_session_fatal());
        assert!(!ControlError::NotCalibrated.is_session_fatal());
        assert!(!ControlError::CalibrationFailed {
            protocol: "neutral",
            shortfall: CalibrationShortfall::NoMovement { angle: 0.0 },
        }
        .is_session_fatal());
    }
}
