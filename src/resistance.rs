//! Mapping from posture classification to actuator commands.
//!
//! | Verdict       | Servo       | Motor    | Speed                     |
//! |---------------|-------------|----------|---------------------------|
//! | `Under`       | `servo_min` | Forward  | distance from band centre |
//! | `WithinRange` | `servo_mid` | Stop     | 0                         |
//! | `Over`        | `servo_max` | Backward | distance from band centre |
//! | `TooFast`     | `servo_mid` | Stop     | 0, resistance forced to 0 |
//! | `Calibrating` | `servo_mid` | Stop     | 0, resistance 0           |
//!
//! Every command leaves through [`ActuatorCommand::clamped`].

use serde::{Deserialize, Serialize};

use crate::classifier::{Band, Classification};
use crate::error::ConfigError;
use crate::types::{clamp_unit, ActuatorCommand, MotorDirection, PostureVerdict};

/// Servo positions for the three resistance settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResistanceConfig {
    pub servo_min: f32,
    pub servo_mid: f32,
    pub servo_max: f32,
}

impl Default for ResistanceConfig {
    fn default() -> Self {
        Self {
            servo_min: -1.0,
            servo_mid: 0.0,
            servo_max: 1.0,
        }
    }
}

impl ResistanceConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let ordered = -1.0 <= self.servo_min
            && self.servo_min <= self.servo_mid
            && self.servo_mid <= self.servo_max
            && self.servo_max <= 1.0
            && self.servo_min < self.servo_max;
        if !ordered {
            return Err(ConfigError::invalid_value(
                "resistance",
                "servo positions must satisfy -1 <= min <= mid <= max <= 1 with min < max",
            ));
        }
        Ok(())
    }
}

/// A command plus the normalised resistance it represents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResistanceOutput {
    pub command: ActuatorCommand,
    /// Resistance in [0, 1].
    pub resistance: f32,
}

/// Converts classifications into actuator commands.
#[derive(Debug, Clone)]
pub struct ResistanceMapper {
    config: ResistanceConfig,
    bands: Band,
}

impl ResistanceMapper {
    /// `bands` are the classifier's resistance bands over `t`.
    pub fn new(config: ResistanceConfig, bands: Band) -> Self {
        Self { config, bands }
    }

    /// Servo at its midpoint, motor stopped.
    pub fn neutral(&self) -> ActuatorCommand {
        ActuatorCommand::neutral(self.config.servo_mid).clamped(self.config.servo_mid)
    }

    /// True when `command` is this mapper's neutral command.
    pub fn is_neutral(&self, command: &ActuatorCommand) -> bool {
        *command == self.neutral()
    }

    pub fn map(&self, classification: &Classification) -> ResistanceOutput {
        let position = match (classification.verdict, classification.position) {
            (PostureVerdict::Calibrating | PostureVerdict::TooFast, _) | (_, None) => {
                return ResistanceOutput {
                    command: self.neutral(),
                    resistance: 0.0,
                };
            }
            (_, Some(t)) => clamp_unit(t),
        };

        let command = match classification.verdict {
            PostureVerdict::Under => ActuatorCommand {
                servo_position: self.config.servo_min,
                motor_direction: MotorDirection::Forward,
                motor_speed: self.speed_for(position),
            },
            PostureVerdict::Over => ActuatorCommand {
                servo_position: self.config.servo_max,
                motor_direction: MotorDirection::Backward,
                motor_speed: self.speed_for(position),
            },
            _ => self.neutral(),
        };

        ResistanceOutput {
            command: command.clamped(self.config.servo_mid),
            resistance: position,
        }
    }

    /// Distance from the band centre, scaled so either end of [0, 1] is full speed.
    fn speed_for(&self, position: f32) -> f32 {
        let center = clamp_unit(self.bands.center());
        let reach = center.max(1.0 - center);
        if reach <= 0.0 {
            return 0.0;
        }
        clamp_unit((position - center).abs() / reach)
    }
}
