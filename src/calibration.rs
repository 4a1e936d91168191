//! Guided calibration of the wearer's range of motion.
//!
//! Two protocols, run on the control worker as a blocking sub-phase:
//! - **Range**: sample the tracked axis while the wearer curls; the profile's
//!   limits are the minimum and maximum of the valid readings.
//! - **Neutral baseline**: sample all three axes with the limb at rest; the
//!   baseline is the per-axis mean.
//!
//! Each protocol needs at least [`MIN_CALIBRATION_SAMPLES`] valid readings.
//! A failed or cancelled run returns an error and produces nothing, so a
//! previously installed profile is never partially overwritten.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::devices::{Pacer, SensorReader, StopSignal};
use crate::error::{CalibrationShortfall, ConfigError, ControlError, ControlResult};
use crate::signal::{FilterConfig, RollingFilter};
use crate::types::{
    Axis, CalibrationProfile, FlexionRange, NeutralBaseline, SensorSample, MIN_CALIBRATION_SAMPLES,
};

/// Largest accepted number of samples per protocol.
pub const MAX_CALIBRATION_SAMPLES: usize = 1_000;

/// Which calibration protocols a deployment runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationMode {
    /// Range of motion only.
    Range,
    /// Neutral baseline only; flexion limits come from `fallback_range`.
    NeutralBaseline,
    /// Neutral baseline first, then range of motion.
    Both,
}

/// Configuration for calibration sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub mode: CalibrationMode,

    /// Axis whose range of motion is tracked (the curl axis).
    pub tracked_axis: Axis,

    /// Samples attempted per protocol.
    pub sample_count: usize,

    /// Valid samples required per protocol. Never below
    /// [`MIN_CALIBRATION_SAMPLES`].
    pub min_valid_samples: usize,

    /// Delay between samples in milliseconds.
    pub sample_interval_ms: u64,

    /// Pause before the first sample of each protocol, giving the wearer
    /// time to get into position.
    pub lead_in_ms: u64,

    /// Flexion limits used when only the neutral baseline is sampled.
    pub fallback_range: Option<FlexionRange>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            mode: CalibrationMode::Range,
            tracked_axis: Axis::Y,
            sample_count: 10,
            min_valid_samples: MIN_CALIBRATION_SAMPLES,
            sample_interval_ms: 500,
            lead_in_ms: 2000,
            fallback_range: None,
        }
    }
}

impl CalibrationConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.min_valid_samples < MIN_CALIBRATION_SAMPLES {
            return Err(ConfigError::invalid_value(
                "calibration.min_valid_samples",
                format!("must be >= {MIN_CALIBRATION_SAMPLES}"),
            ));
        }
        if self.sample_count < self.min_valid_samples {
            return Err(ConfigError::invalid_value(
                "calibration.sample_count",
                "must be >= min_valid_samples",
            ));
        }
        if self.sample_count > MAX_CALIBRATION_SAMPLES {
            return Err(ConfigError::invalid_value(
                "calibration.sample_count",
                format!("must be <= {MAX_CALIBRATION_SAMPLES}"),
            ));
        }
        if let Some(range) = self.fallback_range {
            if !(range.min.is_finite() && range.max.is_finite() && range.max > range.min) {
                return Err(ConfigError::invalid_value(
                    "calibration.fallback_range",
                    "max must be greater than min",
                ));
            }
        } else if self.mode == CalibrationMode::NeutralBaseline {
            return Err(ConfigError::invalid_value(
                "calibration.fallback_range",
                "required when mode is NeutralBaseline",
            ));
        }
        Ok(())
    }
}

/// Result of the range-of-motion protocol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeCalibration {
    pub min_flexion: f32,
    pub max_flexion: f32,
    /// Valid readings that contributed.
    pub samples: usize,
}

/// Result of the neutral-baseline protocol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeutralCalibration {
    pub baseline: NeutralBaseline,
    pub samples: usize,
}

/// Runs calibration protocols against a sensor.
#[derive(Debug, Clone)]
pub struct CalibrationManager {
    config: CalibrationConfig,
    filter_config: FilterConfig,
}

impl CalibrationManager {
    /// `filter_config` supplies the axis corrections so the neutral baseline
    /// lives in the same frame as the filtered averages it is compared with.
    pub fn new(config: CalibrationConfig, filter_config: FilterConfig) -> Self {
        Self {
            config,
            filter_config,
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Runs the configured protocol(s) and builds a profile.
    ///
    /// Fails atomically: either every protocol succeeds and a valid profile
    /// is returned, or an error is returned and nothing is produced.
    pub fn run(
        &self,
        reader: &mut dyn SensorReader,
        pacer: &mut dyn Pacer,
        stop: &StopSignal,
    ) -> ControlResult<CalibrationProfile> {
        let profile = match self.config.mode {
            CalibrationMode::Range => {
                let range = self.calibrate_range(reader, pacer, stop)?;
                CalibrationProfile::sampled(range.min_flexion, range.max_flexion, None, range.samples)
            }
            CalibrationMode::NeutralBaseline => {
                let neutral = self.calibrate_neutral(reader, pacer, stop)?;
                let range = self.config.fallback_range.ok_or_else(|| {
                    ConfigError::invalid_value("calibration.fallback_range", "missing")
                })?;
                CalibrationProfile::manual(range, Some(neutral.baseline)).ok_or_else(|| {
                    ConfigError::invalid_value("calibration.fallback_range", "max must exceed min")
                })?
            }
            CalibrationMode::Both => {
                let neutral = self.calibrate_neutral(reader, pacer, stop)?;
                let range = self.calibrate_range(reader, pacer, stop)?;
                CalibrationProfile::sampled(
                    range.min_flexion,
                    range.max_flexion,
                    Some(neutral.baseline),
                    range.samples,
                )
            }
        };

        info!(
            min_flexion = profile.min_flexion(),
            max_flexion = profile.max_flexion(),
            neutral = ?profile.neutral(),
            "calibration complete"
        );
        Ok(profile)
    }

    /// Range-of-motion protocol over the tracked axis.
    pub fn calibrate_range(
        &self,
        reader: &mut dyn SensorReader,
        pacer: &mut dyn Pacer,
        stop: &StopSignal,
    ) -> ControlResult<RangeCalibration> {
        let axis = self.config.tracked_axis;
        info!(?axis, samples = self.config.sample_count, "range calibration: perform full curls");

        let mut values = Vec::new();
        self.collect(reader, pacer, stop, |sample| {
            let value = sample.angle(axis);
            if value.is_finite() {
                values.push(value);
            }
        })?;

        self.require_samples("range", values.len())?;

        let min_flexion = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max_flexion = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if max_flexion <= min_flexion {
            warn!(angle = min_flexion, "range calibration saw no movement");
            return Err(ControlError::CalibrationFailed {
                protocol: "range",
                shortfall: CalibrationShortfall::NoMovement { angle: min_flexion },
            });
        }

        Ok(RangeCalibration {
            min_flexion,
            max_flexion,
            samples: values.len(),
        })
    }

    /// Neutral-baseline protocol over all three axes.
    pub fn calibrate_neutral(
        &self,
        reader: &mut dyn SensorReader,
        pacer: &mut dyn Pacer,
        stop: &StopSignal,
    ) -> ControlResult<NeutralCalibration> {
        info!(samples = self.config.sample_count, "neutral calibration: hold the limb at rest");

        let window = FilterConfig {
            window_size: self.config.sample_count.max(1),
            ..self.filter_config.clone()
        };
        let mut filter = RollingFilter::new(window);
        let mut triples = 0usize;
        self.collect(reader, pacer, stop, |sample| {
            let finite = Axis::ALL.iter().all(|&axis| sample.angle(axis).is_finite());
            if finite {
                filter.push_sample(sample);
                triples += 1;
            }
        })?;

        self.require_samples("neutral", triples)?;

        // Non-empty after the sample check.
        let orientation = filter.orientation().ok_or(ControlError::CalibrationFailed {
            protocol: "neutral",
            shortfall: CalibrationShortfall::TooFewSamples {
                collected: 0,
                required: self.config.min_valid_samples,
            },
        })?;

        Ok(NeutralCalibration {
            baseline: NeutralBaseline {
                x: orientation.x,
                y: orientation.y,
                z: orientation.z,
            },
            samples: triples,
        })
    }

    // =========================================================================
    // PRIVATE METHODS
    // =========================================================================

    /// Polls the reader `sample_count` times, pacing between polls and
    /// checking the stop signal before each wait and each read.
    fn collect<F>(
        &self,
        reader: &mut dyn SensorReader,
        pacer: &mut dyn Pacer,
        stop: &StopSignal,
        mut record: F,
    ) -> ControlResult<()>
    where
        F: FnMut(&SensorSample),
    {
        if self.config.lead_in_ms > 0 {
            check_stop(stop)?;
            pacer.pause(Duration::from_millis(self.config.lead_in_ms));
        }

        let interval = Duration::from_millis(self.config.sample_interval_ms);
        for attempt in 0..self.config.sample_count {
            check_stop(stop)?;
            match reader.read() {
                Ok(sample) => {
                    debug!(attempt, y = sample.y_angle, "calibration sample");
                    record(&sample);
                }
                Err(failure) => {
                    warn!(attempt, %failure, "calibration sample missed");
                }
            }
            if attempt + 1 < self.config.sample_count {
                pacer.pause(interval);
            }
        }
        check_stop(stop)
    }

    fn require_samples(&self, protocol: &'static str, collected: usize) -> ControlResult<()> {
        let required = self.config.min_valid_samples;
        if collected < required {
            warn!(protocol, collected, required, "calibration failed: not enough valid samples");
            return Err(ControlError::CalibrationFailed {
                protocol,
                shortfall: CalibrationShortfall::TooFewSamples { collected, required },
            });
        }
        Ok(())
    }
}

fn check_stop(stop: &StopSignal) -> ControlResult<()> {
    if stop.is_raised() {
        info!("calibration cancelled");
        return Err(ControlError::CalibrationCancelled);
    }
    Ok(())
}
