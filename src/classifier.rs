//! Posture classification against the calibrated range of motion.
//!
//! Two concerns, one primitive:
//! - The tracked axis is normalised into the calibrated range and located in
//!   the resistance bands (closed interval, edges count as inside).
//! - X and Z are checked against neutral bounds (open interval); leaving
//!   either raises the bad-form flag next to the tracked-axis verdict.
//!
//! Both are answered by [`Band::locate`].
//!
//! The velocity safety override wins over every band result.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{clamp_unit, CalibrationProfile, FilteredOrientation, PostureVerdict};

/// Where a value sits relative to a [`Band`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandPosition {
    Below,
    Within,
    Above,
}

/// An interval with either open or closed edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    lower: f32,
    upper: f32,
    inclusive: bool,
}

impl Band {
    /// Interval `(lower, upper)`; values on an edge are outside.
    pub fn open(lower: f32, upper: f32) -> Self {
        Self {
            lower,
            upper,
            inclusive: false,
        }
    }

    /// Interval `[lower, upper]`; values on an edge are inside.
    pub fn closed(lower: f32, upper: f32) -> Self {
        Self {
            lower,
            upper,
            inclusive: true,
        }
    }

    /// Locates `value` in the band. NaN is never `Within` and reports `Below`.
    pub fn locate(&self, value: f32) -> BandPosition {
        if value.is_nan() {
            return BandPosition::Below;
        }
        let below = if self.inclusive {
            value < self.lower
        } else {
            value <= self.lower
        };
        if below {
            return BandPosition::Below;
        }
        let above = if self.inclusive {
            value > self.upper
        } else {
            value >= self.upper
        };
        if above {
            BandPosition::Above
        } else {
            BandPosition::Within
        }
    }

    pub fn contains(&self, value: f32) -> bool {
        self.locate(value) == BandPosition::Within
    }

    /// Midpoint of the band.
    pub fn center(&self) -> f32 {
        (self.lower + self.upper) / 2.0
    }

    pub fn lower(&self) -> f32 {
        self.lower
    }

    pub fn upper(&self) -> f32 {
        self.upper
    }
}

/// A `lower`/`upper` pair as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandLimits {
    pub lower: f32,
    pub upper: f32,
}

impl BandLimits {
    pub fn new(lower: f32, upper: f32) -> Self {
        Self { lower, upper }
    }

    fn is_ordered(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite() && self.upper > self.lower
    }
}

/// Configuration for posture classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Normalised positions splitting Under / WithinRange / Over.
    pub resistance_bands: BandLimits,

    /// Angular velocity magnitude (deg/s) above which the verdict is `TooFast`.
    pub max_velocity_threshold: f32,

    /// Half-width in degrees of the X/Z bounds around a neutral baseline.
    pub form_tolerance_deg: f32,

    /// Fixed X bounds, used when the profile has no neutral baseline.
    pub x_bounds: Option<BandLimits>,

    /// Fixed Z bounds, used when the profile has no neutral baseline.
    pub z_bounds: Option<BandLimits>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            resistance_bands: BandLimits::new(0.3, 0.7),
            max_velocity_threshold: 2.5,
            form_tolerance_deg: 30.0,
            x_bounds: None,
            z_bounds: None,
        }
    }
}

impl ClassifierConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let bands = self.resistance_bands;
        if !(bands.lower >= 0.0 && bands.upper <= 1.0 && bands.is_ordered()) {
            return Err(ConfigError::invalid_value(
                "classifier.resistance_bands",
                "must satisfy 0 <= lower < upper <= 1",
            ));
        }
        if !(self.max_velocity_threshold > 0.0) {
            return Err(ConfigError::invalid_value(
                "classifier.max_velocity_threshold",
                "must be > 0",
            ));
        }
        if !(self.form_tolerance_deg > 0.0) {
            return Err(ConfigError::invalid_value(
                "classifier.form_tolerance_deg",
                "must be > 0",
            ));
        }
        for (field, bounds) in [
            ("classifier.x_bounds", self.x_bounds),
            ("classifier.z_bounds", self.z_bounds),
        ] {
            if let Some(bounds) = bounds {
                if !bounds.is_ordered() {
                    return Err(ConfigError::invalid_value(field, "upper must exceed lower"));
                }
            }
        }
        Ok(())
    }
}

/// Per-axis result of the neutral-bounds check. `None` means unchecked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormCheck {
    pub x: Option<BandPosition>,
    pub z: Option<BandPosition>,
}

impl FormCheck {
    /// True when X or Z lies outside its bounds.
    pub fn is_bad(&self) -> bool {
        [self.x, self.z]
            .iter()
            .any(|p| matches!(p, Some(BandPosition::Below | BandPosition::Above)))
    }
}

/// Outcome of classifying one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub verdict: PostureVerdict,
    /// Normalised position `t` in [0, 1], when a reading and valid profile exist.
    pub position: Option<f32>,
    pub form: FormCheck,
}

impl Classification {
    /// A cycle with nothing to classify.
    pub fn calibrating() -> Self {
        Self {
            verdict: PostureVerdict::Calibrating,
            position: None,
            form: FormCheck::default(),
        }
    }

    pub fn with_form(self, form: FormCheck) -> Self {
        Self { form, ..self }
    }
}

/// Stateless posture classifier.
#[derive(Debug, Clone)]
pub struct RangeClassifier {
    config: ClassifierConfig,
    bands: Band,
}

impl RangeClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let bands = Band::closed(config.resistance_bands.lower, config.resistance_bands.upper);
        Self { config, bands }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// The resistance bands as a closed interval over `t`.
    pub fn bands(&self) -> Band {
        self.bands
    }

    /// Classifies a filtered tracked-axis average.
    ///
    /// Priority: an invalid profile gives `Calibrating`; then an excessive
    /// (or non-finite) angular velocity gives `TooFast` whatever the angle;
    /// then a missing or non-finite average gives `Calibrating`; otherwise
    /// the resistance band of `t` decides. The returned form check is
    /// unchecked; see [`check_form`](Self::check_form).
    pub fn classify(
        &self,
        avg: Option<f32>,
        angular_velocity_y: f32,
        profile: &CalibrationProfile,
    ) -> Classification {
        if !profile.is_valid() {
            return Classification::calibrating();
        }
        let position = avg
            .filter(|a| a.is_finite())
            .map(|a| clamp_unit((a - profile.min_flexion()) / profile.span()));

        if self.exceeds_velocity_limit(angular_velocity_y) {
            return Classification {
                verdict: PostureVerdict::TooFast,
                position,
                form: FormCheck::default(),
            };
        }
        let Some(position) = position else {
            return Classification::calibrating();
        };

        let verdict = match self.bands.locate(position) {
            BandPosition::Below => PostureVerdict::Under,
            BandPosition::Within => PostureVerdict::WithinRange,
            BandPosition::Above => PostureVerdict::Over,
        };

        Classification {
            verdict,
            position: Some(position),
            form: FormCheck::default(),
        }
    }

    /// Checks X and Z against their neutral bounds.
    ///
    /// Bounds are `neutral ± form_tolerance_deg` when the profile carries a
    /// neutral baseline, else the configured fixed bounds, else unchecked.
    pub fn check_form(
        &self,
        orientation: &FilteredOrientation,
        profile: &CalibrationProfile,
    ) -> FormCheck {
        let (x_band, z_band) = match profile.neutral() {
            Some(neutral) => {
                let tol = self.config.form_tolerance_deg;
                (
                    Some(Band::open(neutral.x - tol, neutral.x + tol)),
                    Some(Band::open(neutral.z - tol, neutral.z + tol)),
                )
            }
            None => (
                self.config.x_bounds.map(|b| Band::open(b.lower, b.upper)),
                self.config.z_bounds.map(|b| Band::open(b.lower, b.upper)),
            ),
        };

        FormCheck {
            x: x_band.map(|band| band.locate(orientation.x)),
            z: z_band.map(|band| band.locate(orientation.z)),
        }
    }

    fn exceeds_velocity_limit(&self, angular_velocity_y: f32) -> bool {
        !angular_velocity_y.is_finite()
            || angular_velocity_y.abs() > self.config.max_velocity_threshold
    }
}
