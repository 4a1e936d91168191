//! Repetition counting over angular velocity.
//!
//! Two-state hysteresis machine driven once per control cycle:
//!
//! ```text
//!         v > enter
//!  Idle ─────────────▶ InProgress
//!   ▲                      │
//!   └──────────────────────┘
//!         v < exit   (rep_count += 1)
//! ```
//!
//! The gap between the enter and exit thresholds absorbs sensor noise, so raw
//! velocity is fed in directly.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::types::{RepCounterState, RepEvent, RepPhase};

/// Hysteresis thresholds in deg/s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepCounterConfig {
    /// Velocity above which an idle limb starts a repetition.
    pub enter_threshold: f32,
    /// Velocity below which a repetition completes.
    pub exit_threshold: f32,
}

impl Default for RepCounterConfig {
    fn default() -> Self {
        Self {
            enter_threshold: 0.5,
            exit_threshold: 0.1,
        }
    }
}

impl RepCounterConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !(self.exit_threshold >= 0.0) {
            return Err(ConfigError::invalid_value("reps.exit_threshold", "must be >= 0"));
        }
        if !(self.enter_threshold > self.exit_threshold) {
            return Err(ConfigError::invalid_value(
                "reps.enter_threshold",
                "must be greater than exit_threshold",
            ));
        }
        Ok(())
    }
}

/// Counts completed repetitions.
///
/// `rep_count` never decreases; a new session creates a new counter.
#[derive(Debug, Clone)]
pub struct RepCounter {
    config: RepCounterConfig,
    phase: RepPhase,
    rep_count: u64,
    started_ms: u64,
    last_event: Option<RepEvent>,
}

impl RepCounter {
    pub fn new(config: RepCounterConfig) -> Self {
        Self {
            config,
            phase: RepPhase::Idle,
            rep_count: 0,
            started_ms: 0,
            last_event: None,
        }
    }

    /// Feeds one cycle's angular velocity.
    ///
    /// Returns the completed repetition on the `InProgress -> Idle` edge.
    /// Non-finite velocities are self-loops.
    pub fn update(&mut self, angular_velocity_y: f32, timestamp_ms: u64) -> Option<RepEvent> {
        if !angular_velocity_y.is_finite() {
            return None;
        }

        match self.phase {
            RepPhase::Idle if angular_velocity_y > self.config.enter_threshold => {
                self.phase = RepPhase::InProgress;
                self.started_ms = timestamp_ms;
                None
            }
            RepPhase::InProgress if angular_velocity_y < self.config.exit_threshold => {
                self.phase = RepPhase::Idle;
                self.rep_count += 1;
                let event = RepEvent {
                    rep_count: self.rep_count,
                    started_ms: self.started_ms,
                    completed_ms: timestamp_ms,
                };
                info!(
                    rep = event.rep_count,
                    duration_ms = event.duration_ms(),
                    "repetition complete"
                );
                self.last_event = Some(event);
                Some(event)
            }
            _ => None,
        }
    }

    pub fn state(&self) -> RepCounterState {
        RepCounterState {
            phase: self.phase,
            rep_count: self.rep_count,
        }
    }

    pub fn rep_count(&self) -> u64 {
        self.rep_count
    }

    pub fn phase(&self) -> RepPhase {
        self.phase
    }

    /// Most recently completed repetition.
    pub fn last_event(&self) -> Option<RepEvent> {
        self.last_event
    }
}

impl Default for RepCounter {
    fn default() -> Self {
        Self::new(RepCounterConfig::default())
    }
}
