//! Synthetic devices for tests, demos and the CLI.
//!
//! Nothing here touches hardware: [`CurlSimulator`] produces a deterministic
//! curl motion with optional dropouts, [`ScriptedSensor`] replays queued
//! results, and the actuators record or log what they are told.

use std::collections::{BTreeSet, VecDeque};
use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::devices::{Actuator, Pacer, SensorReader, StopSignal};
use crate::error::ReadFailure;
use crate::types::{ActuatorCommand, SensorSample};

// ============================================================================
// SENSORS
// ============================================================================

/// Replays a fixed queue of read results, then reports `NoData` forever.
#[derive(Debug, Default)]
pub struct ScriptedSensor {
    script: VecDeque<Result<SensorSample, ReadFailure>>,
    reads: usize,
}

impl ScriptedSensor {
    pub fn new(script: Vec<Result<SensorSample, ReadFailure>>) -> Self {
        Self {
            script: script.into(),
            reads: 0,
        }
    }

    pub fn from_samples(samples: impl IntoIterator<Item = SensorSample>) -> Self {
        Self::new(samples.into_iter().map(Ok).collect())
    }

    /// Appends more results to the end of the script.
    pub fn extend(&mut self, results: impl IntoIterator<Item = Result<SensorSample, ReadFailure>>) {
        self.script.extend(results);
    }

    /// Number of `read` calls so far, including failed ones.
    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl SensorReader for ScriptedSensor {
    fn read(&mut self) -> Result<SensorSample, ReadFailure> {
        self.reads += 1;
        self.script.pop_front().unwrap_or(Err(ReadFailure::NoData))
    }
}

/// Shape of the synthetic curl motion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurlProfile {
    /// Tracked-axis angle at full extension, in degrees.
    pub extension_deg: f32,
    /// Tracked-axis angle at full flexion, in degrees.
    pub flexion_deg: f32,
    /// Reads per full curl (up and back down).
    pub period_reads: u32,
    /// Peak angular velocity reported mid-curl.
    pub peak_velocity: f32,
    /// Resting X angle.
    pub rest_x: f32,
    /// Resting Z angle.
    pub rest_z: f32,
    /// Timestamp increment per read in milliseconds.
    pub step_ms: u64,
}

impl Default for CurlProfile {
    fn default() -> Self {
        Self {
            extension_deg: -80.0,
            flexion_deg: 0.0,
            period_reads: 12, // one curl every 6s at 0.5s cadence
            peak_velocity: 1.5,
            rest_x: 300.0,
            rest_z: 60.0,
            step_ms: 500,
        }
    }
}

/// Deterministic curl motion generator.
///
/// Read `n` reports the tracked angle at phase `n / period_reads` of a
/// cosine curl starting at full extension, and a signed angular velocity that
/// is positive while flexing.
#[derive(Debug, Clone)]
pub struct CurlSimulator {
    profile: CurlProfile,
    reads: u64,
    dropouts: BTreeSet<u64>,
    fail_from: Option<u64>,
    velocity_spikes: BTreeSet<u64>,
    drift_z: f32,
}

impl CurlSimulator {
    pub fn new(profile: CurlProfile) -> Self {
        Self {
            profile,
            reads: 0,
            dropouts: BTreeSet::new(),
            fail_from: None,
            velocity_spikes: BTreeSet::new(),
            drift_z: 0.0,
        }
    }

    /// Reads at these indices fail with a bus error.
    pub fn with_dropouts(mut self, reads: impl IntoIterator<Item = u64>) -> Self {
        self.dropouts.extend(reads);
        self
    }

    /// Every read from index `read` onward fails.
    pub fn failing_from(mut self, read: u64) -> Self {
        self.fail_from = Some(read);
        self
    }

    /// Reads at these indices report an angular velocity far above any
    /// safety limit.
    pub fn with_velocity_spikes(mut self, reads: impl IntoIterator<Item = u64>) -> Self {
        self.velocity_spikes.extend(reads);
        self
    }

    /// Offsets the Z angle, simulating a wrist rotated out of form.
    pub fn with_z_drift(mut self, degrees: f32) -> Self {
        self.drift_z = degrees;
        self
    }

    pub fn profile(&self) -> &CurlProfile {
        &self.profile
    }

    /// Sample that read `index` would produce, ignoring dropouts.
    pub fn sample_at(&self, index: u64) -> SensorSample {
        let p = &self.profile;
        let period = p.period_reads.max(1) as f32;
        let phase = TAU * (index % p.period_reads.max(1) as u64) as f32 / period;
        let mid = (p.extension_deg + p.flexion_deg) / 2.0;
        let half = (p.flexion_deg - p.extension_deg) / 2.0;

        let y = mid - half * phase.cos();
        let velocity = if self.velocity_spikes.contains(&index) {
            p.peak_velocity.abs() * 10.0 + 10.0
        } else {
            p.peak_velocity * phase.sin()
        };

        SensorSample::new(
            index * p.step_ms,
            [p.rest_x, y, p.rest_z + self.drift_z],
            velocity,
            0.0,
        )
    }
}

impl Default for CurlSimulator {
    fn default() -> Self {
        Self::new(CurlProfile::default())
    }
}

impl SensorReader for CurlSimulator {
    fn read(&mut self) -> Result<SensorSample, ReadFailure> {
        let index = self.reads;
        self.reads += 1;

        let failed = self.dropouts.contains(&index) || self.fail_from.is_some_and(|f| index >= f);
        if failed {
            return Err(ReadFailure::Bus(format!("simulated dropout at read {index}")));
        }
        Ok(self.sample_at(index))
    }
}

// ============================================================================
// ACTUATORS
// ============================================================================

/// Everything a [`RecordingActuator`] has been told.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ActuatorRecord {
    pub commands: Vec<ActuatorCommand>,
    pub alerts: Vec<bool>,
}

/// Shared, clonable view of a [`RecordingActuator`]'s record.
#[derive(Debug, Default, Clone)]
pub struct ActuatorLog {
    inner: Arc<Mutex<ActuatorRecord>>,
}

impl ActuatorLog {
    pub fn command_count(&self) -> usize {
        self.inner.lock().commands.len()
    }

    pub fn commands(&self) -> Vec<ActuatorCommand> {
        self.inner.lock().commands.clone()
    }

    pub fn last_command(&self) -> Option<ActuatorCommand> {
        self.inner.lock().commands.last().copied()
    }

    /// Most recent form alert state written, if any.
    pub fn last_alert(&self) -> Option<bool> {
        self.inner.lock().alerts.last().copied()
    }

    pub fn record(&self) -> ActuatorRecord {
        self.inner.lock().clone()
    }
}

/// Actuator that records every write into an [`ActuatorLog`].
#[derive(Debug, Default)]
pub struct RecordingActuator {
    log: ActuatorLog,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> ActuatorLog {
        self.log.clone()
    }
}

impl Actuator for RecordingActuator {
    fn apply(&mut self, command: &ActuatorCommand) {
        self.log.inner.lock().commands.push(*command);
    }

    fn set_form_alert(&mut self, active: bool) {
        self.log.inner.lock().alerts.push(active);
    }
}

/// Actuator that only logs, for running without hardware.
#[derive(Debug, Default)]
pub struct LoggingActuator {
    alert: bool,
}

impl Actuator for LoggingActuator {
    fn apply(&mut self, command: &ActuatorCommand) {
        debug!(
            servo = command.servo_position,
            motor = ?command.motor_direction,
            speed = command.motor_speed,
            "actuate"
        );
    }

    fn set_form_alert(&mut self, active: bool) {
        if active != self.alert {
            info!(active, "form alert");
            self.alert = active;
        }
    }
}

// ============================================================================
// PACING
// ============================================================================

/// Pacer that returns immediately and records each requested wait.
///
/// Optionally raises a stop signal after a number of waits, to exercise
/// cancellation at a precise point.
#[derive(Debug, Default)]
pub struct ImmediatePacer {
    waits: Vec<Duration>,
    raise_after: Option<(usize, StopSignal)>,
}

impl ImmediatePacer {
    pub fn raising_after(waits: usize, stop: StopSignal) -> Self {
        Self {
            waits: Vec::new(),
            raise_after: Some((waits, stop)),
        }
    }

    pub fn waits(&self) -> &[Duration] {
        &self.waits
    }
}

impl Pacer for ImmediatePacer {
    fn pause(&mut self, interval: Duration) {
        self.waits.push(interval);
        if let Some((after, stop)) = &self.raise_after {
            if self.waits.len() >= *after {
                stop.raise();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_scripted_sensor_exhausts_to_no_data() {
        let mut sensor =
            ScriptedSensor::from_samples([SensorSample::new(1, [0.0, 1.0, 2.0], 0.0, 0.0)]);
        assert!(sensor.read().is_ok());
        assert_eq!(sensor.read(), Err(ReadFailure::NoData));
        assert_eq!(sensor.reads(), 2);
    }

    #[test]
    fn test_curl_covers_full_range() {
        let sim = CurlSimulator::default();
        let start = sim.sample_at(0);
        let top = sim.sample_at(6);
        assert_abs_diff_eq!(start.y_angle, -80.0, epsilon = 1e-3);
        assert_abs_diff_eq!(top.y_angle, 0.0, epsilon = 1e-3);
        // Flexing on the way up, extending on the way down
        assert!(sim.sample_at(3).angular_velocity_y > 1.0);
        assert!(sim.sample_at(9).angular_velocity_y < -1.0);
        assert_eq!(sim.sample_at(4).timestamp_ms, 2000);
    }

    #[test]
    fn test_dropouts_and_permanent_failure() {
        let mut sim = CurlSimulator::default().with_dropouts([1]).failing_from(3);
        assert!(sim.read().is_ok());
        assert!(matches!(sim.read(), Err(ReadFailure::Bus(_))));
        assert!(sim.read().is_ok());
        for _ in 0..5 {
            assert!(sim.read().is_err());
        }
    }

    #[test]
    fn test_recording_actuator_shares_log() {
        let mut actuator = RecordingActuator::new();
        let log = actuator.log();
        actuator.apply(&ActuatorCommand::neutral(0.0));
        actuator.set_form_alert(true);
        assert_eq!(log.command_count(), 1);
        assert_eq!(log.last_alert(), Some(true));
    }

    #[test]
    fn test_pacer_raises_stop_after_waits() {
        let stop = StopSignal::new();
        let mut pacer = ImmediatePacer::raising_after(2, stop.clone());
        pacer.pause(Duration::from_millis(1));
        assert!(!stop.is_raised());
        pacer.pause(Duration::from_millis(1));
        assert!(stop.is_raised());
        assert_eq!(pacer.waits().len(), 2);
    }
}
