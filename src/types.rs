//! Core data types for the rehabilitation band control core.
//!
//! Every value that crosses a component boundary gets a type here: the raw
//! sensor sample, the calibrated profile, the per-cycle verdict, the actuator
//! command and the status snapshot handed to the presenter.
//!
//! Design principle: types make intent obvious. No raw tuples or untyped
//! collections cross module boundaries.

use serde::{Deserialize, Serialize};

/// Minimum number of contributing samples for a derived profile to be valid.
pub const MIN_CALIBRATION_SAMPLES: usize = 5;

/// A single orientation/motion reading from the band's sensor.
///
/// Produced once per poll and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Monotonic timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Euler angle around X in degrees.
    pub x_angle: f32,
    /// Euler angle around Y in degrees (the curl axis by default).
    pub y_angle: f32,
    /// Euler angle around Z in degrees.
    pub z_angle: f32,
    /// Angular velocity around Y in deg/s.
    pub angular_velocity_y: f32,
    /// Linear acceleration along Y (gravity removed).
    pub linear_accel_y: f32,
}

impl SensorSample {
    /// Creates a sample from angle and motion readings.
    pub fn new(
        timestamp_ms: u64,
        angles: [f32; 3],
        angular_velocity_y: f32,
        linear_accel_y: f32,
    ) -> Self {
        Self {
            timestamp_ms,
            x_angle: angles[0],
            y_angle: angles[1],
            z_angle: angles[2],
            angular_velocity_y,
            linear_accel_y,
        }
    }

    /// Returns the reading for one angle axis.
    pub fn angle(&self, axis: Axis) -> f32 {
        match axis {
            Axis::X => self.x_angle,
            Axis::Y => self.y_angle,
            Axis::Z => self.z_angle,
        }
    }
}

/// One of the three orientation axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// All axes in buffer order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub(crate) fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Smoothed orientation for one cycle, after axis corrections.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilteredOrientation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl FilteredOrientation {
    pub fn get(&self, axis: Axis) -> f32 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

// ============================================================================
// CALIBRATION TYPES
// ============================================================================

/// Mean resting orientation captured by neutral-baseline calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeutralBaseline {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// A flexion range supplied without sampling (e.g. entered by a clinician).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlexionRange {
    pub min: f32,
    pub max: f32,
}

/// Where a profile's flexion limits came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileSource {
    /// Derived from guided sampling.
    Sampled,
    /// Supplied directly.
    Manual,
}

/// Personal range of motion for one session.
///
/// Immutable after creation. Fields are private so a profile can only be
/// obtained through a constructor that enforces the validity rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    min_flexion: f32,
    max_flexion: f32,
    neutral: Option<NeutralBaseline>,
    sample_count: usize,
    source: ProfileSource,
    valid: bool,
}

impl CalibrationProfile {
    /// Builds a profile from sampled limits.
    ///
    /// Valid only when `max_flexion > min_flexion` and at least
    /// [`MIN_CALIBRATION_SAMPLES`] samples contributed.
    pub fn sampled(
        min_flexion: f32,
        max_flexion: f32,
        neutral: Option<NeutralBaseline>,
        sample_count: usize,
    ) -> Self {
        let valid = Self::limits_ok(min_flexion, max_flexion)
            && sample_count >= MIN_CALIBRATION_SAMPLES;
        Self {
            min_flexion,
            max_flexion,
            neutral,
            sample_count,
            source: ProfileSource::Sampled,
            valid,
        }
    }

    /// Builds a profile from directly supplied limits.
    ///
    /// Returns `None` when the limits are not strictly increasing or not finite;
    /// callers surface that as an invalid configuration.
    pub fn manual(range: FlexionRange, neutral: Option<NeutralBaseline>) -> Option<Self> {
        if !Self::limits_ok(range.min, range.max) {
            return None;
        }
        Some(Self {
            min_flexion: range.min,
            max_flexion: range.max,
            neutral,
            sample_count: 0,
            source: ProfileSource::Manual,
            valid: true,
        })
    }

    /// A placeholder profile that classifies everything as `Calibrating`.
    pub fn uncalibrated() -> Self {
        Self {
            min_flexion: 0.0,
            max_flexion: 0.0,
            neutral: None,
            sample_count: 0,
            source: ProfileSource::Sampled,
            valid: false,
        }
    }

    fn limits_ok(min: f32, max: f32) -> bool {
        min.is_finite() && max.is_finite() && max > min
    }

    pub fn min_flexion(&self) -> f32 {
        self.min_flexion
    }

    pub fn max_flexion(&self) -> f32 {
        self.max_flexion
    }

    /// Width of the calibrated range in degrees.
    pub fn span(&self) -> f32 {
        self.max_flexion - self.min_flexion
    }

    pub fn neutral(&self) -> Option<NeutralBaseline> {
        self.neutral
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn source(&self) -> ProfileSource {
        self.source
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

// ============================================================================
// CLASSIFICATION AND REPETITION TYPES
// ============================================================================

/// Composite posture verdict, exactly one per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostureVerdict {
    /// No valid profile or no filtered reading yet.
    Calibrating,
    /// Inside the central resistance band.
    WithinRange,
    /// Below the lower band (towards extension).
    Under,
    /// Above the upper band (towards flexion).
    Over,
    /// Angular velocity exceeded the safety limit.
    TooFast,
}

/// Phase of the repetition state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepPhase {
    Idle,
    InProgress,
}

/// Snapshot of the repetition counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepCounterState {
    pub phase: RepPhase,
    pub rep_count: u64,
}

/// A completed repetition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepEvent {
    /// Session count including this repetition.
    pub rep_count: u64,
    /// Timestamp of the cycle that entered `InProgress`.
    pub started_ms: u64,
    /// Timestamp of the cycle that returned to `Idle`.
    pub completed_ms: u64,
}

impl RepEvent {
    pub fn duration_ms(&self) -> u64 {
        self.completed_ms.saturating_sub(self.started_ms)
    }
}

/// Direction-of-travel trend of the tracked axis between the last two raw readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionTrend {
    Rising,
    Falling,
    Steady,
}

// ============================================================================
// ACTUATION TYPES
// ============================================================================

/// Motor rotation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotorDirection {
    Forward,
    Backward,
    Stop,
}

/// Command sent to the servo/motor pair every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    /// Servo position in [-1, 1].
    pub servo_position: f32,
    pub motor_direction: MotorDirection,
    /// Motor speed in [0, 1].
    pub motor_speed: f32,
}

impl ActuatorCommand {
    /// Servo at `servo_mid`, motor stopped.
    ///
    /// The midpoint is deployment configuration, so there is no
    /// parameterless neutral command.
    pub fn neutral(servo_mid: f32) -> Self {
        Self {
            servo_position: servo_mid,
            motor_direction: MotorDirection::Stop,
            motor_speed: 0.0,
        }
    }

    /// Returns a copy with every field inside its declared bounds.
    ///
    /// NaN positions collapse to `servo_mid` and NaN speeds to zero.
    pub fn clamped(self, servo_mid: f32) -> Self {
        let servo_position = if self.servo_position.is_nan() {
            servo_mid.clamp(-1.0, 1.0)
        } else {
            self.servo_position.clamp(-1.0, 1.0)
        };
        let motor_speed = clamp_unit(self.motor_speed);
        let motor_direction = if motor_speed == 0.0 {
            MotorDirection::Stop
        } else {
            self.motor_direction
        };
        Self {
            servo_position,
            motor_direction,
            motor_speed,
        }
    }

    /// True for the neutral command of a servo centred at `servo_mid`.
    pub fn is_neutral(&self, servo_mid: f32) -> bool {
        self.servo_position == servo_mid
            && self.motor_direction == MotorDirection::Stop
            && self.motor_speed == 0.0
    }
}

/// Clamp into [0, 1], mapping NaN to 0.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ============================================================================
// SESSION AND STATUS TYPES
// ============================================================================

/// Session state machine of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Uncalibrated,
    Calibrating,
    Tracking,
    Stopped,
}

/// Why a session reached `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Operator called `stop_tracking`.
    Operator,
    /// Too many consecutive sensor read failures.
    SensorUnresponsive,
    /// Stop signal raised while calibration was sampling.
    CalibrationCancelled,
}

/// Fault flags attached to a status snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultFlags {
    /// This cycle's sensor read failed; the previous command was retained.
    pub sensor_read_error: bool,
    /// The sensor stopped responding and the session was stopped.
    pub sensor_unresponsive: bool,
    /// X or Z left its neutral bounds.
    pub bad_form: bool,
    /// The most recent calibration attempt failed.
    pub calibration_failed: bool,
}

impl FaultFlags {
    pub fn any(&self) -> bool {
        self.sensor_read_error || self.sensor_unresponsive || self.bad_form || self.calibration_failed
    }
}

/// Read-only aggregate handed to the presenter once per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Cycle counter since the loop was created.
    pub cycle: u64,
    /// Timestamp of the sample used this cycle, if one was read.
    pub timestamp_ms: Option<u64>,
    pub session: SessionState,
    pub stop_reason: Option<StopReason>,
    pub verdict: PostureVerdict,
    pub reps: RepCounterState,
    /// Normalized resistance in [0, 1].
    pub resistance: f32,
    /// Command currently applied to the actuator.
    pub command: ActuatorCommand,
    /// Raw tracked-axis angle of this cycle's sample.
    pub raw_angle: Option<f32>,
    pub orientation: Option<FilteredOrientation>,
    pub angular_velocity_y: Option<f32>,
    pub linear_accel_y: Option<f32>,
    pub trend: MotionTrend,
    /// Difference between the last two raw tracked-axis readings.
    pub slope: f32,
    pub consecutive_failures: u32,
    pub faults: FaultFlags,
}

impl StatusSnapshot {
    /// Snapshot of a fresh session before any cycle has run, reporting the
    /// command the loop applied on construction.
    pub fn initial(command: ActuatorCommand) -> Self {
        Self {
            cycle: 0,
            timestamp_ms: None,
            session: SessionState::Uncalibrated,
            stop_reason: None,
            verdict: PostureVerdict::Calibrating,
            reps: RepCounterState {
                phase: RepPhase::Idle,
                rep_count: 0,
            },
            resistance: 0.0,
            command,
            raw_angle: None,
            orientation: None,
            angular_velocity_y: None,
            linear_accel_y: None,
            trend: MotionTrend::Steady,
            slope: 0.0,
            consecutive_failures: 0,
            faults: FaultFlags::default(),
        }
    }

    /// Returns true when the session can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        self.session == SessionState::Stopped
    }
}

// ============================================================================
// TESTS
// ============================================================================
