//! Session orchestration: calibration, tracking and the per-cycle pipeline.
//!
//! # Session states
//!
//! ```text
//! Uncalibrated ──start_calibration──▶ Calibrating ──ok──▶ Tracking ──stop──▶ Stopped
//!      ▲                                   │                                   ▲
//!      └─────────────── failure ───────────┘── cancelled ──────────────────────┘
//! ```
//!
//! `Stopped` is terminal; a new session needs a new loop.
//!
//! # One tracking cycle
//!
//! 1. **Read**: poll the sensor. A failure keeps the previous command and
//!    flags the snapshot; `consecutive_failure_limit` failures in a row stop
//!    the session with neutral actuators.
//! 2. **Filter**: push the three angles and update the motion trend.
//! 3. **Classify**: tracked-axis verdict plus the X/Z form check.
//! 4. **Count**: feed the raw angular velocity to the repetition counter.
//! 5. **Map and actuate**: classification to command, clamped, applied.
//! 6. **Publish**: one snapshot to the presenter.
//!
//! The loop is the sole owner and mutator of the filter, the counter and the
//! applied command. Dropping it leaves the actuator neutral.

use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use crate::calibration::CalibrationManager;
use crate::classifier::{Classification, RangeClassifier};
use crate::config::ControlConfig;
use crate::devices::{Devices, StopSignal};
use crate::error::{ConfigError, ControlError, ControlResult, ReadFailure};
use crate::rep_counter::RepCounter;
use crate::resistance::ResistanceMapper;
use crate::signal::{RollingFilter, SlopeTracker};
use crate::types::{
    ActuatorCommand, CalibrationProfile, FaultFlags, PostureVerdict, RepEvent, SensorSample,
    SessionState, StatusSnapshot, StopReason,
};

/// Timing counters for the tracking loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopMetrics {
    /// Cycles run in any state.
    pub cycles: u64,
    /// Cycles that read a sample successfully.
    pub samples: u64,
    /// Failed reads over the whole session.
    pub read_failures: u64,
    /// Time spent inside `run_cycle`, in microseconds.
    pub busy_time_us: u64,
    /// Slowest single cycle, in microseconds.
    pub max_cycle_us: u64,
}

impl LoopMetrics {
    /// Mean cycle time in microseconds.
    pub fn mean_cycle_us(&self) -> f64 {
        if self.cycles == 0 {
            0.0
        } else {
            self.busy_time_us as f64 / self.cycles as f64
        }
    }
}

/// Closed-loop controller for one session.
pub struct ControlLoop {
    config: ControlConfig,
    devices: Devices,
    stop: StopSignal,

    // Processing stages
    calibrator: CalibrationManager,
    filter: RollingFilter,
    slope: SlopeTracker,
    classifier: RangeClassifier,
    reps: RepCounter,
    mapper: ResistanceMapper,

    // Session state
    profile: CalibrationProfile,
    session: SessionState,
    stop_reason: Option<StopReason>,
    calibration_failed: bool,
    consecutive_failures: u32,

    // Output state
    applied: ActuatorCommand,
    alert_active: bool,
    verdict: PostureVerdict,
    resistance: f32,
    last_snapshot: StatusSnapshot,
    metrics: LoopMetrics,
}

impl ControlLoop {
    /// Validates `config` and builds an uncalibrated loop.
    pub fn new(config: ControlConfig, devices: Devices) -> ControlResult<Self> {
        config.validate()?;

        let classifier = RangeClassifier::new(config.classifier.clone());
        let mapper = ResistanceMapper::new(config.resistance.clone(), classifier.bands());
        let neutral = mapper.neutral();

        Ok(Self {
            calibrator: CalibrationManager::new(config.calibration.clone(), config.filter.clone()),
            filter: RollingFilter::new(config.filter.clone()),
            slope: SlopeTracker::new(config.filter.trend_threshold_deg),
            reps: RepCounter::new(config.reps.clone()),
            applied: neutral,
            classifier,
            mapper,
            config,
            devices,
            stop: StopSignal::new(),
            profile: CalibrationProfile::uncalibrated(),
            session: SessionState::Uncalibrated,
            stop_reason: None,
            calibration_failed: false,
            consecutive_failures: 0,
            alert_active: false,
            verdict: PostureVerdict::Calibrating,
            resistance: 0.0,
            last_snapshot: StatusSnapshot::initial(neutral),
            metrics: LoopMetrics::default(),
        })
    }

    /// Replaces the loop's stop signal with one shared by the caller.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Signal that cancels a running calibration when raised.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn session(&self) -> SessionState {
        self.session
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn rep_count(&self) -> u64 {
        self.reps.rep_count()
    }

    pub fn last_rep(&self) -> Option<RepEvent> {
        self.reps.last_event()
    }

    /// Command most recently sent to the actuator.
    pub fn applied_command(&self) -> ActuatorCommand {
        self.applied
    }

    /// Neutral command for this loop's servo midpoint.
    pub fn neutral_command(&self) -> ActuatorCommand {
        self.mapper.neutral()
    }

    pub fn last_snapshot(&self) -> &StatusSnapshot {
        &self.last_snapshot
    }

    pub fn metrics(&self) -> LoopMetrics {
        self.metrics
    }

    pub fn is_stopped(&self) -> bool {
        self.session == SessionState::Stopped
    }

    // =========================================================================
    // SESSION CONTROL
    // =========================================================================

    /// Runs the configured calibration protocol(s) to completion.
    ///
    /// Blocks for the whole sampling phase. On success the loop is tracking
    /// with the new profile. On failure it returns to `Uncalibrated` and any
    /// previously installed profile is kept. If the stop signal is raised
    /// during sampling the session stops.
    pub fn start_calibration(&mut self) -> ControlResult<CalibrationProfile> {
        match self.session {
            SessionState::Uncalibrated => {}
            SessionState::Stopped => return Err(ControlError::SessionStopped),
            from => {
                return Err(ControlError::InvalidTransition {
                    from,
                    action: "start calibration",
                })
            }
        }

        self.transition(SessionState::Calibrating);
        self.neutralise();
        self.publish(self.idle_snapshot());

        let result = self.calibrator.run(
            self.devices.sensor.as_mut(),
            self.devices.pacer.as_mut(),
            &self.stop,
        );

        match result {
            Ok(profile) => {
                self.profile = profile;
                self.calibration_failed = false;
                self.begin_tracking();
                Ok(profile)
            }
            Err(ControlError::CalibrationCancelled) => {
                self.enter_stopped(StopReason::CalibrationCancelled);
                Err(ControlError::CalibrationCancelled)
            }
            Err(err) => {
                warn!(error = %err, "calibration failed; retry required");
                self.calibration_failed = true;
                self.transition(SessionState::Uncalibrated);
                self.publish(self.idle_snapshot());
                Err(err)
            }
        }
    }

    /// Installs a profile obtained without sampling, e.g. a clinician-entered
    /// range. Only allowed before tracking starts.
    pub fn install_profile(&mut self, profile: CalibrationProfile) -> ControlResult<()> {
        match self.session {
            SessionState::Uncalibrated => {}
            SessionState::Stopped => return Err(ControlError::SessionStopped),
            from => {
                return Err(ControlError::InvalidTransition {
                    from,
                    action: "install a profile",
                })
            }
        }
        if !profile.is_valid() {
            return Err(ConfigError::invalid_value(
                "profile",
                "max_flexion must exceed min_flexion",
            )
            .into());
        }
        info!(
            min_flexion = profile.min_flexion(),
            max_flexion = profile.max_flexion(),
            "profile installed"
        );
        self.profile = profile;
        Ok(())
    }

    /// Enters tracking with the current profile.
    ///
    /// Fails with `NotCalibrated`, touching no actuator, when no valid profile
    /// exists. Calling it while already tracking is a no-op.
    pub fn start_tracking(&mut self) -> ControlResult<()> {
        match self.session {
            SessionState::Tracking => Ok(()),
            SessionState::Stopped => Err(ControlError::SessionStopped),
            SessionState::Calibrating => Err(ControlError::InvalidTransition {
                from: SessionState::Calibrating,
                action: "start tracking",
            }),
            SessionState::Uncalibrated => {
                if !self.profile.is_valid() {
                    warn!("start_tracking rejected: not calibrated");
                    return Err(ControlError::NotCalibrated);
                }
                self.begin_tracking();
                Ok(())
            }
        }
    }

    /// Stops the session and leaves the actuator neutral. Idempotent.
    pub fn stop_tracking(&mut self) {
        if self.session != SessionState::Stopped {
            self.enter_stopped(StopReason::Operator);
        }
    }

    /// Stops the session if needed and returns the final snapshot.
    pub fn shutdown(&mut self) -> StatusSnapshot {
        self.stop_tracking();
        self.last_snapshot.clone()
    }

    // =========================================================================
    // CYCLE
    // =========================================================================

    /// Runs one control cycle and returns the published snapshot.
    ///
    /// Outside `Tracking` the sensor is not read and nothing is actuated; the
    /// snapshot only reports session state.
    pub fn run_cycle(&mut self) -> StatusSnapshot {
        let started = Instant::now();
        self.metrics.cycles += 1;

        let snapshot = if self.session == SessionState::Tracking {
            match self.devices.sensor.read() {
                Ok(sample) => self.process_sample(&sample),
                Err(failure) => self.handle_read_failure(failure),
            }
        } else {
            self.idle_snapshot()
        };
        self.publish(snapshot.clone());

        let elapsed_us = started.elapsed().as_micros() as u64;
        self.metrics.busy_time_us += elapsed_us;
        self.metrics.max_cycle_us = self.metrics.max_cycle_us.max(elapsed_us);
        trace!(cycle = self.metrics.cycles, elapsed_us, "cycle done");

        snapshot
    }

    // =========================================================================
    // PRIVATE METHODS
    // =========================================================================

    fn process_sample(&mut self, sample: &SensorSample) -> StatusSnapshot {
        self.consecutive_failures = 0;
        self.metrics.samples += 1;

        let axis = self.config.calibration.tracked_axis;
        let raw_angle = sample.angle(axis);
        self.filter.push_sample(sample);
        let trend = self.slope.update(raw_angle);
        let orientation = self.filter.orientation();

        let mut classification: Classification = self.classifier.classify(
            orientation.map(|o| o.get(axis)),
            sample.angular_velocity_y,
            &self.profile,
        );
        if let Some(orientation) = &orientation {
            classification =
                classification.with_form(self.classifier.check_form(orientation, &self.profile));
        }

        if classification.verdict == PostureVerdict::TooFast && self.verdict != PostureVerdict::TooFast {
            warn!(
                angular_velocity_y = sample.angular_velocity_y,
                "angular velocity over safety limit; resistance released"
            );
        }

        self.reps.update(sample.angular_velocity_y, sample.timestamp_ms);

        let output = self.mapper.map(&classification);
        let command = output.command.clamped(self.config.resistance.servo_mid);
        self.devices.actuator.apply(&command);
        self.applied = command;
        self.resistance = output.resistance;
        self.verdict = classification.verdict;

        let bad_form = classification.form.is_bad();
        if bad_form != self.alert_active {
            if bad_form {
                warn!(form = ?classification.form, "bad form");
            } else {
                debug!("form restored");
            }
            self.devices.actuator.set_form_alert(bad_form);
            self.alert_active = bad_form;
        }

        debug!(
            y = raw_angle,
            verdict = ?classification.verdict,
            position = ?classification.position,
            resistance = output.resistance,
            "cycle"
        );

        StatusSnapshot {
            timestamp_ms: Some(sample.timestamp_ms),
            raw_angle: Some(raw_angle),
            orientation,
            angular_velocity_y: Some(sample.angular_velocity_y),
            linear_accel_y: Some(sample.linear_accel_y),
            trend,
            slope: self.slope.slope(),
            faults: FaultFlags {
                bad_form,
                ..self.session_faults()
            },
            ..self.idle_snapshot()
        }
    }

    fn handle_read_failure(&mut self, failure: ReadFailure) -> StatusSnapshot {
        self.consecutive_failures += 1;
        self.metrics.read_failures += 1;
        let limit = self.config.consecutive_failure_limit;

        if self.consecutive_failures >= limit {
            error!(
                failures = self.consecutive_failures,
                %failure,
                "{}",
                ControlError::SensorUnresponsive {
                    failures: self.consecutive_failures
                }
            );
            // run_cycle publishes the terminal snapshot for this cycle
            self.halt(StopReason::SensorUnresponsive);
        } else {
            warn!(
                failures = self.consecutive_failures,
                limit,
                %failure,
                "sensor read failed; holding previous command"
            );
        }

        StatusSnapshot {
            faults: FaultFlags {
                sensor_read_error: true,
                ..self.session_faults()
            },
            ..self.idle_snapshot()
        }
    }

    /// Snapshot of session state without per-sample readings.
    fn idle_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            cycle: self.metrics.cycles,
            timestamp_ms: None,
            session: self.session,
            stop_reason: self.stop_reason,
            verdict: self.verdict,
            reps: self.reps.state(),
            resistance: self.resistance,
            command: self.applied,
            raw_angle: None,
            orientation: None,
            angular_velocity_y: None,
            linear_accel_y: None,
            trend: self.slope.trend(),
            slope: self.slope.slope(),
            consecutive_failures: self.consecutive_failures,
            faults: self.session_faults(),
        }
    }

    fn session_faults(&self) -> FaultFlags {
        FaultFlags {
            sensor_read_error: false,
            sensor_unresponsive: self.stop_reason == Some(StopReason::SensorUnresponsive),
            bad_form: self.alert_active,
            calibration_failed: self.calibration_failed,
        }
    }

    fn begin_tracking(&mut self) {
        self.filter.reset();
        self.slope.reset();
        self.consecutive_failures = 0;
        self.transition(SessionState::Tracking);
        self.publish(self.idle_snapshot());
    }

    /// Stops outside a cycle and publishes the terminal snapshot.
    fn enter_stopped(&mut self, reason: StopReason) {
        self.halt(reason);
        self.publish(self.idle_snapshot());
    }

    /// Forces the actuator neutral, clears the alert and enters `Stopped`
    /// without publishing.
    fn halt(&mut self, reason: StopReason) {
        self.neutralise();
        self.verdict = PostureVerdict::Calibrating;
        self.stop_reason = Some(reason);
        self.transition(SessionState::Stopped);
    }

    fn neutralise(&mut self) {
        let neutral = self.mapper.neutral();
        self.devices.actuator.apply(&neutral);
        self.devices.actuator.set_form_alert(false);
        self.applied = neutral;
        self.alert_active = false;
        self.resistance = 0.0;
    }

    fn transition(&mut self, to: SessionState) {
        if self.session != to {
            info!(from = ?self.session, to = ?to, reason = ?self.stop_reason, "session transition");
            self.session = to;
        }
    }

    fn publish(&mut self, snapshot: StatusSnapshot) {
        self.devices.presenter.present(&snapshot);
        self.last_snapshot = snapshot;
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        if self.session != SessionState::Stopped {
            self.enter_stopped(StopReason::Operator);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::HistoryPresenter;
    use crate::simulation::{ActuatorLog, ImmediatePacer, RecordingActuator, ScriptedSensor};
    use crate::types::{FlexionRange, MotorDirection};

    fn sample(ts: u64, y: f32, velocity: f32) -> SensorSample {
        SensorSample::new(ts, [300.0, y, 60.0], velocity, 0.0)
    }

    fn build(sensor: ScriptedSensor) -> (ControlLoop, ActuatorLog) {
        let actuator = RecordingActuator::new();
        let log = actuator.log();
        let devices = Devices::new(sensor, actuator).with_pacer(ImmediatePacer::default());
        let control = ControlLoop::new(ControlConfig::default(), devices).expect("default config");
        (control, log)
    }

    fn manual_profile(min: f32, max: f32) -> CalibrationProfile {
        CalibrationProfile::manual(FlexionRange { min, max }, None).unwrap()
    }

    #[test]
    fn test_start_tracking_requires_profile() {
        let (mut control, log) = build(ScriptedSensor::default());
        assert!(matches!(control.start_tracking(), Err(ControlError::NotCalibrated)));
        assert_eq!(control.session(), SessionState::Uncalibrated);
        assert_eq!(log.command_count(), 0);
    }

    #[test]
    fn test_idle_cycles_do_not_read_or_actuate() {
        let (mut control, log) = build(ScriptedSensor::from_samples([sample(0, 50.0, 0.0)]));
        let snapshot = control.run_cycle();
        assert_eq!(snapshot.session, SessionState::Uncalibrated);
        assert_eq!(snapshot.verdict, PostureVerdict::Calibrating);
        assert!(snapshot.raw_angle.is_none());
        assert_eq!(log.command_count(), 0);
    }

    #[test]
    fn test_tracking_cycle_maps_posture() {
        let (mut control, log) = build(ScriptedSensor::from_samples([
            sample(0, 90.0, 0.0),
            sample(500, 90.0, 0.0),
        ]));
        control.install_profile(manual_profile(0.0, 100.0)).unwrap();
        control.start_tracking().unwrap();

        let snapshot = control.run_cycle();
        assert_eq!(snapshot.verdict, PostureVerdict::Over);
        assert_eq!(snapshot.command.motor_direction, MotorDirection::Backward);
        assert_eq!(snapshot.command.servo_position, 1.0);
        assert_eq!(log.last_command(), Some(snapshot.command));
        assert!(!snapshot.faults.any());
    }

    #[test]
    fn test_read_failure_retains_previous_command() {
        let (mut control, log) = build(ScriptedSensor::new(vec![
            Ok(sample(0, 10.0, 0.0)),
            Err(ReadFailure::NoData),
        ]));
        control.install_profile(manual_profile(0.0, 100.0)).unwrap();
        control.start_tracking().unwrap();

        let first = control.run_cycle();
        let commands_before = log.command_count();
        let second = control.run_cycle();

        assert!(second.faults.sensor_read_error);
        assert_eq!(second.consecutive_failures, 1);
        assert_eq!(second.command, first.command);
        assert_eq!(log.command_count(), commands_before);
        assert_eq!(control.session(), SessionState::Tracking);
    }

    #[test]
    fn test_failed_calibration_keeps_previous_profile() {
        let (mut control, _log) = build(ScriptedSensor::from_samples([
            sample(0, 10.0, 0.0),
            sample(1, 20.0, 0.0),
        ]));
        let installed = manual_profile(-10.0, 90.0);
        control.install_profile(installed).unwrap();

        let err = control.start_calibration().unwrap_err();
        assert!(matches!(err, ControlError::CalibrationFailed { .. }));
        assert_eq!(control.session(), SessionState::Uncalibrated);
        assert_eq!(*control.profile(), installed);
        assert!(control.last_snapshot().faults.calibration_failed);
    }

    #[test]
    fn test_install_profile_rejects_invalid() {
        let (mut control, _log) = build(ScriptedSensor::default());
        let err = control.install_profile(CalibrationProfile::uncalibrated()).unwrap_err();
        assert!(matches!(err, ControlError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_invalid_config_rejected_before_construction() {
        let mut config = ControlConfig::default();
        config.reps.enter_threshold = 0.05;
        let devices = Devices::new(ScriptedSensor::default(), RecordingActuator::new());
        assert!(matches!(
            ControlLoop::new(config, devices),
            Err(ControlError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_oversized_window_rejected_before_construction() {
        let mut config = ControlConfig::default();
        config.filter.window_size = usize::MAX;
        let devices = Devices::new(ScriptedSensor::default(), RecordingActuator::new());
        assert!(matches!(
            ControlLoop::new(config, devices),
            Err(ControlError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_stop_is_terminal_and_idempotent() {
        let (mut control, log) = build(ScriptedSensor::default());
        control.install_profile(manual_profile(0.0, 100.0)).unwrap();
        control.start_tracking().unwrap();
        control.stop_tracking();
        control.stop_tracking();

        assert_eq!(control.session(), SessionState::Stopped);
        assert_eq!(control.stop_reason(), Some(StopReason::Operator));
        assert!(log.last_command().unwrap().is_neutral(0.0));
        assert_eq!(log.last_alert(), Some(false));
        assert!(matches!(control.start_tracking(), Err(ControlError::SessionStopped)));
        assert!(matches!(control.start_calibration(), Err(ControlError::SessionStopped)));
    }

    #[test]
    fn test_drop_leaves_actuator_neutral() {
        let (mut control, log) = build(ScriptedSensor::from_samples([sample(0, 5.0, 0.0)]));
        control.install_profile(manual_profile(0.0, 100.0)).unwrap();
        control.start_tracking().unwrap();
        let snapshot = control.run_cycle();
        assert!(!snapshot.command.is_neutral(0.0));

        drop(control);
        assert!(log.last_command().unwrap().is_neutral(0.0));
    }

    #[test]
    fn test_escalation_publishes_one_snapshot_per_cycle() {
        let history = HistoryPresenter::new(20);
        let view = history.view();
        let script = (0..6).map(|_| Err(ReadFailure::NoData)).collect();
        let devices = Devices::new(ScriptedSensor::new(script), RecordingActuator::new())
            .with_presenter(history);
        let mut control = ControlLoop::new(ControlConfig::default(), devices).unwrap();
        control.install_profile(manual_profile(0.0, 100.0)).unwrap();
        control.start_tracking().unwrap();
        let before = view.len();

        for _ in 0..6 {
            control.run_cycle();
        }

        let cycles: Vec<_> = view.snapshots()[before..].iter().map(|s| s.cycle).collect();
        assert_eq!(cycles, vec![1, 2, 3, 4, 5, 6]);
        let terminal = view.snapshots().last().cloned().unwrap();
        assert!(terminal.is_terminal());
        assert!(terminal.faults.sensor_read_error);
        assert!(terminal.faults.sensor_unresponsive);
    }

    #[test]
    fn test_too_fast_with_unreadable_angle() {
        let (mut control, log) = build(ScriptedSensor::from_samples([
            sample(0, 50.0, 0.0),
            sample(500, f32::NAN, 50.0),
        ]));
        control.install_profile(manual_profile(0.0, 100.0)).unwrap();
        control.start_tracking().unwrap();
        control.run_cycle();

        let snapshot = control.run_cycle();
        assert_eq!(snapshot.verdict, PostureVerdict::TooFast);
        assert_eq!(snapshot.resistance, 0.0);
        assert!(log.last_command().unwrap().is_neutral(0.0));
    }

    #[test]
    fn test_metrics_count_cycles() {
        let (mut control, _log) = build(ScriptedSensor::new(vec![
            Ok(sample(0, 50.0, 0.0)),
            Err(ReadFailure::NoData),
        ]));
        control.install_profile(manual_profile(0.0, 100.0)).unwrap();
        control.start_tracking().unwrap();
        control.run_cycle();
        control.run_cycle();

        let metrics = control.metrics();
        assert_eq!(metrics.cycles, 2);
        assert_eq!(metrics.samples, 1);
        assert_eq!(metrics.read_failures, 1);
        assert!(metrics.mean_cycle_us() >= 0.0);
    }
}
