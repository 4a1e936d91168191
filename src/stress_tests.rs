/// Long-running and pathological-input tests for the control loop.
///
/// These drive sessions far longer than any real exercise set, and feed the
/// loop sensors that misbehave in ways real hardware does.

#[cfg(test)]
mod stress_tests {
    use crate::config::ControlConfig;
    use crate::control_loop::ControlLoop;
    use crate::devices::{Devices, SensorReader};
    use crate::error::ReadFailure;
    use crate::rep_counter::RepCounter;
    use crate::simulation::{
        ActuatorLog, CurlSimulator, ImmediatePacer, RecordingActuator, ScriptedSensor,
    };
    use crate::types::*;

    fn tracking(
        sensor: impl SensorReader + 'static,
        profile: Option<CalibrationProfile>,
    ) -> (ControlLoop, ActuatorLog) {
        let actuator = RecordingActuator::new();
        let log = actuator.log();
        let devices = Devices::new(sensor, actuator).with_pacer(ImmediatePacer::default());
        let mut control = ControlLoop::new(ControlConfig::default(), devices).unwrap();
        match profile {
            Some(profile) => {
                control.install_profile(profile).unwrap();
                control.start_tracking().unwrap();
            }
            None => {
                control.start_calibration().unwrap();
            }
        }
        (control, log)
    }

    fn assert_commands_in_bounds(log: &ActuatorLog) {
        for command in log.commands() {
            assert!(
                (-1.0..=1.0).contains(&command.servo_position),
                "servo out of bounds: {command:?}"
            );
            assert!(
                (0.0..=1.0).contains(&command.motor_speed),
                "speed out of bounds: {command:?}"
            );
        }
    }

    // ============================================================================
    // CATEGORY 1: EXTREME DURATION
    // ============================================================================

    /// Ten thousand cycles (~83 minutes at 0.5s) with a dropout every 7th read
    #[test]
    fn stress_long_session_with_sparse_dropouts() {
        let dropouts = (20..10_010u64).filter(|r| r % 7 == 0);
        let sensor = CurlSimulator::default().with_dropouts(dropouts);
        let (mut control, log) = tracking(sensor, None);

        for _ in 0..10_000 {
            control.run_cycle();
        }

        assert_eq!(control.session(), SessionState::Tracking, "isolated dropouts never stop");
        let reps = control.rep_count();
        // One curl per twelve reads; dropped reads skip a few counter updates
        assert!(reps > 700 && reps <= 834, "unexpected rep count {reps}");
        assert!(control.metrics().read_failures > 1000);
        assert_commands_in_bounds(&log);
    }

    /// Rep count is monotonic across a very long velocity trace
    #[test]
    fn stress_rep_counter_long_trace() {
        let mut counter = RepCounter::default();
        let mut previous = 0;
        for i in 0..120_000u64 {
            let v = if (i / 3) % 2 == 0 { 0.9 } else { 0.0 };
            counter.update(v, i);
            assert!(counter.rep_count() >= previous);
            previous = counter.rep_count();
        }
        assert_eq!(counter.rep_count(), 120_000 / 6);
    }

    // ============================================================================
    // CATEGORY 2: PATHOLOGICAL SENSORS
    // ============================================================================

    /// NaN and infinite readings never produce out-of-range commands
    #[test]
    fn stress_non_finite_readings() {
        let values = [f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 1e30, -1e30, 45.0];
        let mut script = Vec::new();
        for (i, &angle) in values.iter().cycle().take(300).enumerate() {
            let velocity = values[(i + 2) % values.len()];
            script.push(Ok(SensorSample::new(i as u64, [angle, angle, angle], velocity, angle)));
        }
        let profile = CalibrationProfile::manual(FlexionRange { min: 0.0, max: 90.0 }, None).unwrap();
        let (mut control, log) = tracking(ScriptedSensor::new(script), Some(profile));

        for _ in 0..300 {
            let snapshot = control.run_cycle();
            assert!((0.0..=1.0).contains(&snapshot.resistance));
        }
        assert_eq!(control.session(), SessionState::Tracking);
        assert_commands_in_bounds(&log);
    }

    /// Five failures, one success, forever: never escalates
    #[test]
    fn stress_failures_just_under_limit() {
        let mut script = Vec::new();
        for round in 0..200u64 {
            script.extend((0..5).map(|_| Err(ReadFailure::Incomplete { axes: 2 })));
            script.push(Ok(SensorSample::new(round, [300.0, 40.0, 60.0], 0.0, 0.0)));
        }
        let profile = CalibrationProfile::manual(FlexionRange { min: 0.0, max: 90.0 }, None).unwrap();
        let (mut control, _log) = tracking(ScriptedSensor::new(script), Some(profile));

        for _ in 0..1200 {
            control.run_cycle();
        }
        assert_eq!(control.session(), SessionState::Tracking);
        assert_eq!(control.metrics().read_failures, 1000);
    }

    /// Velocity chattering around a single threshold does not count reps
    #[test]
    fn stress_velocity_chatter_inside_hysteresis_band() {
        let script: Vec<_> = (0..2000u64)
            .map(|i| {
                let v = if i % 2 == 0 { 0.55 } else { 0.45 };
                Ok(SensorSample::new(i, [300.0, 45.0, 60.0], v, 0.0))
            })
            .collect();
        let profile = CalibrationProfile::manual(FlexionRange { min: 0.0, max: 90.0 }, None).unwrap();
        let (mut control, _log) = tracking(ScriptedSensor::new(script), Some(profile));

        for _ in 0..2000 {
            control.run_cycle();
        }
        assert_eq!(control.rep_count(), 0);
        assert_eq!(control.last_snapshot().reps.phase, RepPhase::InProgress);
    }

    /// Sensor dies mid-session after a long healthy run
    #[test]
    fn stress_sensor_death_after_long_run() {
        let sensor = CurlSimulator::default().failing_from(5_000);
        let (mut control, log) = tracking(sensor, None);

        let mut cycles = 0;
        while !control.is_stopped() {
            control.run_cycle();
            cycles += 1;
            assert!(cycles < 6_000, "loop never stopped");
        }

        // Calibration consumed ten reads; the sixth failed read stops the session
        assert_eq!(cycles, 5_000 - 10 + 6);
        assert_eq!(control.stop_reason(), Some(StopReason::SensorUnresponsive));
        assert!(log.last_command().unwrap().is_neutral(0.0));
    }

    // ============================================================================
    // CATEGORY 3: SESSION CONTROL ABUSE
    // ============================================================================

    /// Repeated control calls in every state leave consistent state behind
    #[test]
    fn stress_repeated_session_calls() {
        let (mut control, log) = tracking(CurlSimulator::default(), None);
        for _ in 0..100 {
            assert!(control.start_tracking().is_ok());
            assert!(control.start_calibration().is_err());
            control.run_cycle();
        }
        for _ in 0..100 {
            control.stop_tracking();
        }
        assert_eq!(control.session(), SessionState::Stopped);
        assert!(control.start_tracking().is_err());
        assert!(log.last_command().unwrap().is_neutral(0.0));
    }
}
