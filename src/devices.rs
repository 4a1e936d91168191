//! Boundary traits between the control core and the hardware/UI around it.
//!
//! - [`SensorReader`]: polled once per cycle for a [`SensorSample`]
//! - [`Actuator`]: receives an [`ActuatorCommand`] every cycle
//! - [`Presenter`]: observes one [`StatusSnapshot`] per cycle
//! - [`Pacer`]: waits between calibration samples
//!
//! Implementations are expected to be cheap and non-blocking. The core clamps
//! every command before it reaches an actuator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ReadFailure;
use crate::types::{ActuatorCommand, SensorSample, StatusSnapshot};

/// Source of orientation/motion samples.
pub trait SensorReader: Send {
    /// Polls the sensor once. Must be safe to call every cycle.
    fn read(&mut self) -> Result<SensorSample, ReadFailure>;
}

impl<T: SensorReader + ?Sized> SensorReader for Box<T> {
    fn read(&mut self) -> Result<SensorSample, ReadFailure> {
        (**self).read()
    }
}

/// Servo/motor pair plus the form alert indicator.
///
/// Writes are fire-and-forget and must tolerate repeated identical commands.
pub trait Actuator: Send {
    fn apply(&mut self, command: &ActuatorCommand);

    /// Drives the bad-form indicator (LED or buzzer).
    fn set_form_alert(&mut self, _active: bool) {}
}

impl<T: Actuator + ?Sized> Actuator for Box<T> {
    fn apply(&mut self, command: &ActuatorCommand) {
        (**self).apply(command)
    }

    fn set_form_alert(&mut self, active: bool) {
        (**self).set_form_alert(active)
    }
}

/// Receives status snapshots. Purely observational.
pub trait Presenter: Send {
    fn present(&mut self, snapshot: &StatusSnapshot);
}

impl<T: Presenter + ?Sized> Presenter for Box<T> {
    fn present(&mut self, snapshot: &StatusSnapshot) {
        (**self).present(snapshot)
    }
}

/// Presenter that discards every snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn present(&mut self, _snapshot: &StatusSnapshot) {}
}

/// Waits between calibration samples.
pub trait Pacer: Send {
    fn pause(&mut self, interval: Duration);
}

/// Pacer backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&mut self, interval: Duration) {
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }
}

/// The four boundary objects a control loop owns.
pub struct Devices {
    pub sensor: Box<dyn SensorReader>,
    pub actuator: Box<dyn Actuator>,
    pub presenter: Box<dyn Presenter>,
    pub pacer: Box<dyn Pacer>,
}

impl Devices {
    /// Sensor and actuator with a discarding presenter and real sleeps.
    pub fn new(sensor: impl SensorReader + 'static, actuator: impl Actuator + 'static) -> Self {
        Self {
            sensor: Box::new(sensor),
            actuator: Box::new(actuator),
            presenter: Box::new(NullPresenter),
            pacer: Box::new(ThreadPacer),
        }
    }

    pub fn with_presenter(mut self, presenter: impl Presenter + 'static) -> Self {
        self.presenter = Box::new(presenter);
        self
    }

    pub fn with_pacer(mut self, pacer: impl Pacer + 'static) -> Self {
        self.pacer = Box::new(pacer);
        self
    }
}

/// Shared stop flag checked between calibration samples and worker ticks.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    raised: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_signal_shared_between_clones() {
        let signal = StopSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_raised());
        signal.raise();
        assert!(observer.is_raised());
    }

    #[test]
    fn test_boxed_sensor_delegates() {
        struct Fixed;
        impl SensorReader for Fixed {
            fn read(&mut self) -> Result<SensorSample, ReadFailure> {
                Ok(SensorSample::new(7, [0.0, 1.0, 2.0], 0.0, 0.0))
            }
        }
        let mut boxed: Box<dyn SensorReader> = Box::new(Fixed);
        assert_eq!(boxed.read().unwrap().timestamp_ms, 7);
    }
}
