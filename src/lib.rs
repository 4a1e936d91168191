//! Rehabilitation Band Control Core
//!
//! Closed-loop controller for a sensor-driven resistance band: it samples a
//! 3-axis orientation sensor, smooths the readings, classifies the wearer's
//! limb posture against a personally calibrated range of motion, counts
//! repetitions, and drives a servo/motor pair to adjust resistance.
//!
//! # Design Philosophy
//!
//! - **Safety first**: excessive angular velocity releases resistance before
//!   any other rule applies, and every way out of a session leaves the
//!   actuator neutral.
//! - **Fail loud, not fatal**: a missed sensor read is reported in the status
//!   snapshot and the last command is held; only a persistently silent sensor
//!   stops the session.
//! - **One owner**: a single loop owns the filter, the repetition counter and
//!   the applied command. Everything else observes snapshots.
//!
//! # Data flow
//!
//! ```text
//! SensorReader → RollingFilter → { RangeClassifier, RepCounter } → ResistanceMapper → Actuator
//!                                          ControlLoop → Presenter (snapshots)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rehab_band::{ControlConfig, ControlLoop, Devices};
//! use rehab_band::simulation::{CurlSimulator, LoggingActuator};
//!
//! let devices = Devices::new(CurlSimulator::default(), LoggingActuator::default());
//! let mut control = ControlLoop::new(ControlConfig::default(), devices)?;
//! control.start_calibration()?;
//! for _ in 0..20 {
//!     let snapshot = control.run_cycle();
//!     println!("{:?} reps={}", snapshot.verdict, snapshot.reps.rep_count);
//! }
//! control.stop_tracking();
//! # Ok::<(), rehab_band::ControlError>(())
//! ```

pub mod calibration;
pub mod classifier;
pub mod config;
pub mod control_loop;
pub mod devices;
pub mod error;
pub mod presenter;
pub mod rep_counter;
pub mod resistance;
pub mod signal;
pub mod simulation;
pub mod types;
pub mod worker;

#[cfg(test)]
mod stress_tests;

// Re-export commonly used types
pub use calibration::{CalibrationConfig, CalibrationManager, CalibrationMode};
pub use classifier::{Band, BandPosition, Classification, ClassifierConfig, RangeClassifier};
pub use config::ControlConfig;
pub use control_loop::{ControlLoop, LoopMetrics};
pub use devices::{Actuator, Devices, Pacer, Presenter, SensorReader, StopSignal};
pub use error::{ConfigError, ControlError, ControlResult, ReadFailure};
pub use rep_counter::{RepCounter, RepCounterConfig};
pub use resistance::{ResistanceConfig, ResistanceMapper};
pub use signal::{FilterConfig, RollingFilter};
pub use types::{
    ActuatorCommand, CalibrationProfile, MotorDirection, PostureVerdict, SensorSample,
    SessionState, StatusSnapshot,
};
pub use worker::{ControlWorker, WorkerReport};
