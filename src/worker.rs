//! Dedicated periodic worker that owns a [`ControlLoop`].
//!
//! The worker thread runs one cycle per cadence tick and services session
//! requests between ticks. Calibration runs on the same thread, so it never
//! overlaps a tracking cycle. The caller's side is a [`ControlWorker`]
//! handle:
//!
//! - requests travel over a bounded channel with a one-shot reply channel each
//! - snapshots come back through a most-recent-value mailbox
//! - `stop_tracking` raises the stop signal before queueing, so it also
//!   cancels a calibration that is still sampling
//!
//! The thread exits once the session reaches `Stopped`, after the loop has
//! left the actuator neutral.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::ControlConfig;
use crate::control_loop::{ControlLoop, LoopMetrics};
use crate::devices::{Devices, StopSignal};
use crate::error::{ControlError, ControlResult};
use crate::presenter::{snapshot_mailbox, FanOut, SnapshotReader};
use crate::types::{CalibrationProfile, StatusSnapshot, StopReason};

const REQUEST_QUEUE_DEPTH: usize = 8;

enum SessionRequest {
    StartCalibration(SyncSender<ControlResult<CalibrationProfile>>),
    StartTracking(SyncSender<ControlResult<()>>),
    StopTracking(SyncSender<()>),
}

/// What the worker thread hands back when it exits.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub final_snapshot: StatusSnapshot,
    pub metrics: LoopMetrics,
}

/// Handle to a running control worker.
pub struct ControlWorker {
    requests: SyncSender<SessionRequest>,
    stop: StopSignal,
    exited: StopSignal,
    snapshots: SnapshotReader,
    handle: Option<JoinHandle<WorkerReport>>,
}

impl ControlWorker {
    /// Validates `config`, builds the loop and starts the worker thread.
    ///
    /// Snapshots go to the devices' presenter and to the mailbox behind
    /// [`snapshots`](Self::snapshots).
    pub fn spawn(config: ControlConfig, mut devices: Devices) -> ControlResult<Self> {
        let (publisher, snapshots) = snapshot_mailbox();
        devices.presenter = Box::new(FanOut::new().with(devices.presenter).with(publisher));

        let cadence = config.cadence();
        let control = ControlLoop::new(config, devices)?;
        let stop = control.stop_signal();
        let exited = StopSignal::new();
        let (requests, inbox) = mpsc::sync_channel(REQUEST_QUEUE_DEPTH);

        let worker_exited = exited.clone();
        let handle = thread::Builder::new()
            .name("rehab-control".into())
            .spawn(move || run_worker(control, inbox, cadence, worker_exited))
            .map_err(|err| {
                warn!(error = %err, "failed to spawn control worker");
                ControlError::WorkerUnavailable
            })?;

        info!(cadence_ms = cadence.as_millis() as u64, "control worker started");
        Ok(Self {
            requests,
            stop,
            exited,
            snapshots,
            handle: Some(handle),
        })
    }

    /// Runs calibration on the worker and waits for the result.
    pub fn start_calibration(&self) -> ControlResult<CalibrationProfile> {
        self.request(SessionRequest::StartCalibration)?
    }

    pub fn start_tracking(&self) -> ControlResult<()> {
        self.request(SessionRequest::StartTracking)?
    }

    /// Stops the session, cancelling any running calibration.
    ///
    /// Succeeds if the session is already stopped.
    pub fn stop_tracking(&self) -> ControlResult<()> {
        self.stop.raise();
        match self.request(SessionRequest::StopTracking) {
            Ok(()) | Err(ControlError::SessionStopped) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Reader for the most recent snapshot. Clonable for other consumers.
    pub fn snapshots(&self) -> SnapshotReader {
        self.snapshots.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Waits for the session to stop and returns the worker's report.
    ///
    /// A session that stopped because the sensor went unresponsive is
    /// reported as `SensorUnresponsive`.
    pub fn join(mut self) -> ControlResult<WorkerReport> {
        let handle = self.handle.take().ok_or(ControlError::WorkerUnavailable)?;
        let report = handle.join().map_err(|_| ControlError::WorkerUnavailable)?;
        if report.final_snapshot.stop_reason == Some(StopReason::SensorUnresponsive) {
            return Err(ControlError::SensorUnresponsive {
                failures: report.final_snapshot.consecutive_failures,
            });
        }
        Ok(report)
    }

    fn request<T>(&self, make: impl FnOnce(SyncSender<T>) -> SessionRequest) -> ControlResult<T> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        match self.requests.try_send(make(reply_tx)) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => {
                // Queue momentarily full; block until the worker drains it.
                self.requests
                    .send(request)
                    .map_err(|_| self.unavailable())?;
            }
            Err(TrySendError::Disconnected(_)) => return Err(self.unavailable()),
        }
        reply_rx.recv().map_err(|_| self.unavailable())
    }

    /// Error for a request the worker can no longer answer.
    fn unavailable(&self) -> ControlError {
        if self.exited.is_raised() {
            ControlError::SessionStopped
        } else {
            ControlError::WorkerUnavailable
        }
    }
}

impl Drop for ControlWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop.raise();
            let (reply_tx, _reply_rx) = mpsc::sync_channel(1);
            let _ = self.requests.try_send(SessionRequest::StopTracking(reply_tx));
            if handle.join().is_err() {
                warn!("control worker panicked");
            }
        }
    }
}

fn run_worker(
    mut control: ControlLoop,
    inbox: Receiver<SessionRequest>,
    cadence: Duration,
    exited: StopSignal,
) -> WorkerReport {
    let stop = control.stop_signal();
    let mut next_tick = Instant::now();

    while !control.is_stopped() {
        if stop.is_raised() {
            control.stop_tracking();
            break;
        }

        let wait = next_tick.saturating_duration_since(Instant::now());
        match inbox.recv_timeout(wait) {
            Ok(request) => {
                handle_request(&mut control, request);
                continue;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("session handle dropped; stopping");
                control.stop_tracking();
                break;
            }
        }

        control.run_cycle();

        next_tick += cadence;
        let now = Instant::now();
        if next_tick < now {
            debug!(
                behind_ms = now.duration_since(next_tick).as_millis() as u64,
                "control cycle overran cadence"
            );
            next_tick = now;
        }
    }

    let final_snapshot = control.shutdown();
    let metrics = control.metrics();
    // Requests still queued are answered with SessionStopped by the handle.
    exited.raise();
    drop(inbox);
    info!(
        reps = final_snapshot.reps.rep_count,
        reason = ?final_snapshot.stop_reason,
        cycles = metrics.cycles,
        "control worker exiting"
    );
    WorkerReport {
        final_snapshot,
        metrics,
    }
}

fn handle_request(control: &mut ControlLoop, request: SessionRequest) {
    // A dropped reply receiver only means the caller stopped waiting.
    match request {
        SessionRequest::StartCalibration(reply) => {
            let _ = reply.send(control.start_calibration());
        }
        SessionRequest::StartTracking(reply) => {
            let _ = reply.send(control.start_tracking());
        }
        SessionRequest::StopTracking(reply) => {
            control.stop_tracking();
            let _ = reply.send(());
        }
    }
}
