//! Presenters: where status snapshots go after each cycle.
//!
//! - [`snapshot_mailbox`]: most-recent-value handoff to another thread. The
//!   publishing side only swaps a shared pointer; readers never copy a
//!   snapshot while holding the slot, so the control loop never waits on them.
//! - [`LogPresenter`]: one structured `tracing` line per cycle.
//! - [`HistoryPresenter`]: bounded history for plotting, readable through a
//!   shared [`HistoryView`].
//! - [`FanOut`]: forwards to several presenters in order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::devices::Presenter;
use crate::types::StatusSnapshot;

/// Default number of snapshots kept for plotting.
pub const DEFAULT_HISTORY_LEN: usize = 50;

#[derive(Debug, Default)]
struct MailboxSlot {
    latest: Mutex<Option<Arc<StatusSnapshot>>>,
    published: AtomicU64,
}

/// Creates a connected publisher/reader pair.
pub fn snapshot_mailbox() -> (SnapshotPublisher, SnapshotReader) {
    let slot = Arc::new(MailboxSlot::default());
    (
        SnapshotPublisher { slot: slot.clone() },
        SnapshotReader { slot, seen: 0 },
    )
}

/// Producer half of the mailbox. Owned by the control worker.
#[derive(Debug)]
pub struct SnapshotPublisher {
    slot: Arc<MailboxSlot>,
}

impl Presenter for SnapshotPublisher {
    fn present(&mut self, snapshot: &StatusSnapshot) {
        let next = Arc::new(snapshot.clone());
        let previous = self.slot.latest.lock().replace(next);
        self.slot.published.fetch_add(1, Ordering::Release);
        // The last reference to the old snapshot is released outside the lock.
        drop(previous);
    }
}

/// Consumer half of the mailbox. Never mutates core state.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    slot: Arc<MailboxSlot>,
    seen: u64,
}

impl SnapshotReader {
    /// Newest snapshot, if any was published. Shared, not copied.
    pub fn latest(&self) -> Option<Arc<StatusSnapshot>> {
        self.slot.latest.lock().clone()
    }

    /// Newest snapshot if one arrived since the last call, else `None`.
    /// Intermediate snapshots are skipped.
    pub fn take_new(&mut self) -> Option<Arc<StatusSnapshot>> {
        let published = self.slot.published.load(Ordering::Acquire);
        if published == self.seen {
            return None;
        }
        self.seen = published;
        self.latest()
    }

    /// Total snapshots published so far.
    pub fn published(&self) -> u64 {
        self.slot.published.load(Ordering::Acquire)
    }
}

/// Logs every snapshot at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn present(&mut self, s: &StatusSnapshot) {
        info!(
            cycle = s.cycle,
            session = ?s.session,
            verdict = ?s.verdict,
            angle = ?s.raw_angle,
            average = ?s.orientation.map(|o| o.y),
            trend = ?s.trend,
            slope = s.slope,
            resistance = s.resistance,
            servo = s.command.servo_position,
            motor = ?s.command.motor_direction,
            reps = s.reps.rep_count,
            faults = s.faults.any(),
            "status"
        );
    }
}

/// Keeps the last `capacity` snapshots.
#[derive(Debug)]
pub struct HistoryPresenter {
    entries: Arc<RwLock<VecDeque<Arc<StatusSnapshot>>>>,
    capacity: usize,
}

impl HistoryPresenter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(RwLock::new(VecDeque::new())),
            capacity,
        }
    }

    /// Read-only handle usable from another thread.
    pub fn view(&self) -> HistoryView {
        HistoryView {
            entries: self.entries.clone(),
        }
    }
}

impl Default for HistoryPresenter {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LEN)
    }
}

impl Presenter for HistoryPresenter {
    fn present(&mut self, snapshot: &StatusSnapshot) {
        let next = Arc::new(snapshot.clone());
        let evicted = {
            let mut entries = self.entries.write();
            let evicted = if entries.len() == self.capacity {
                entries.pop_front()
            } else {
                None
            };
            entries.push_back(next);
            evicted
        };
        drop(evicted);
    }
}

/// Reader for a [`HistoryPresenter`].
#[derive(Debug, Clone)]
pub struct HistoryView {
    entries: Arc<RwLock<VecDeque<Arc<StatusSnapshot>>>>,
}

impl HistoryView {
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Oldest-first handles to the history.
    pub fn snapshots(&self) -> Vec<Arc<StatusSnapshot>> {
        self.entries.read().iter().cloned().collect()
    }

    /// Oldest-first series of filtered tracked-axis averages, for plotting.
    pub fn angle_series(&self) -> Vec<f32> {
        self.entries
            .read()
            .iter()
            .filter_map(|s| s.orientation.map(|o| o.y))
            .collect()
    }
}

/// Forwards each snapshot to every inner presenter.
#[derive(Default)]
pub struct FanOut {
    presenters: Vec<Box<dyn Presenter>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, presenter: impl Presenter + 'static) -> Self {
        self.presenters.push(Box::new(presenter));
        self
    }
}

impl Presenter for FanOut {
    fn present(&mut self, snapshot: &StatusSnapshot) {
        for presenter in &mut self.presenters {
            presenter.present(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActuatorCommand, SessionState};

    fn snapshot(cycle: u64) -> StatusSnapshot {
        let mut s = StatusSnapshot::initial(ActuatorCommand::neutral(0.0));
        s.cycle = cycle;
        s
    }

    #[test]
    fn test_mailbox_keeps_latest_only() {
        let (mut publisher, mut reader) = snapshot_mailbox();
        assert!(reader.latest().is_none());
        assert!(reader.take_new().is_none());

        publisher.present(&snapshot(1));
        publisher.present(&snapshot(2));
        assert_eq!(reader.published(), 2);
        assert_eq!(reader.take_new().map(|s| s.cycle), Some(2));
        // Nothing new since the last take
        assert!(reader.take_new().is_none());
        assert_eq!(reader.latest().map(|s| s.cycle), Some(2));
    }

    #[test]
    fn test_readers_share_published_snapshot() {
        let (mut publisher, reader) = snapshot_mailbox();
        publisher.present(&snapshot(1));

        let held = reader.latest().unwrap();
        assert!(Arc::ptr_eq(&held, &reader.latest().unwrap()));

        // A reader holding an old snapshot does not hold up the next publish
        publisher.present(&snapshot(2));
        assert_eq!(held.cycle, 1);
        assert_eq!(reader.latest().map(|s| s.cycle), Some(2));
    }

    #[test]
    fn test_history_view_shares_entries() {
        let mut history = HistoryPresenter::new(3);
        let view = history.view();
        history.present(&snapshot(4));
        let first = view.snapshots();
        let second = view.snapshots();
        assert!(Arc::ptr_eq(&first[0], &second[0]));
    }

    #[test]
    fn test_mailbox_across_threads() {
        let (mut publisher, reader) = snapshot_mailbox();
        let handle = std::thread::spawn(move || {
            for cycle in 0..100 {
                publisher.present(&snapshot(cycle));
            }
        });
        handle.join().unwrap();
        assert_eq!(reader.latest().map(|s| s.cycle), Some(99));
        assert_eq!(reader.latest().map(|s| s.session), Some(SessionState::Uncalibrated));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = HistoryPresenter::default();
        let view = history.view();
        for cycle in 0..75 {
            history.present(&snapshot(cycle));
        }
        assert_eq!(view.len(), DEFAULT_HISTORY_LEN);
        let cycles: Vec<u64> = view.snapshots().iter().map(|s| s.cycle).collect();
        assert_eq!(cycles.first(), Some(&25));
        assert_eq!(cycles.last(), Some(&74));
    }

    #[test]
    fn test_fan_out_reaches_every_presenter() {
        let history = HistoryPresenter::new(5);
        let view = history.view();
        let (publisher, reader) = snapshot_mailbox();
        let mut fan = FanOut::new().with(history).with(publisher).with(LogPresenter);

        fan.present(&snapshot(7));
        assert_eq!(view.len(), 1);
        assert_eq!(reader.latest().map(|s| s.cycle), Some(7));
    }
}
