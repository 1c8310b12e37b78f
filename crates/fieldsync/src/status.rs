//! Status bus.
//!
//! Observers either subscribe to the stream of [`StatusEvent`]s or read the
//! latest [`StatusSnapshot`]. Publishing never blocks and never fails; with
//! no subscribers an event is simply dropped.

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::record::RecordKind;
use crate::store::PendingCounts;
use crate::sync::SyncReport;

/// Capacity of the event channel. Slow subscribers lose the oldest events.
const EVENT_CAPACITY: usize = 256;

/// Something observers may want to show.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    /// Connectivity changed.
    Connectivity {
        /// New state.
        online: bool,
    },
    /// Pending totals changed.
    PendingChanged(PendingCounts),
    /// A sync pass started.
    SyncStarted,
    /// A sync pass finished.
    SyncFinished(SyncReport),
    /// A capture took the offline path.
    StoredOffline {
        /// Record kind.
        kind: RecordKind,
        /// Local id.
        id: i64,
    },
    /// The store could not be opened; captures can no longer be kept offline.
    OfflineSavingDisabled {
        /// Why.
        reason: String,
    },
}

/// Latest known status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Connectivity.
    pub online: bool,
    /// Pending totals.
    pub pending: PendingCounts,
    /// Whether a sync pass is running.
    pub syncing: bool,
    /// Report of the last finished pass.
    pub last_report: Option<SyncReport>,
    /// Whether captures can be stored offline.
    pub offline_saving_enabled: bool,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            online: false,
            pending: PendingCounts::default(),
            syncing: false,
            last_report: None,
            offline_saving_enabled: true,
        }
    }
}

/// Fan-out of status events plus the folded snapshot.
#[derive(Debug)]
pub struct StatusBus {
    events: broadcast::Sender<StatusEvent>,
    snapshot: watch::Sender<StatusSnapshot>,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBus {
    /// Create a bus.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (snapshot, _) = watch::channel(StatusSnapshot::default());
        Self { events, snapshot }
    }

    /// Publish an event and fold it into the snapshot.
    pub fn publish(&self, event: StatusEvent) {
        self.snapshot.send_modify(|snapshot| match &event {
            StatusEvent::Connectivity { online } => snapshot.online = *online,
            StatusEvent::PendingChanged(counts) => snapshot.pending = *counts,
            StatusEvent::SyncStarted => snapshot.syncing = true,
            StatusEvent::SyncFinished(report) => {
                snapshot.syncing = false;
                snapshot.last_report = Some(report.clone());
            }
            StatusEvent::StoredOffline { .. } => {}
            StatusEvent::OfflineSavingDisabled { .. } => snapshot.offline_saving_enabled = false,
        });
        // An error only means nobody is listening.
        let _ = self.events.send(event);
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Watch the snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<StatusSnapshot> {
        self.snapshot.subscribe()
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.borrow().clone()
    }
}
