//! Trigger arbitration.
//!
//! Startup, connectivity edges, periodic ticks, explicit requests and
//! background tasks all feed one channel. The [`Dispatcher`] is the only
//! reader; it hands each trigger to the engine, whose single-flight guard
//! drops whatever overlaps a running pass.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::monitor::{ConnectivityMonitor, MonitorHandle};
use crate::status::{StatusBus, StatusEvent};
use crate::store::Collection;

use super::engine::{SyncEngine, SyncReport};

/// Capacity of the trigger channel.
const TRIGGER_CAPACITY: usize = 32;

/// Named background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BackgroundTag {
    /// Attendance and logbook queues.
    #[serde(rename = "sync-attendance")]
    SyncAttendance,
    /// Assessment results and evidence.
    #[serde(rename = "sync-assessments")]
    SyncAssessments,
}

impl BackgroundTag {
    /// Every tag the engine registers.
    pub const ALL: [BackgroundTag; 2] = [Self::SyncAttendance, Self::SyncAssessments];

    /// Registered task name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SyncAttendance => "sync-attendance",
            Self::SyncAssessments => "sync-assessments",
        }
    }

    /// The task that drains a collection.
    #[must_use]
    pub fn for_collection(collection: Collection) -> Self {
        match collection {
            Collection::Attendance | Collection::Logbook => Self::SyncAttendance,
            Collection::AssessmentResults | Collection::Evidence => Self::SyncAssessments,
        }
    }

    /// Parse a registered task name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.as_str() == name)
    }
}

impl std::fmt::Display for BackgroundTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform facility that runs a task later, when connectivity allows.
///
/// Implementations may decline or never fire.
pub trait BackgroundScheduler: Send + Sync + std::fmt::Debug {
    /// Register a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform declines the registration.
    fn register(&self, tag: BackgroundTag) -> Result<()>;
}

/// In-process scheduler: registered tags fire once on the next online edge.
/// Tags registered again after that fire on the following edge.
#[derive(Debug, Default)]
pub struct DeferredScheduler {
    registered: Mutex<BTreeSet<BackgroundTag>>,
}

impl DeferredScheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every registered tag.
    #[must_use]
    pub fn take_due(&self) -> Vec<BackgroundTag> {
        match self.registered.lock() {
            Ok(mut registered) => std::mem::take(&mut *registered).into_iter().collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl BackgroundScheduler for DeferredScheduler {
    fn register(&self, tag: BackgroundTag) -> Result<()> {
        self.registered
            .lock()
            .map_err(|_| Error::internal("background scheduler lock poisoned"))?
            .insert(tag);
        debug!(%tag, "Background sync registered");
        Ok(())
    }
}

/// Why a sync pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Process start.
    Startup,
    /// The monitor saw a transition.
    ConnectivityChanged(bool),
    /// Periodic timer.
    Periodic,
    /// Explicit request.
    SyncNow,
    /// A background task fired.
    Background(BackgroundTag),
}

impl SyncTrigger {
    /// Whether this trigger should start a pass.
    #[must_use]
    pub fn wants_sync(self) -> bool {
        !matches!(self, Self::ConnectivityChanged(false))
    }
}

/// Commands accepted on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Activate a waiting cache version now.
    SkipWaiting,
    /// Run a sync pass now.
    SyncNow,
}

impl std::str::FromStr for ControlMessage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "SKIP_WAITING" => Ok(Self::SkipWaiting),
            "SYNC_NOW" => Ok(Self::SyncNow),
            other => Err(Error::internal(format!("unknown control message: {other}"))),
        }
    }
}

/// Single arbitration point for sync triggers.
#[derive(Debug)]
pub struct Dispatcher {
    engine: Arc<SyncEngine>,
    status: Arc<StatusBus>,
    rx: mpsc::Receiver<SyncTrigger>,
}

impl Dispatcher {
    /// Create a dispatcher and the sender that feeds it.
    #[must_use]
    pub fn new(
        engine: Arc<SyncEngine>,
        status: Arc<StatusBus>,
    ) -> (mpsc::Sender<SyncTrigger>, Self) {
        let (tx, rx) = mpsc::channel(TRIGGER_CAPACITY);
        (tx, Self { engine, status, rx })
    }

    /// Handle one trigger.
    ///
    /// Returns the spawned pass, if any. The pass may still be dropped by the
    /// engine if another one is running.
    pub fn dispatch(&self, trigger: SyncTrigger) -> Option<JoinHandle<SyncReport>> {
        debug!(?trigger, "Dispatching trigger");
        if let SyncTrigger::ConnectivityChanged(online) = trigger {
            self.status.publish(StatusEvent::Connectivity { online });
        }
        if !trigger.wants_sync() {
            return None;
        }

        let engine = Arc::clone(&self.engine);
        Some(tokio::spawn(async move { engine.sync_all().await }))
    }

    /// Handle triggers until every sender is gone.
    pub async fn run(mut self) {
        info!("Sync dispatcher started");
        while let Some(trigger) = self.rx.recv().await {
            self.dispatch(trigger);
        }
        info!("Sync dispatcher stopped");
    }
}

/// Forward connectivity transitions, and fire due background tasks when the
/// monitor goes online.
pub fn forward_connectivity(
    monitor: &ConnectivityMonitor,
    scheduler: Arc<DeferredScheduler>,
    tx: mpsc::Sender<SyncTrigger>,
) -> JoinHandle<()> {
    let mut changes = monitor.subscribe();
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let online = *changes.borrow_and_update();
            if tx.send(SyncTrigger::ConnectivityChanged(online)).await.is_err() {
                break;
            }
            if online {
                for tag in scheduler.take_due() {
                    if tx.send(SyncTrigger::Background(tag)).await.is_err() {
                        return;
                    }
                }
            }
        }
    })
}

/// Send a [`SyncTrigger::Periodic`] every `interval` until `handle` stops.
pub fn forward_periodic(
    interval: Duration,
    tx: mpsc::Sender<SyncTrigger>,
    handle: MonitorHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if handle.should_stop() || tx.send(SyncTrigger::Periodic).await.is_err() {
                break;
            }
        }
    })
}
