//! Delivery of pending records to the remote.
//!
//! Captures go to the remote first and fall back to the store. A sync pass
//! walks every collection's working set and delivers records one at a time
//! (assessment results optionally in one bulk request). A failing record is
//! logged and left for the next pass; it never stops the rest of the batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::entity::ConflictRecord;
use crate::error::{Error, Result};
use crate::monitor::ConnectivityMonitor;
use crate::record::{Capture, PendingRecord};
use crate::remote::{BulkConflict, HttpResponse, RemoteClient};
use crate::status::{StatusBus, StatusEvent};
use crate::store::{Collection, PendingCounts, Store};

use super::trigger::{BackgroundScheduler, BackgroundTag};

/// Resolution written to the conflict audit log.
const CLIENT_WINS: &str = "client_wins";

/// Tunables of the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Delete records as soon as they are acknowledged.
    pub delete_on_sync: bool,
    /// Deliver assessment results in one request.
    pub bulk_assessments: bool,
    /// Permanent rejections before a record is quarantined.
    pub max_rejections: u32,
    /// How long acknowledged records are kept before cleanup.
    pub synced_retention: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SyncSettings {
    fn from(config: &Config) -> Self {
        Self {
            delete_on_sync: config.sync.delete_on_sync,
            bulk_assessments: config.sync.bulk_assessments,
            max_rejections: config.sync.max_rejections,
            synced_retention: config.synced_retention(),
        }
    }
}

/// The store, or why it could not be opened.
#[derive(Debug, Clone)]
pub enum StoreSlot {
    /// The store is open.
    Open(Arc<Store>),
    /// Opening failed; offline saving is disabled.
    Unavailable {
        /// Database path that failed.
        path: PathBuf,
        /// Error message.
        reason: String,
    },
}

impl StoreSlot {
    /// Open the store at `path`, remembering a failure instead of returning it.
    #[must_use]
    pub fn open(path: &Path) -> Self {
        match Store::open(path) {
            Ok(store) => Self::Open(Arc::new(store)),
            Err(e) => {
                warn!("Offline saving disabled: {e}");
                Self::Unavailable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// The open store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OfflineSavingDisabled`] if the store failed to open.
    pub fn get(&self) -> Result<&Arc<Store>> {
        match self {
            Self::Open(store) => Ok(store),
            Self::Unavailable { path, reason } => Err(Error::OfflineSavingDisabled {
                reason: format!("{}: {reason}", path.display()),
            }),
        }
    }
}

/// What happened to a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The remote accepted it; nothing was stored.
    Submitted {
        /// Remote response.
        response: HttpResponse,
    },
    /// It was stored as a pending record.
    StoredOffline {
        /// Local id within the capture's collection.
        id: i64,
    },
}

impl SubmitOutcome {
    /// Whether the offline path was taken.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::StoredOffline { .. })
    }
}

/// Why a sync pass ran or did not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The pass ran to the end.
    #[default]
    Completed,
    /// Another pass was already running.
    SkippedInFlight,
    /// The monitor reported offline.
    SkippedOffline,
    /// There is no store to read from.
    StoreUnavailable,
}

/// Summary of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Whether the pass ran.
    pub outcome: SyncOutcome,
    /// Records submitted.
    pub attempted: usize,
    /// Records acknowledged.
    pub synced: usize,
    /// Records left pending or quarantined.
    pub failed: usize,
    /// Records quarantined in this pass.
    pub quarantined: usize,
    /// Conflicts written to the audit log.
    pub conflicts: usize,
    /// Acknowledged records removed by cleanup.
    pub purged: usize,
}

impl SyncReport {
    fn skipped(outcome: SyncOutcome) -> Self {
        Self {
            outcome,
            ..Self::default()
        }
    }

    /// Whether the pass ran and every record was acknowledged.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.outcome == SyncOutcome::Completed && self.failed == 0
    }

    /// The partial failure, if any records stayed behind.
    #[must_use]
    pub fn partial_failure(&self) -> Option<Error> {
        (self.failed > 0).then_some(Error::SyncPartialFailure {
            failed: self.failed,
            attempted: self.attempted,
        })
    }
}

/// Clears the in-flight flag when a pass ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Submits captures and reconciles pending records with the remote.
#[derive(Debug)]
pub struct SyncEngine {
    store: StoreSlot,
    remote: RemoteClient,
    monitor: Arc<ConnectivityMonitor>,
    status: Arc<StatusBus>,
    settings: SyncSettings,
    in_flight: AtomicBool,
    background: OnceLock<Arc<dyn BackgroundScheduler>>,
}

impl SyncEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        store: StoreSlot,
        remote: RemoteClient,
        monitor: Arc<ConnectivityMonitor>,
        status: Arc<StatusBus>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            remote,
            monitor,
            status,
            settings,
            in_flight: AtomicBool::new(false),
            background: OnceLock::new(),
        }
    }

    /// The store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OfflineSavingDisabled`] if the store failed to open.
    pub fn store(&self) -> Result<&Arc<Store>> {
        self.store.get()
    }

    /// The connectivity monitor.
    #[must_use]
    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// The remote client.
    #[must_use]
    pub fn remote(&self) -> &RemoteClient {
        &self.remote
    }

    /// Whether a sync pass is running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Submit a capture, or store it if that fails.
    ///
    /// The remote is skipped while the monitor reports offline. Any remote
    /// failure, rejections included, takes the offline path.
    ///
    /// # Errors
    ///
    /// Only a failed store write is returned, including a store that never
    /// opened. Connectivity problems are never errors here.
    pub async fn submit_or_queue(&self, capture: Capture) -> Result<SubmitOutcome> {
        if self.monitor.is_online() {
            match self.remote.submit(&capture).await {
                Ok(response) => {
                    debug!(kind = %capture.kind(), offline_id = %capture.offline_id, "Submitted online");
                    return Ok(SubmitOutcome::Submitted { response });
                }
                Err(e) if e.should_queue_offline() => {
                    info!(kind = %capture.kind(), "Submission failed, storing offline: {e}");
                }
                Err(e) => {
                    warn!(kind = %capture.kind(), "Unexpected submission error, storing offline: {e}");
                }
            }
        }

        let id = self.store_offline(&capture)?;
        Ok(SubmitOutcome::StoredOffline { id })
    }

    /// Store a capture as pending without trying the remote.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the write fails.
    pub fn store_offline(&self, capture: &Capture) -> Result<i64> {
        let store = match self.store.get() {
            Ok(store) => store,
            Err(e) => {
                self.status.publish(StatusEvent::OfflineSavingDisabled {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let id = store.add(capture)?;
        info!(kind = %capture.kind(), id, "Stored offline");
        self.status.publish(StatusEvent::StoredOffline {
            kind: capture.kind(),
            id,
        });
        self.publish_pending(store);
        self.schedule_background(BackgroundTag::for_collection(capture.kind().collection()));
        Ok(id)
    }

    /// Current working-set sizes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the query fails.
    pub fn pending_counts(&self) -> Result<PendingCounts> {
        self.store.get()?.pending_counts()
    }

    /// Deliver every pending record.
    ///
    /// Does nothing while offline or while another pass is running; the
    /// dropped call is not queued.
    pub async fn sync_all(&self) -> SyncReport {
        self.run_pass(&Collection::ALL).await
    }

    /// Deliver pending evidence only.
    ///
    /// Evidence is independent of its result, so it may land before or after
    /// the result it refers to.
    pub async fn sync_evidence(&self) -> SyncReport {
        self.run_pass(&[Collection::Evidence]).await
    }

    /// Ask the platform to run a sync when connectivity returns.
    ///
    /// Every tag is registered now, and the scheduler is kept so that the
    /// matching tag is registered again whenever a capture is queued. Returns
    /// `true` if every tag was accepted. A decline is logged and otherwise
    /// ignored; eager triggers cover for it.
    pub fn register_background_trigger(&self, scheduler: Arc<dyn BackgroundScheduler>) -> bool {
        let mut accepted = true;
        for tag in BackgroundTag::ALL {
            if let Err(e) = scheduler.register(tag) {
                warn!(%tag, "Background sync registration declined: {e}");
                accepted = false;
            }
        }
        if self.background.set(scheduler).is_err() {
            debug!("Background scheduler already attached, keeping the first");
        }
        accepted
    }

    fn schedule_background(&self, tag: BackgroundTag) {
        if let Some(scheduler) = self.background.get() {
            if let Err(e) = scheduler.register(tag) {
                debug!(%tag, "Background sync registration declined: {e}");
            }
        }
    }

    async fn run_pass(&self, collections: &[Collection]) -> SyncReport {
        if !self.monitor.is_online() {
            debug!("Offline, skipping sync");
            return SyncReport::skipped(SyncOutcome::SkippedOffline);
        }
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("Sync already in flight, dropping request");
            return SyncReport::skipped(SyncOutcome::SkippedInFlight);
        };
        let store = match self.store.get() {
            Ok(store) => Arc::clone(store),
            Err(e) => {
                warn!("Cannot sync: {e}");
                return SyncReport::skipped(SyncOutcome::StoreUnavailable);
            }
        };

        self.status.publish(StatusEvent::SyncStarted);
        let mut report = SyncReport::default();

        for &collection in collections {
            if collection == Collection::AssessmentResults && self.settings.bulk_assessments {
                self.sync_bulk(&store, &mut report).await;
            } else {
                self.sync_each(&store, collection, &mut report).await;
            }
        }

        for &collection in collections {
            match store.purge_synced(collection, self.settings.synced_retention) {
                Ok(purged) => report.purged += purged,
                Err(e) => warn!(%collection, "Cleanup failed: {e}"),
            }
        }

        if let Some(partial) = report.partial_failure() {
            warn!("{partial}");
        }
        info!(
            attempted = report.attempted,
            synced = report.synced,
            failed = report.failed,
            conflicts = report.conflicts,
            "Sync pass finished"
        );
        self.publish_pending(&store);
        self.status.publish(StatusEvent::SyncFinished(report.clone()));
        report
    }

    fn pending_or_log(store: &Store, collection: Collection) -> Vec<PendingRecord> {
        store.pending(collection).unwrap_or_else(|e| {
            warn!(%collection, "Cannot read pending records: {e}");
            Vec::new()
        })
    }

    async fn sync_each(&self, store: &Store, collection: Collection, report: &mut SyncReport) {
        for record in Self::pending_or_log(store, collection) {
            report.attempted += 1;
            match self.remote.submit(&record.capture).await {
                Ok(_) => self.acknowledge(store, collection, record.id, report),
                Err(e) => {
                    let permanent = e.is_permanent_rejection();
                    self.reject(store, collection, &record, &e.to_string(), permanent, report);
                }
            }
        }
    }

    async fn sync_bulk(&self, store: &Store, report: &mut SyncReport) {
        let collection = Collection::AssessmentResults;
        let records = Self::pending_or_log(store, collection);
        if records.is_empty() {
            return;
        }
        report.attempted += records.len();

        let response = match self.remote.bulk_sync(&records).await {
            Ok(response) => response,
            Err(e) => {
                let permanent = e.is_permanent_rejection();
                let message = e.to_string();
                for record in &records {
                    self.reject(store, collection, record, &message, permanent, report);
                }
                return;
            }
        };

        for conflict in &response.conflicts {
            Self::audit_conflict(store, &records, conflict, report);
        }

        let outcomes: HashMap<&str, _> = response
            .results
            .iter()
            .filter_map(|item| item.offline_id.as_deref().map(|id| (id, item)))
            .collect();

        for record in &records {
            let offline_id = record.capture.offline_id.to_string();
            match outcomes.get(offline_id.as_str()) {
                Some(item) if !item.success => {
                    let message = item.error.as_deref().unwrap_or("rejected by bulk sync");
                    self.reject(store, collection, record, message, true, report);
                }
                // Conflicts are acknowledged too: the local value stands.
                _ => self.acknowledge(store, collection, record.id, report),
            }
        }
    }

    fn audit_conflict(
        store: &Store,
        records: &[PendingRecord],
        conflict: &BulkConflict,
        report: &mut SyncReport,
    ) {
        // The offline id is authoritative; the echoed local id is only used
        // when the remote left the offline id out.
        let record = match conflict.offline_id.as_deref() {
            Some(offline_id) => records
                .iter()
                .find(|r| r.capture.offline_id.to_string() == offline_id),
            None => conflict
                .result_id
                .and_then(|id| records.iter().find(|r| r.id == id)),
        };

        let client_value = conflict
            .client_value
            .clone()
            .or_else(|| record.and_then(|r| r.capture.wire_body().ok()))
            .unwrap_or(Value::Null);

        let entry = ConflictRecord {
            id: None,
            offline_id: conflict
                .offline_id
                .clone()
                .or_else(|| record.map(|r| r.capture.offline_id.to_string()))
                .unwrap_or_default(),
            record_id: record
                .map(|r| r.id)
                .or(conflict.result_id.filter(|_| conflict.offline_id.is_none())),
            remote_value: conflict.server_value.clone().unwrap_or(Value::Null),
            client_value,
            resolution: CLIENT_WINS.to_string(),
            recorded_at: Utc::now(),
        };

        warn!(
            offline_id = %entry.offline_id,
            record_id = ?entry.record_id,
            "Remote reported a conflict; keeping the local value"
        );
        match store.record_conflict(&entry) {
            Ok(_) => report.conflicts += 1,
            Err(e) => warn!("Cannot write conflict audit entry: {e}"),
        }
    }

    fn acknowledge(&self, store: &Store, collection: Collection, id: i64, report: &mut SyncReport) {
        if let Err(e) = store.mark_synced(collection, id) {
            // The remote has it; the next pass will deliver it again.
            warn!(%collection, id, "Delivered but could not mark synced: {e}");
            report.failed += 1;
            return;
        }
        report.synced += 1;

        if self.settings.delete_on_sync {
            if let Err(e) = store.delete(collection, id) {
                warn!(%collection, id, "Could not delete synced record: {e}");
            }
        }
    }

    fn reject(
        &self,
        store: &Store,
        collection: Collection,
        record: &PendingRecord,
        message: &str,
        permanent: bool,
        report: &mut SyncReport,
    ) {
        report.failed += 1;
        warn!(%collection, id = record.id, permanent, "Sync failed: {message}");

        match store.record_failure(
            collection,
            record.id,
            message,
            permanent,
            self.settings.max_rejections,
        ) {
            Ok(Some(outcome)) if outcome.quarantined && !record.quarantined => {
                warn!(
                    %collection,
                    id = record.id,
                    rejections = outcome.rejections,
                    "Record quarantined after repeated rejections"
                );
                report.quarantined += 1;
            }
            Ok(_) => {}
            Err(e) => warn!(%collection, id = record.id, "Could not record failure: {e}"),
        }
    }

    fn publish_pending(&self, store: &Store) {
        match store.pending_counts() {
            Ok(counts) => self.status.publish(StatusEvent::PendingChanged(counts)),
            Err(e) => warn!("Cannot count pending records: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use crate::record::fixtures;
    use crate::store::IndexQuery;
    use crate::sync::DeferredScheduler;
    use crate::testing::MockTransport;
    use serde_json::json;

    struct Harness {
        engine: Arc<SyncEngine>,
        transport: Arc<MockTransport>,
        monitor: Arc<ConnectivityMonitor>,
        status: Arc<StatusBus>,
    }

    impl Harness {
        fn store(&self) -> &Arc<Store> {
            self.engine.store().unwrap()
        }

        fn go_online(&self) {
            self.transport.set_online(true);
            self.monitor.set_online(true);
        }
    }

    fn harness_with(online: bool, settings: SyncSettings) -> Harness {
        harness_on(online, settings, Store::open_in_memory().unwrap())
    }

    fn harness_on(online: bool, settings: SyncSettings, store: Store) -> Harness {
        let transport = Arc::new(if online {
            MockTransport::online()
        } else {
            MockTransport::offline()
        });
        let monitor = Arc::new(ConnectivityMonitor::new(online));
        let status = Arc::new(StatusBus::new());
        let remote = RemoteClient::new(transport.clone(), &RemoteConfig::default());
        let store = StoreSlot::Open(Arc::new(store));
        let engine = Arc::new(SyncEngine::new(
            store,
            remote,
            monitor.clone(),
            status.clone(),
            settings,
        ));
        Harness {
            engine,
            transport,
            monitor,
            status,
        }
    }

    fn harness(online: bool) -> Harness {
        harness_with(online, SyncSettings::default())
    }

    #[tokio::test]
    async fn test_submit_online_does_not_touch_store() {
        let h = harness(true);
        let outcome = h
            .engine
            .submit_or_queue(fixtures::attendance(42))
            .await
            .unwrap();

        assert!(!outcome.is_offline());
        assert_eq!(h.engine.pending_counts().unwrap().total(), 0);
        assert_eq!(h.transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_submit_while_known_offline_skips_remote() {
        let h = harness(false);
        let outcome = h
            .engine
            .submit_or_queue(fixtures::attendance(42))
            .await
            .unwrap();

        assert!(matches!(outcome, SubmitOutcome::StoredOffline { id: 1 }));
        assert_eq!(h.transport.request_count(), 0);
        assert_eq!(h.engine.pending_counts().unwrap().attendance, 1);
    }

    #[tokio::test]
    async fn test_submit_falls_back_when_remote_unreachable() {
        let h = harness(true);
        // The monitor says online but requests fail.
        h.transport.set_online(false);

        let outcome = h
            .engine
            .submit_or_queue(fixtures::logbook(3))
            .await
            .unwrap();

        assert!(outcome.is_offline());
        assert_eq!(h.engine.pending_counts().unwrap().logbook, 1);
    }

    #[tokio::test]
    async fn test_submit_falls_back_on_rejection() {
        let h = harness(true);
        let capture = fixtures::assessment(5, 9);
        h.transport.reject(capture.offline_id, 500);

        let outcome = h.engine.submit_or_queue(capture).await.unwrap();
        assert!(outcome.is_offline());
    }

    #[tokio::test]
    async fn test_store_unavailable_only_affects_offline_path() {
        let transport = Arc::new(MockTransport::online());
        let monitor = Arc::new(ConnectivityMonitor::new(true));
        let status = Arc::new(StatusBus::new());
        let engine = SyncEngine::new(
            StoreSlot::Unavailable {
                path: PathBuf::from("/readonly/fieldsync.db"),
                reason: "permission denied".to_string(),
            },
            RemoteClient::new(transport.clone(), &RemoteConfig::default()),
            monitor.clone(),
            status.clone(),
            SyncSettings::default(),
        );

        let outcome = engine
            .submit_or_queue(fixtures::attendance(1))
            .await
            .unwrap();
        assert!(!outcome.is_offline());

        transport.set_online(false);
        let err = engine
            .submit_or_queue(fixtures::attendance(1))
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());
        assert!(!status.snapshot().offline_saving_enabled);

        assert_eq!(engine.sync_all().await.outcome, SyncOutcome::StoreUnavailable);
    }

    #[tokio::test]
    async fn test_learner_42_attendance_round_trip() {
        let h = harness(false);
        let id = h.engine.store_offline(&fixtures::attendance(42)).unwrap();

        let record = h.store().get(Collection::Attendance, id).unwrap().unwrap();
        assert!(!record.synced);
        assert_eq!(
            h.store()
                .count(Collection::Attendance, IndexQuery::LearnerId(42))
                .unwrap(),
            1
        );

        h.go_online();
        let report = h.engine.sync_all().await;
        assert!(report.is_clean());

        let record = h.store().get(Collection::Attendance, id).unwrap().unwrap();
        assert!(record.synced);
        assert_eq!(h.engine.pending_counts().unwrap().attendance, 0);
        assert_eq!(h.status.snapshot().pending.attendance, 0);
    }

    #[tokio::test]
    async fn test_resync_sends_nothing_twice() {
        let h = harness(false);
        for learner in 1..=3 {
            h.engine
                .submit_or_queue(fixtures::attendance(learner))
                .await
                .unwrap();
        }

        h.go_online();
        let first = h.engine.sync_all().await;
        assert_eq!(first.synced, 3);
        let requests = h.transport.request_count();

        let second = h.engine.sync_all().await;
        assert_eq!(second.attempted, 0);
        assert_eq!(h.transport.request_count(), requests);
    }

    #[tokio::test]
    async fn test_every_offline_capture_delivered_in_one_pass() {
        let h = harness(false);
        let captures = vec![
            fixtures::attendance(1),
            fixtures::attendance(2),
            fixtures::logbook(1),
            fixtures::assessment(5, 9),
            fixtures::assessment(5, 10),
            fixtures::evidence(1),
        ];
        for capture in &captures {
            h.engine.submit_or_queue(capture.clone()).await.unwrap();
        }
        assert_eq!(h.engine.pending_counts().unwrap().total(), 6);

        h.go_online();
        let report = h.engine.sync_all().await;

        assert_eq!(report.attempted, 6);
        assert_eq!(report.synced, 6);
        assert_eq!(h.engine.pending_counts().unwrap().total(), 0);
        for capture in &captures {
            assert_eq!(h.transport.deliveries(capture.offline_id), 1);
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_batch() {
        let h = harness(false);
        let captures: Vec<_> = (1..=4).map(fixtures::logbook).collect();
        for capture in &captures {
            h.engine.store_offline(capture).unwrap();
        }
        h.transport.reject(captures[1].offline_id, 503);

        h.go_online();
        let report = h.engine.sync_all().await;

        assert_eq!(report.attempted, 4);
        assert_eq!(report.synced, 3);
        assert_eq!(report.failed, 1);
        assert!(report.partial_failure().is_some());

        let pending = h.store().pending(Collection::Logbook).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].capture.offline_id, captures[1].offline_id);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].rejections, 0);

        h.transport.accept(captures[1].offline_id);
        assert!(h.engine.sync_all().await.is_clean());
    }

    #[tokio::test]
    async fn test_permanent_rejection_quarantines() {
        let settings = SyncSettings {
            max_rejections: 2,
            ..SyncSettings::default()
        };
        let h = harness_with(true, settings);
        let capture = fixtures::evidence(4);
        let id = h.engine.store_offline(&capture).unwrap();
        h.transport.reject(capture.offline_id, 422);

        assert_eq!(h.engine.sync_all().await.quarantined, 0);
        assert_eq!(h.engine.sync_all().await.quarantined, 1);

        // Quarantined records are not retried.
        let before = h.transport.request_count();
        assert_eq!(h.engine.sync_all().await.attempted, 0);
        assert_eq!(h.transport.request_count(), before);

        let record = h.store().get(Collection::Evidence, id).unwrap().unwrap();
        assert!(record.quarantined);
        assert!(!record.synced);
    }

    #[tokio::test]
    async fn test_transient_rejection_never_quarantines() {
        let settings = SyncSettings {
            max_rejections: 1,
            ..SyncSettings::default()
        };
        let h = harness_with(true, settings);
        let capture = fixtures::logbook(1);
        h.engine.store_offline(&capture).unwrap();
        h.transport.reject(capture.offline_id, 429);

        for _ in 0..3 {
            h.engine.sync_all().await;
        }
        assert_eq!(h.store().pending(Collection::Logbook).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_skipped_while_offline() {
        let h = harness(false);
        h.engine.store_offline(&fixtures::attendance(1)).unwrap();

        let report = h.engine.sync_all().await;
        assert_eq!(report.outcome, SyncOutcome::SkippedOffline);
        assert_eq!(h.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_sync_is_dropped() {
        let h = harness(true);
        h.engine.store_offline(&fixtures::attendance(1)).unwrap();
        h.transport.set_delay(Duration::from_millis(20));

        let (a, b) = tokio::join!(h.engine.sync_all(), h.engine.sync_all());

        let outcomes = [a.outcome, b.outcome];
        assert!(outcomes.contains(&SyncOutcome::Completed));
        assert!(outcomes.contains(&SyncOutcome::SkippedInFlight));
        assert!(!h.engine.is_syncing());
    }

    #[tokio::test]
    async fn test_concurrent_submit_and_sync_may_deliver_twice() {
        let h = harness(false);
        let capture = fixtures::attendance(7);
        h.engine.store_offline(&capture).unwrap();
        h.go_online();
        h.transport.set_delay(Duration::from_millis(5));

        let (report, outcome) = tokio::join!(
            h.engine.sync_all(),
            h.engine.submit_or_queue(capture.clone())
        );

        assert_eq!(report.synced, 1);
        assert!(!outcome.unwrap().is_offline());
        assert_eq!(h.transport.deliveries(capture.offline_id), 2);
        assert_eq!(h.engine.pending_counts().unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_bulk_conflict_is_audited_and_synced() {
        let h = harness(false);
        for enrollment in 1..=7 {
            h.engine
                .store_offline(&fixtures::assessment(5, enrollment))
                .unwrap();
        }
        h.transport
            .add_conflict(json!({"resultId": 7, "server_result": "NYC", "client_result": "C"}));

        h.go_online();
        let report = h.engine.sync_all().await;

        assert_eq!(report.synced, 7);
        assert_eq!(report.conflicts, 1);

        let record = h
            .store()
            .get(Collection::AssessmentResults, 7)
            .unwrap()
            .unwrap();
        assert!(record.synced);
        assert_eq!(h.engine.pending_counts().unwrap().assessment_results, 0);

        let conflicts = h.store().conflicts(10).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].record_id, Some(7));
        assert_eq!(conflicts[0].offline_id, record.capture.offline_id.to_string());
        assert_eq!(conflicts[0].remote_value, json!("NYC"));
        assert_eq!(conflicts[0].resolution, "client_wins");

        // Not re-queued.
        assert_eq!(h.engine.sync_all().await.attempted, 0);
    }

    #[tokio::test]
    async fn test_bulk_item_failure_stays_pending() {
        let h = harness(false);
        let good = fixtures::assessment(5, 1);
        let bad = fixtures::assessment(5, 2);
        h.engine.store_offline(&good).unwrap();
        let bad_id = h.engine.store_offline(&bad).unwrap();
        h.transport.reject(bad.offline_id, 422);

        h.go_online();
        let report = h.engine.sync_all().await;

        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);
        let record = h
            .store()
            .get(Collection::AssessmentResults, bad_id)
            .unwrap()
            .unwrap();
        assert!(!record.synced);
        assert_eq!(record.rejections, 1);
        assert_eq!(h.transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_row_does_not_block_collection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let h = harness_on(false, SyncSettings::default(), Store::open(&path).unwrap());

        h.engine.store_offline(&fixtures::logbook(1)).unwrap();
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute(
                "INSERT INTO logbook_queue (offline_id, payload, client_timestamp)
                 VALUES (?1, '{}', 'bad')",
                [uuid::Uuid::new_v4().to_string()],
            )
            .unwrap();
        h.engine.store_offline(&fixtures::logbook(2)).unwrap();

        h.go_online();
        let report = h.engine.sync_all().await;

        assert_eq!(report.synced, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(h.engine.pending_counts().unwrap().logbook, 0);
        assert_eq!(h.engine.sync_all().await.attempted, 0);
    }

    #[tokio::test]
    async fn test_bulk_result_without_offline_id_is_acknowledged() {
        let h = harness(false);
        h.engine
            .store_offline(&fixtures::assessment(5, 1))
            .unwrap();
        h.transport.respond(
            "POST",
            "/assessments/bulk-sync",
            HttpResponse::json(
                200,
                &json!({
                    "success": true,
                    "results": [{"offline_id": null, "success": true, "result_id": 99}],
                    "conflicts": []
                }),
            ),
        );

        h.go_online();
        let report = h.engine.sync_all().await;

        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(h.engine.pending_counts().unwrap().assessment_results, 0);
    }

    #[tokio::test]
    async fn test_bulk_undecodable_success_is_acknowledged() {
        let h = harness(false);
        h.engine
            .store_offline(&fixtures::assessment(5, 1))
            .unwrap();
        h.engine
            .store_offline(&fixtures::assessment(5, 2))
            .unwrap();
        h.transport.respond(
            "POST",
            "/assessments/bulk-sync",
            HttpResponse::text(200, "saved"),
        );

        h.go_online();
        let report = h.engine.sync_all().await;

        assert_eq!(report.synced, 2);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_bulk_conflict_matches_offline_id_first() {
        let h = harness(false);
        let mut ids = Vec::new();
        let mut captures = Vec::new();
        for enrollment in 1..=3 {
            let capture = fixtures::assessment(5, enrollment);
            ids.push(h.engine.store_offline(&capture).unwrap());
            captures.push(capture);
        }
        // resultId names the first record, the offline id the third.
        h.transport.add_conflict(json!({
            "offline_id": captures[2].offline_id.to_string(),
            "resultId": ids[0],
            "server_result": "NYC"
        }));

        h.go_online();
        let report = h.engine.sync_all().await;
        assert_eq!(report.synced, 3);
        assert_eq!(report.conflicts, 1);

        let conflicts = h.store().conflicts(10).unwrap();
        assert_eq!(conflicts[0].record_id, Some(ids[2]));
        assert_eq!(conflicts[0].offline_id, captures[2].offline_id.to_string());
        assert_eq!(conflicts[0].client_value, captures[2].wire_body().unwrap());
    }

    #[tokio::test]
    async fn test_per_record_assessments_without_bulk() {
        let settings = SyncSettings {
            bulk_assessments: false,
            ..SyncSettings::default()
        };
        let h = harness_with(true, settings);
        h.engine.store_offline(&fixtures::assessment(5, 1)).unwrap();
        h.engine.store_offline(&fixtures::assessment(5, 2)).unwrap();

        let report = h.engine.sync_all().await;
        assert_eq!(report.synced, 2);
        let paths: Vec<String> = h.transport.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/assessments/quick-save"; 2]);
    }

    #[tokio::test]
    async fn test_sync_evidence_only() {
        let h = harness(true);
        h.engine.store_offline(&fixtures::evidence(1)).unwrap();
        h.engine.store_offline(&fixtures::attendance(1)).unwrap();

        let report = h.engine.sync_evidence().await;
        assert_eq!(report.synced, 1);

        let counts = h.engine.pending_counts().unwrap();
        assert_eq!(counts.evidence, 0);
        assert_eq!(counts.attendance, 1);
    }

    #[tokio::test]
    async fn test_delete_on_sync() {
        let settings = SyncSettings {
            delete_on_sync: true,
            ..SyncSettings::default()
        };
        let h = harness_with(true, settings);
        let id = h.engine.store_offline(&fixtures::logbook(1)).unwrap();

        h.engine.sync_all().await;
        assert!(h.store().get(Collection::Logbook, id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_purges_after_retention() {
        let settings = SyncSettings {
            synced_retention: Duration::ZERO,
            ..SyncSettings::default()
        };
        let h = harness_with(true, settings);
        h.engine.store_offline(&fixtures::logbook(1)).unwrap();

        let report = h.engine.sync_all().await;
        assert_eq!(report.purged, 1);
        assert_eq!(h.store().stats().unwrap().synced, 0);
    }

    #[tokio::test]
    async fn test_sync_publishes_status() {
        let h = harness(true);
        let mut rx = h.status.subscribe();
        h.engine.sync_all().await;

        assert_eq!(rx.recv().await.unwrap(), StatusEvent::SyncStarted);
        assert!(matches!(
            rx.recv().await.unwrap(),
            StatusEvent::PendingChanged(_)
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            StatusEvent::SyncFinished(_)
        ));
    }

    #[derive(Debug)]
    struct Scheduler {
        accept: bool,
        registered: std::sync::Mutex<Vec<BackgroundTag>>,
    }

    impl BackgroundScheduler for Scheduler {
        fn register(&self, tag: BackgroundTag) -> Result<()> {
            if self.accept {
                self.registered.lock().unwrap().push(tag);
                Ok(())
            } else {
                Err(Error::internal("background sync unsupported"))
            }
        }
    }

    #[test]
    fn test_register_background_trigger() {
        let h = harness(true);
        let accepting = Arc::new(Scheduler {
            accept: true,
            registered: std::sync::Mutex::default(),
        });
        assert!(h.engine.register_background_trigger(accepting.clone()));
        assert_eq!(accepting.registered.lock().unwrap().len(), 2);

        let declining = Arc::new(Scheduler {
            accept: false,
            registered: std::sync::Mutex::default(),
        });
        assert!(!h.engine.register_background_trigger(declining));
    }

    #[test]
    fn test_queued_capture_registers_background_again() {
        let h = harness(false);
        let scheduler = Arc::new(DeferredScheduler::new());
        h.engine.register_background_trigger(scheduler.clone());

        // The first online edge consumes the registrations.
        assert_eq!(scheduler.take_due().len(), 2);
        assert!(scheduler.take_due().is_empty());

        h.engine.store_offline(&fixtures::logbook(1)).unwrap();
        assert_eq!(scheduler.take_due(), vec![BackgroundTag::SyncAttendance]);

        h.engine.store_offline(&fixtures::evidence(3)).unwrap();
        assert_eq!(scheduler.take_due(), vec![BackgroundTag::SyncAssessments]);
    }
}
