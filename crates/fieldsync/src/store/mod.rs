//! Local durable store for fieldsync.
//!
//! `SQLite`-backed persistence for pending records, cached reference
//! entities, the conflict audit log and the interceptor's response cache.
//!
//! Every public operation runs as its own implicit transaction. Nothing here
//! composes several calls atomically: a crash between `mark_synced` and
//! `delete`, for example, leaves a synced record behind for the cleanup pass.

mod cache;
mod collection;
pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::record::{Capture, CapturePayload, PendingRecord};

pub use cache::CachedResponse;
pub use collection::{Collection, IndexQuery};

const RECORD_COLUMNS: &str = "id, offline_id, payload, client_timestamp, synced, synced_at, \
                              attempts, rejections, last_error, quarantined";

/// Local durable store.
///
/// Owns all persisted state. Other components hold only transient copies of
/// what they read from it.
#[derive(Debug)]
pub struct Store {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection, one caller at a time.
    conn: Mutex<Connection>,
}

/// Outcome of recording a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    /// Failed attempts so far.
    pub attempts: u32,
    /// Permanent rejections so far.
    pub rejections: u32,
    /// Whether the record is now quarantined.
    pub quarantined: bool,
}

/// Unsynced, non-quarantined records per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
    /// Attendance queue.
    pub attendance: u64,
    /// Logbook queue.
    pub logbook: u64,
    /// Assessment results.
    pub assessment_results: u64,
    /// Evidence.
    pub evidence: u64,
}

impl PendingCounts {
    /// Count for one collection.
    #[must_use]
    pub fn get(&self, collection: Collection) -> u64 {
        match collection {
            Collection::Attendance => self.attendance,
            Collection::Logbook => self.logbook,
            Collection::AssessmentResults => self.assessment_results,
            Collection::Evidence => self.evidence,
        }
    }

    fn set(&mut self, collection: Collection, value: u64) {
        match collection {
            Collection::Attendance => self.attendance = value,
            Collection::Logbook => self.logbook = value,
            Collection::AssessmentResults => self.assessment_results = value,
            Collection::Evidence => self.evidence = value,
        }
    }

    /// Sum over all collections.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.attendance + self.logbook + self.assessment_results + self.evidence
    }
}

/// Statistics about the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Records awaiting sync.
    pub pending: PendingCounts,
    /// Synced records not yet cleaned up.
    pub synced: u64,
    /// Records no longer retried.
    pub quarantined: u64,
    /// Cached entity snapshots.
    pub cached_entities: u64,
    /// Conflict audit entries.
    pub conflicts: u64,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// Raw column values of a pending-record row.
struct RecordRow {
    id: i64,
    offline_id: String,
    payload: String,
    client_timestamp: String,
    synced: bool,
    synced_at: Option<String>,
    attempts: u32,
    rejections: u32,
    last_error: Option<String>,
    quarantined: bool,
}

impl RecordRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            offline_id: row.get(1)?,
            payload: row.get(2)?,
            client_timestamp: row.get(3)?,
            synced: row.get(4)?,
            synced_at: row.get(5)?,
            attempts: row.get(6)?,
            rejections: row.get(7)?,
            last_error: row.get(8)?,
            quarantined: row.get(9)?,
        })
    }

    fn decode(self, collection: Collection) -> Result<PendingRecord> {
        let corrupt = |message: String| Error::CorruptRecord {
            collection: collection.table(),
            id: self.id,
            message,
        };

        let payload: CapturePayload =
            serde_json::from_str(&self.payload).map_err(|e| corrupt(e.to_string()))?;
        if payload.kind() != collection.kind() {
            return Err(corrupt(format!("unexpected kind {}", payload.kind())));
        }
        let offline_id = Uuid::parse_str(&self.offline_id).map_err(|e| corrupt(e.to_string()))?;
        let client_timestamp =
            parse_timestamp(&self.client_timestamp).ok_or_else(|| corrupt("bad timestamp".into()))?;

        Ok(PendingRecord {
            id: self.id,
            capture: Capture {
                offline_id,
                client_timestamp,
                payload,
            },
            synced: self.synced,
            synced_at: self.synced_at.as_deref().and_then(parse_timestamp),
            attempts: self.attempts,
            rejections: self.rejections,
            last_error: self.last_error,
            quarantined: self.quarantined,
        })
    }
}

/// Format a timestamp so that string order matches time order.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl Store {
    /// Open or create a store at the given path.
    ///
    /// Reopening an initialized store keeps every collection and record;
    /// only pending migrations are applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the database cannot be opened,
    /// or another error if schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening store at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::StoreUnavailable {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|source| Error::StoreUnavailable {
                path: path.clone(),
                source,
            })?;

        migrations::initialize_schema(&conn).map_err(|err| match err {
            Error::DatabaseQuery(source) => Error::StoreUnavailable {
                path: path.clone(),
                source,
            },
            other => other,
        })?;

        info!("Store opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::StoreUnavailable {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("store connection lock poisoned"))
    }

    /// Persist a capture as a pending record.
    ///
    /// Returns the id assigned within the capture's collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn add(&self, capture: &Capture) -> Result<i64> {
        let collection = capture.kind().collection();
        let payload = serde_json::to_string(&capture.payload)?;
        let index = capture.payload.index_values();

        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (offline_id, payload, client_timestamp, learner_id, schedule_id, enrollment_id, result_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                collection.table()
            ),
            params![
                capture.offline_id.to_string(),
                payload,
                format_timestamp(capture.client_timestamp),
                index.learner_id,
                index.schedule_id,
                index.enrollment_id,
                index.result_id,
            ],
        )?;

        let id = conn.last_insert_rowid();
        debug!(%collection, id, offline_id = %capture.offline_id, "Stored pending record");
        Ok(id)
    }

    /// Get a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the row is corrupt.
    pub fn get(&self, collection: Collection, id: i64) -> Result<Option<PendingRecord>> {
        let row = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM {} WHERE id = ?1",
                    collection.table()
                ),
                [id],
                RecordRow::from_row,
            )
            .optional()?;
        row.map(|r| r.decode(collection)).transpose()
    }

    /// Look up records through a secondary index.
    ///
    /// The result order is unspecified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedIndex`] if the collection does not declare
    /// the index, or an error if the database operation fails.
    pub fn query_by_index(
        &self,
        collection: Collection,
        query: IndexQuery,
    ) -> Result<Vec<PendingRecord>> {
        Self::check_index(collection, query)?;
        self.select(
            collection,
            &format!("{} = ?1", query.column()),
            params![query.value()],
        )
    }

    /// The pending-sync working set of a collection, oldest first.
    ///
    /// Quarantined records are left out. A row that no longer decodes is
    /// quarantined with the decode error and skipped; the rest are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn pending(&self, collection: Collection) -> Result<Vec<PendingRecord>> {
        let rows = self.select_rows(
            collection,
            "synced = 0 AND quarantined = 0 ORDER BY id",
            params![],
        )?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match row.decode(collection) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(%collection, id, "Quarantining undecodable record: {e}");
                    self.conn()?.execute(
                        &format!(
                            "UPDATE {} SET quarantined = 1, last_error = ?2 WHERE id = ?1",
                            collection.table()
                        ),
                        params![id, e.to_string()],
                    )?;
                }
            }
        }
        Ok(records)
    }

    /// Decoded rows matching `predicate`. Rows that fail to decode are
    /// logged and left out.
    fn select(
        &self,
        collection: Collection,
        predicate: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<PendingRecord>> {
        let rows = self.select_rows(collection, predicate, params)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                row.decode(collection)
                    .map_err(|e| warn!(%collection, "Skipping undecodable record: {e}"))
                    .ok()
            })
            .collect())
    }

    fn select_rows(
        &self,
        collection: Collection,
        predicate: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<RecordRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE {predicate}",
            collection.table()
        ))?;
        let rows = stmt
            .query_map(params, RecordRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn check_index(collection: Collection, query: IndexQuery) -> Result<()> {
        if collection.supports(&query) {
            Ok(())
        } else {
            Err(Error::UnsupportedIndex {
                collection: collection.table(),
                index: query.column(),
            })
        }
    }

    /// Count records matching an index lookup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedIndex`] if the collection does not declare
    /// the index, or an error if the database operation fails.
    pub fn count(&self, collection: Collection, query: IndexQuery) -> Result<u64> {
        Self::check_index(collection, query)?;
        let count: i64 = self.conn()?.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?1",
                collection.table(),
                query.column()
            ),
            [query.value()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Delete a record.
    ///
    /// Returns `true` if a record was deleted, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete(&self, collection: Collection, id: i64) -> Result<bool> {
        let affected = self.conn()?.execute(
            &format!("DELETE FROM {} WHERE id = ?1", collection.table()),
            [id],
        )?;
        Ok(affected > 0)
    }

    /// Mark a record as acknowledged by the remote.
    ///
    /// Only flips `synced` from false to true, so applying it twice is
    /// harmless. Returns `true` if this call did the flip.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn mark_synced(&self, collection: Collection, id: i64) -> Result<bool> {
        let affected = self.conn()?.execute(
            &format!(
                "UPDATE {} SET synced = 1, synced_at = ?2, last_error = NULL
                 WHERE id = ?1 AND synced = 0",
                collection.table()
            ),
            params![id, format_timestamp(Utc::now())],
        )?;
        Ok(affected > 0)
    }

    /// Record a failed delivery attempt.
    ///
    /// A `permanent` failure also counts as a rejection; once rejections reach
    /// `max_rejections` the record is quarantined. Returns `None` if the record
    /// no longer exists or is already synced.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn record_failure(
        &self,
        collection: Collection,
        id: i64,
        message: &str,
        permanent: bool,
        max_rejections: u32,
    ) -> Result<Option<FailureOutcome>> {
        let outcome = self
            .conn()?
            .query_row(
                &format!(
                    "UPDATE {} SET
                        attempts = attempts + 1,
                        rejections = rejections + ?3,
                        last_error = ?2,
                        quarantined = CASE WHEN rejections + ?3 >= ?4 THEN 1 ELSE quarantined END
                     WHERE id = ?1 AND synced = 0
                     RETURNING attempts, rejections, quarantined",
                    collection.table()
                ),
                params![id, message, i64::from(permanent), max_rejections],
                |row| {
                    Ok(FailureOutcome {
                        attempts: row.get(0)?,
                        rejections: row.get(1)?,
                        quarantined: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(outcome)
    }

    /// Return a quarantined record to the working set.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn release(&self, collection: Collection, id: i64) -> Result<bool> {
        let affected = self.conn()?.execute(
            &format!(
                "UPDATE {} SET quarantined = 0, rejections = 0
                 WHERE id = ?1 AND quarantined = 1",
                collection.table()
            ),
            [id],
        )?;
        Ok(affected > 0)
    }

    /// Delete synced records acknowledged at least `older_than` ago.
    ///
    /// Returns the number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn purge_synced(&self, collection: Collection, older_than: Duration) -> Result<usize> {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };
        let cutoff = format_timestamp(cutoff);
        let affected = self.conn()?.execute(
            &format!(
                "DELETE FROM {} WHERE synced = 1 AND synced_at <= ?1",
                collection.table()
            ),
            [cutoff],
        )?;

        if affected > 0 {
            info!(%collection, "Purged {} synced records", affected);
        }
        Ok(affected)
    }

    /// Working-set sizes for every collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn pending_counts(&self) -> Result<PendingCounts> {
        let conn = self.conn()?;
        let mut counts = PendingCounts::default();
        for collection in Collection::ALL {
            let count: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE synced = 0 AND quarantined = 0",
                    collection.table()
                ),
                [],
                |row| row.get(0),
            )?;
            counts.set(collection, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }

    /// Read a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Write a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Get store statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let pending = self.pending_counts()?;

        let mut synced = 0;
        let mut quarantined = 0;
        for collection in Collection::ALL {
            synced += self.count(collection, IndexQuery::Synced(true))?;
            quarantined += self.count(collection, IndexQuery::Quarantined(true))?;
        }

        let (cached_entities, conflicts) = {
            let conn = self.conn()?;
            let entities: i64 =
                conn.query_row("SELECT COUNT(*) FROM cached_entities", [], |row| row.get(0))?;
            let conflicts: i64 =
                conn.query_row("SELECT COUNT(*) FROM sync_conflicts", [], |row| row.get(0))?;
            (entities, conflicts)
        };

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStats {
            pending,
            synced,
            quarantined,
            cached_entities: u64::try_from(cached_entities).unwrap_or(0),
            conflicts: u64::try_from(conflicts).unwrap_or(0),
            db_size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures;

    fn create_test_store() -> Store {
        Store::open_in_memory().expect("failed to create test store")
    }

    #[test]
    fn test_open_in_memory() {
        assert!(Store::open_in_memory().is_ok());
    }

    #[test]
    fn test_add_and_get() {
        let store = create_test_store();
        let capture = fixtures::attendance(42);

        let id = store.add(&capture).unwrap();
        let record = store.get(Collection::Attendance, id).unwrap().unwrap();

        assert_eq!(record.capture, capture);
        assert!(!record.synced);
        assert!(record.synced_at.is_none());
        assert!(record.is_pending());
    }

    #[test]
    fn test_ids_increase_within_collection() {
        let store = create_test_store();
        let first = store.add(&fixtures::attendance(1)).unwrap();
        let second = store.add(&fixtures::attendance(2)).unwrap();
        assert!(second > first);

        // Other collections keep their own sequence.
        let logbook = store.add(&fixtures::logbook(1)).unwrap();
        assert_eq!(logbook, 1);
    }

    #[test]
    fn test_get_from_wrong_collection_is_absent() {
        let store = create_test_store();
        let id = store.add(&fixtures::attendance(1)).unwrap();
        assert!(store.get(Collection::Evidence, id).unwrap().is_none());
    }

    #[test]
    fn test_query_by_index() {
        let store = create_test_store();
        store.add(&fixtures::assessment(5, 9)).unwrap();
        store.add(&fixtures::assessment(5, 10)).unwrap();
        store.add(&fixtures::assessment(6, 9)).unwrap();

        let by_schedule = store
            .query_by_index(Collection::AssessmentResults, IndexQuery::ScheduleId(5))
            .unwrap();
        assert_eq!(by_schedule.len(), 2);

        let by_enrollment = store
            .query_by_index(Collection::AssessmentResults, IndexQuery::EnrollmentId(9))
            .unwrap();
        assert_eq!(by_enrollment.len(), 2);
    }

    #[test]
    fn test_query_unsupported_index() {
        let store = create_test_store();
        let err = store
            .query_by_index(Collection::Attendance, IndexQuery::ScheduleId(1))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedIndex { .. }));
        assert!(store
            .count(Collection::Evidence, IndexQuery::LearnerId(1))
            .is_err());
    }

    #[test]
    fn test_mark_synced_flips_once() {
        let store = create_test_store();
        let id = store.add(&fixtures::logbook(1)).unwrap();

        assert!(store.mark_synced(Collection::Logbook, id).unwrap());
        assert!(!store.mark_synced(Collection::Logbook, id).unwrap());

        let record = store.get(Collection::Logbook, id).unwrap().unwrap();
        assert!(record.synced);
        assert!(record.synced_at.is_some());
        assert_eq!(
            store
                .count(Collection::Logbook, IndexQuery::Synced(false))
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_record_failure_quarantines_after_rejections() {
        let store = create_test_store();
        let id = store.add(&fixtures::evidence(7)).unwrap();

        let outcome = store
            .record_failure(Collection::Evidence, id, "timeout", false, 2)
            .unwrap()
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.rejections, 0);
        assert!(!outcome.quarantined);

        store
            .record_failure(Collection::Evidence, id, "422", true, 2)
            .unwrap();
        let outcome = store
            .record_failure(Collection::Evidence, id, "422", true, 2)
            .unwrap()
            .unwrap();
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.rejections, 2);
        assert!(outcome.quarantined);

        assert!(store.pending(Collection::Evidence).unwrap().is_empty());
        let record = store.get(Collection::Evidence, id).unwrap().unwrap();
        assert_eq!(record.last_error.as_deref(), Some("422"));

        assert!(store.release(Collection::Evidence, id).unwrap());
        assert_eq!(store.pending(Collection::Evidence).unwrap().len(), 1);
    }

    #[test]
    fn test_record_failure_on_synced_record() {
        let store = create_test_store();
        let id = store.add(&fixtures::logbook(1)).unwrap();
        store.mark_synced(Collection::Logbook, id).unwrap();

        assert!(store
            .record_failure(Collection::Logbook, id, "late failure", false, 5)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_delete() {
        let store = create_test_store();
        let id = store.add(&fixtures::attendance(1)).unwrap();

        assert!(store.delete(Collection::Attendance, id).unwrap());
        assert!(store.get(Collection::Attendance, id).unwrap().is_none());
        assert!(!store.delete(Collection::Attendance, id).unwrap());
    }

    #[test]
    fn test_purge_synced() {
        let store = create_test_store();
        let synced = store.add(&fixtures::attendance(1)).unwrap();
        let pending = store.add(&fixtures::attendance(2)).unwrap();
        store.mark_synced(Collection::Attendance, synced).unwrap();

        // Retention not yet elapsed.
        assert_eq!(
            store
                .purge_synced(Collection::Attendance, Duration::from_secs(3600))
                .unwrap(),
            0
        );

        assert_eq!(
            store
                .purge_synced(Collection::Attendance, Duration::ZERO)
                .unwrap(),
            1
        );
        assert!(store.get(Collection::Attendance, synced).unwrap().is_none());
        assert!(store.get(Collection::Attendance, pending).unwrap().is_some());
    }

    #[test]
    fn test_pending_counts() {
        let store = create_test_store();
        store.add(&fixtures::attendance(1)).unwrap();
        store.add(&fixtures::attendance(2)).unwrap();
        let id = store.add(&fixtures::evidence(3)).unwrap();
        store.mark_synced(Collection::Evidence, id).unwrap();

        let counts = store.pending_counts().unwrap();
        assert_eq!(counts.attendance, 2);
        assert_eq!(counts.evidence, 0);
        assert_eq!(counts.total(), 2);
        assert_eq!(counts.get(Collection::Attendance), 2);
    }

    #[test]
    fn test_pending_quarantines_undecodable_rows() {
        let store = create_test_store();
        let first = store.add(&fixtures::logbook(1)).unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO logbook_queue (offline_id, payload, client_timestamp)
                 VALUES (?1, '{}', 'bad')",
                params![Uuid::new_v4().to_string()],
            )
            .unwrap();
        let last = store.add(&fixtures::logbook(2)).unwrap();

        let pending = store.pending(Collection::Logbook).unwrap();
        let ids: Vec<i64> = pending.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first, last]);

        // The corrupt row no longer counts as pending work.
        assert_eq!(store.pending_counts().unwrap().logbook, 2);
        assert_eq!(
            store
                .count(Collection::Logbook, IndexQuery::Quarantined(true))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_metadata() {
        let store = create_test_store();
        assert!(store.get_meta("active_cache_version").unwrap().is_none());
        store.set_meta("active_cache_version", "v2").unwrap();
        assert_eq!(
            store.get_meta("active_cache_version").unwrap().as_deref(),
            Some("v2")
        );
    }

    #[test]
    fn test_stats() {
        let store = create_test_store();
        store.add(&fixtures::attendance(1)).unwrap();
        let id = store.add(&fixtures::logbook(1)).unwrap();
        store.mark_synced(Collection::Logbook, id).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending.total(), 1);
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.quarantined, 0);
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_reopen_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fieldsync.db");

        let id = {
            let store = Store::open(&path).unwrap();
            store.add(&fixtures::assessment(5, 9)).unwrap()
        };

        let store = Store::open(&path).unwrap();
        let record = store.get(Collection::AssessmentResults, id).unwrap();
        assert!(record.is_some());
        assert!(store.stats().unwrap().db_size_bytes > 0);
    }

    #[test]
    fn test_open_unwritable_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file.
        let err = Store::open(dir.path()).unwrap_err();
        assert!(err.is_store_unavailable(), "unexpected error: {err}");
    }
}
