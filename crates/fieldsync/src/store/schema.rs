//! `SQLite` schema definitions for fieldsync.
//!
//! `BASE_SCHEMA` is the version 1 layout. Later versions are applied by the
//! migrations in [`super::migrations`].

/// Columns shared by every pending-record table in version 1.
macro_rules! pending_table {
    ($name:literal) => {
        concat!(
            "CREATE TABLE IF NOT EXISTS ",
            $name,
            " (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    offline_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    client_timestamp TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT,
    learner_id INTEGER,
    schedule_id INTEGER,
    enrollment_id INTEGER,
    result_id INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)"
        )
    };
}

/// Attendance pending queue.
pub const CREATE_ATTENDANCE_TABLE: &str = pending_table!("attendance_queue");

/// Logbook pending queue.
pub const CREATE_LOGBOOK_TABLE: &str = pending_table!("logbook_queue");

/// Pending assessment results.
pub const CREATE_RESULTS_TABLE: &str = pending_table!("assessment_results");

/// Pending assessment evidence.
pub const CREATE_EVIDENCE_TABLE: &str = pending_table!("assessment_evidence");

/// Version 1 secondary indexes.
pub const CREATE_BASE_INDEXES: &str = r"
CREATE INDEX IF NOT EXISTS idx_attendance_synced ON attendance_queue(synced);
CREATE INDEX IF NOT EXISTS idx_attendance_learner ON attendance_queue(learner_id);
CREATE INDEX IF NOT EXISTS idx_logbook_synced ON logbook_queue(synced);
CREATE INDEX IF NOT EXISTS idx_logbook_learner ON logbook_queue(learner_id);
CREATE INDEX IF NOT EXISTS idx_results_synced ON assessment_results(synced);
CREATE INDEX IF NOT EXISTS idx_results_schedule ON assessment_results(schedule_id);
CREATE INDEX IF NOT EXISTS idx_results_enrollment ON assessment_results(enrollment_id);
CREATE INDEX IF NOT EXISTS idx_evidence_synced ON assessment_evidence(synced);
CREATE INDEX IF NOT EXISTS idx_evidence_result ON assessment_evidence(result_id);
";

/// Cached server snapshots, one row per entity.
pub const CREATE_ENTITIES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS cached_entities (
    kind TEXT NOT NULL,
    remote_id INTEGER NOT NULL,
    data TEXT NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (kind, remote_id)
)
";

/// Key-value metadata (schema version, active cache version).
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// Version 1 statements in order.
pub const BASE_SCHEMA: &[&str] = &[
    CREATE_ATTENDANCE_TABLE,
    CREATE_LOGBOOK_TABLE,
    CREATE_RESULTS_TABLE,
    CREATE_EVIDENCE_TABLE,
    CREATE_BASE_INDEXES,
    CREATE_ENTITIES_TABLE,
    CREATE_METADATA_TABLE,
];

/// Version 2: retry bookkeeping on every pending table.
pub const V2_RETRY_COLUMNS: &str = r"
ALTER TABLE attendance_queue ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0;
ALTER TABLE attendance_queue ADD COLUMN rejections INTEGER NOT NULL DEFAULT 0;
ALTER TABLE attendance_queue ADD COLUMN last_error TEXT;
ALTER TABLE attendance_queue ADD COLUMN quarantined INTEGER NOT NULL DEFAULT 0;
ALTER TABLE logbook_queue ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0;
ALTER TABLE logbook_queue ADD COLUMN rejections INTEGER NOT NULL DEFAULT 0;
ALTER TABLE logbook_queue ADD COLUMN last_error TEXT;
ALTER TABLE logbook_queue ADD COLUMN quarantined INTEGER NOT NULL DEFAULT 0;
ALTER TABLE assessment_results ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0;
ALTER TABLE assessment_results ADD COLUMN rejections INTEGER NOT NULL DEFAULT 0;
ALTER TABLE assessment_results ADD COLUMN last_error TEXT;
ALTER TABLE assessment_results ADD COLUMN quarantined INTEGER NOT NULL DEFAULT 0;
ALTER TABLE assessment_evidence ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0;
ALTER TABLE assessment_evidence ADD COLUMN rejections INTEGER NOT NULL DEFAULT 0;
ALTER TABLE assessment_evidence ADD COLUMN last_error TEXT;
ALTER TABLE assessment_evidence ADD COLUMN quarantined INTEGER NOT NULL DEFAULT 0;
CREATE INDEX IF NOT EXISTS idx_attendance_quarantined ON attendance_queue(quarantined);
CREATE INDEX IF NOT EXISTS idx_logbook_quarantined ON logbook_queue(quarantined);
CREATE INDEX IF NOT EXISTS idx_results_quarantined ON assessment_results(quarantined);
CREATE INDEX IF NOT EXISTS idx_evidence_quarantined ON assessment_evidence(quarantined);
";

/// Version 2: conflict audit log.
pub const V2_CONFLICTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sync_conflicts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    offline_id TEXT NOT NULL,
    record_id INTEGER,
    remote_value TEXT NOT NULL,
    client_value TEXT NOT NULL,
    resolution TEXT NOT NULL,
    recorded_at TEXT NOT NULL
)
";

/// Version 2: response cache used by the interceptor.
pub const V2_HTTP_CACHE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS http_cache (
    cache_name TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    path TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (cache_name, cache_key)
)
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_schema_not_empty() {
        assert!(!BASE_SCHEMA.is_empty());
        for stmt in BASE_SCHEMA {
            assert!(!stmt.is_empty());
        }
    }

    #[test]
    fn test_pending_tables_contain_required_columns() {
        for table in [
            CREATE_ATTENDANCE_TABLE,
            CREATE_LOGBOOK_TABLE,
            CREATE_RESULTS_TABLE,
            CREATE_EVIDENCE_TABLE,
        ] {
            assert!(table.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
            assert!(table.contains("offline_id TEXT NOT NULL"));
            assert!(table.contains("synced INTEGER NOT NULL DEFAULT 0"));
        }
        assert!(CREATE_EVIDENCE_TABLE.contains("assessment_evidence"));
    }

    #[test]
    fn test_entities_table_keyed_by_kind_and_remote_id() {
        assert!(CREATE_ENTITIES_TABLE.contains("PRIMARY KEY (kind, remote_id)"));
    }
}
