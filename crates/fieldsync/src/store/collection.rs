//! Named collections of the local store and their secondary indexes.

use crate::record::RecordKind;

/// A pending-record collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Attendance pending queue.
    Attendance,
    /// Logbook pending queue.
    Logbook,
    /// Pending assessment results.
    AssessmentResults,
    /// Pending assessment evidence.
    Evidence,
}

/// An equality lookup on a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexQuery {
    /// Records by sync state.
    Synced(bool),
    /// Records by quarantine state.
    Quarantined(bool),
    /// Records for a learner.
    LearnerId(i64),
    /// Assessment results for a schedule.
    ScheduleId(i64),
    /// Assessment results for an enrollment.
    EnrollmentId(i64),
    /// Evidence for an assessment result.
    ResultId(i64),
}

impl IndexQuery {
    /// The indexed column.
    #[must_use]
    pub fn column(&self) -> &'static str {
        match self {
            Self::Synced(_) => "synced",
            Self::Quarantined(_) => "quarantined",
            Self::LearnerId(_) => "learner_id",
            Self::ScheduleId(_) => "schedule_id",
            Self::EnrollmentId(_) => "enrollment_id",
            Self::ResultId(_) => "result_id",
        }
    }

    /// The value to compare against.
    #[must_use]
    pub fn value(&self) -> i64 {
        match *self {
            Self::Synced(flag) | Self::Quarantined(flag) => i64::from(flag),
            Self::LearnerId(id)
            | Self::ScheduleId(id)
            | Self::EnrollmentId(id)
            | Self::ResultId(id) => id,
        }
    }
}

impl Collection {
    /// All pending collections, in sync order.
    pub const ALL: [Collection; 4] = [
        Self::Attendance,
        Self::Logbook,
        Self::AssessmentResults,
        Self::Evidence,
    ];

    /// Backing table name.
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::Attendance => "attendance_queue",
            Self::Logbook => "logbook_queue",
            Self::AssessmentResults => "assessment_results",
            Self::Evidence => "assessment_evidence",
        }
    }

    /// The record kind stored in this collection.
    #[must_use]
    pub fn kind(self) -> RecordKind {
        match self {
            Self::Attendance => RecordKind::Attendance,
            Self::Logbook => RecordKind::LogbookEntry,
            Self::AssessmentResults => RecordKind::AssessmentResult,
            Self::Evidence => RecordKind::Evidence,
        }
    }

    /// Secondary index columns declared by this collection.
    #[must_use]
    pub fn indexes(self) -> &'static [&'static str] {
        match self {
            Self::Attendance | Self::Logbook => &["synced", "quarantined", "learner_id"],
            Self::AssessmentResults => &["synced", "quarantined", "schedule_id", "enrollment_id"],
            Self::Evidence => &["synced", "quarantined", "result_id"],
        }
    }

    /// Whether the collection can answer the given lookup.
    #[must_use]
    pub fn supports(self, query: &IndexQuery) -> bool {
        self.indexes().contains(&query.column())
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}
