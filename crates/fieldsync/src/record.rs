//! Pending record types for fieldsync.
//!
//! A [`Capture`] is what a mentor records in the field. Once it has been
//! written to the local store it becomes a [`PendingRecord`] that waits for
//! the sync engine to deliver it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::remote::Endpoint;
use crate::store::Collection;

/// The kind of captured record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Daily workplace attendance.
    Attendance,
    /// A logbook entry describing work done.
    LogbookEntry,
    /// An assessment result for one activity.
    AssessmentResult,
    /// Photo evidence attached to an assessment result.
    Evidence,
}

impl RecordKind {
    /// All record kinds, in the order a sync pass visits them.
    pub const ALL: [RecordKind; 4] = [
        Self::Attendance,
        Self::LogbookEntry,
        Self::AssessmentResult,
        Self::Evidence,
    ];

    /// The store collection holding records of this kind.
    #[must_use]
    pub fn collection(self) -> Collection {
        match self {
            Self::Attendance => Collection::Attendance,
            Self::LogbookEntry => Collection::Logbook,
            Self::AssessmentResult => Collection::AssessmentResults,
            Self::Evidence => Collection::Evidence,
        }
    }

    /// The remote endpoint a single record of this kind is submitted to.
    #[must_use]
    pub fn endpoint(self) -> Endpoint {
        match self {
            Self::Attendance => Endpoint::AttendanceSubmit,
            Self::LogbookEntry => Endpoint::LogbookSubmit,
            Self::AssessmentResult => Endpoint::AssessmentQuickSave,
            Self::Evidence => Endpoint::AssessmentEvidence,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Attendance => write!(f, "attendance"),
            Self::LogbookEntry => write!(f, "logbook_entry"),
            Self::AssessmentResult => write!(f, "assessment_result"),
            Self::Evidence => write!(f, "evidence"),
        }
    }
}

/// Attendance status for a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// Learner was present.
    Present,
    /// Learner was absent.
    Absent,
    /// Learner arrived late.
    Late,
    /// Absence was excused.
    Excused,
    /// Learner was off sick.
    Sick,
    /// Learner was on approved leave.
    Leave,
}

/// Assessment outcome codes used by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssessmentOutcome {
    /// Competent.
    #[serde(rename = "C")]
    Competent,
    /// Not yet competent.
    #[serde(rename = "NYC")]
    NotYetCompetent,
    /// Absent.
    #[serde(rename = "ABS")]
    Absent,
    /// Deferred.
    #[serde(rename = "DEF")]
    Deferred,
}

/// Fields of an attendance capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendancePayload {
    /// Learner the attendance is for.
    pub learner_id: i64,
    /// Workplace placement, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_id: Option<i64>,
    /// Day being recorded.
    pub date: NaiveDate,
    /// Attendance status.
    pub status: AttendanceStatus,
    /// Clock-in time (`HH:MM`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_in: Option<String>,
    /// Clock-out time (`HH:MM`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_out: Option<String>,
    /// Hours worked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours_worked: Option<f64>,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Fields of a logbook capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogbookPayload {
    /// Learner the entry belongs to.
    pub learner_id: i64,
    /// Workplace placement, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_id: Option<i64>,
    /// Day the work was done.
    pub entry_date: NaiveDate,
    /// Hours spent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<f64>,
    /// Tasks performed.
    pub tasks: String,
    /// Learner or mentor reflection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<String>,
}

/// Fields of an assessment result capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentPayload {
    /// Assessment schedule the result was captured under.
    pub schedule_id: i64,
    /// Learner enrollment.
    pub enrollment_id: i64,
    /// Assessed activity.
    pub activity_id: i64,
    /// Outcome.
    pub result: AssessmentOutcome,
    /// Assessor comments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// Fields of an evidence capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidencePayload {
    /// Assessment result this evidence supports. Non-owning.
    pub result_id: i64,
    /// Image as a `data:` URL.
    pub image_data: String,
    /// Caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Kind-specific payload of a capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum CapturePayload {
    /// Attendance payload.
    Attendance(AttendancePayload),
    /// Logbook payload.
    LogbookEntry(LogbookPayload),
    /// Assessment result payload.
    AssessmentResult(AssessmentPayload),
    /// Evidence payload.
    Evidence(EvidencePayload),
}

/// Values of the secondary index columns for one payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexValues {
    /// `learner_id` column.
    pub learner_id: Option<i64>,
    /// `schedule_id` column.
    pub schedule_id: Option<i64>,
    /// `enrollment_id` column.
    pub enrollment_id: Option<i64>,
    /// `result_id` column.
    pub result_id: Option<i64>,
}

impl CapturePayload {
    /// The record kind of this payload.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Attendance(_) => RecordKind::Attendance,
            Self::LogbookEntry(_) => RecordKind::LogbookEntry,
            Self::AssessmentResult(_) => RecordKind::AssessmentResult,
            Self::Evidence(_) => RecordKind::Evidence,
        }
    }

    /// Extract the indexed fields.
    #[must_use]
    pub fn index_values(&self) -> IndexValues {
        match self {
            Self::Attendance(p) => IndexValues {
                learner_id: Some(p.learner_id),
                ..IndexValues::default()
            },
            Self::LogbookEntry(p) => IndexValues {
                learner_id: Some(p.learner_id),
                ..IndexValues::default()
            },
            Self::AssessmentResult(p) => IndexValues {
                schedule_id: Some(p.schedule_id),
                enrollment_id: Some(p.enrollment_id),
                ..IndexValues::default()
            },
            Self::Evidence(p) => IndexValues {
                result_id: Some(p.result_id),
                ..IndexValues::default()
            },
        }
    }

    /// The payload fields as a JSON object, without the kind tag.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn fields(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Attendance(p) => serde_json::to_value(p),
            Self::LogbookEntry(p) => serde_json::to_value(p),
            Self::AssessmentResult(p) => serde_json::to_value(p),
            Self::Evidence(p) => serde_json::to_value(p),
        }
    }
}

/// A unit of field data captured on this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capture {
    /// Client-generated id, stable across retries.
    pub offline_id: Uuid,
    /// When the capture was made.
    pub client_timestamp: DateTime<Utc>,
    /// What was captured.
    #[serde(flatten)]
    pub payload: CapturePayload,
}

impl Capture {
    /// Create a capture stamped with a fresh offline id and the current time.
    #[must_use]
    pub fn new(payload: CapturePayload) -> Self {
        Self {
            offline_id: Uuid::new_v4(),
            client_timestamp: Utc::now(),
            payload,
        }
    }

    /// Create an attendance capture.
    #[must_use]
    pub fn attendance(payload: AttendancePayload) -> Self {
        Self::new(CapturePayload::Attendance(payload))
    }

    /// Create a logbook capture.
    #[must_use]
    pub fn logbook(payload: LogbookPayload) -> Self {
        Self::new(CapturePayload::LogbookEntry(payload))
    }

    /// Create an assessment result capture.
    #[must_use]
    pub fn assessment(payload: AssessmentPayload) -> Self {
        Self::new(CapturePayload::AssessmentResult(payload))
    }

    /// Create an evidence capture.
    #[must_use]
    pub fn evidence(payload: EvidencePayload) -> Self {
        Self::new(CapturePayload::Evidence(payload))
    }

    /// The record kind.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        self.payload.kind()
    }

    /// The request body sent to the remote for this capture.
    ///
    /// Payload fields plus `offlineId` and `clientTimestamp`, so the remote
    /// can recognise a redelivery.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn wire_body(&self) -> serde_json::Result<serde_json::Value> {
        let mut body = self.payload.fields()?;
        if let serde_json::Value::Object(map) = &mut body {
            map.insert(
                "offlineId".to_string(),
                serde_json::Value::String(self.offline_id.to_string()),
            );
            map.insert(
                "clientTimestamp".to_string(),
                serde_json::Value::String(self.client_timestamp.to_rfc3339()),
            );
        }
        Ok(body)
    }
}

/// A capture persisted in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    /// Id assigned by the store, increasing within its collection.
    pub id: i64,
    /// The captured data.
    pub capture: Capture,
    /// Whether the remote has acknowledged it.
    pub synced: bool,
    /// When it was acknowledged.
    pub synced_at: Option<DateTime<Utc>>,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    /// Permanent rejections so far.
    pub rejections: u32,
    /// Last delivery error.
    pub last_error: Option<String>,
    /// Set when the record stopped being retried.
    pub quarantined: bool,
}

impl PendingRecord {
    /// The record kind.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        self.capture.kind()
    }

    /// Whether this record is part of the pending-sync working set.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.synced && !self.quarantined
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind_display() {
        assert_eq!(RecordKind::Attendance.to_string(), "attendance");
        assert_eq!(RecordKind::LogbookEntry.to_string(), "logbook_entry");
        assert_eq!(RecordKind::AssessmentResult.to_string(), "assessment_result");
        assert_eq!(RecordKind::Evidence.to_string(), "evidence");
    }

    #[test]
    fn test_record_kind_routing() {
        assert_eq!(RecordKind::Attendance.collection(), Collection::Attendance);
        assert_eq!(
            RecordKind::Evidence.endpoint().path(),
            "/assessments/evidence"
        );
        assert_eq!(
            RecordKind::AssessmentResult.endpoint().path(),
            "/assessments/quick-save"
        );
    }

    #[test]
    fn test_attendance_decodes_from_form_body() {
        let body = r#"{"learnerId": 42, "date": "2024-03-01", "status": "present"}"#;
        let payload: AttendancePayload = serde_json::from_str(body).unwrap();
        assert_eq!(payload.learner_id, 42);
        assert_eq!(payload.status, AttendanceStatus::Present);
        assert!(payload.placement_id.is_none());
    }

    #[test]
    fn test_assessment_outcome_codes() {
        let json = serde_json::to_string(&AssessmentOutcome::NotYetCompetent).unwrap();
        assert_eq!(json, "\"NYC\"");
        let parsed: AssessmentOutcome = serde_json::from_str("\"C\"").unwrap();
        assert_eq!(parsed, AssessmentOutcome::Competent);
    }

    #[test]
    fn test_capture_new_assigns_distinct_offline_ids() {
        let a = fixtures::attendance(1);
        let b = fixtures::attendance(1);
        assert_ne!(a.offline_id, b.offline_id);
        assert_eq!(a.kind(), RecordKind::Attendance);
    }

    #[test]
    fn test_wire_body_carries_offline_id() {
        let capture = fixtures::assessment(5, 9);
        let body = capture.wire_body().unwrap();

        assert_eq!(body["scheduleId"], 5);
        assert_eq!(body["enrollmentId"], 9);
        assert_eq!(body["result"], "C");
        assert_eq!(body["offlineId"], capture.offline_id.to_string());
        assert!(body.get("kind").is_none());
    }

    #[test]
    fn test_capture_serialization_is_tagged() {
        let capture = fixtures::evidence(7);
        let json = serde_json::to_value(&capture).unwrap();
        assert_eq!(json["kind"], "evidence");
        assert_eq!(json["payload"]["resultId"], 7);

        let back: Capture = serde_json::from_value(json).unwrap();
        assert_eq!(back, capture);
    }

    #[test]
    fn test_index_values() {
        let values = fixtures::assessment(5, 9).payload.index_values();
        assert_eq!(values.schedule_id, Some(5));
        assert_eq!(values.enrollment_id, Some(9));
        assert!(values.learner_id.is_none());

        let values = fixtures::evidence(7).payload.index_values();
        assert_eq!(values.result_id, Some(7));
    }
}
