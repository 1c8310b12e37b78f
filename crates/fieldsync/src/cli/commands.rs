//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands and turns
//! capture arguments into [`Capture`] values.

use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use clap::{Args, Subcommand, ValueEnum};

use crate::record::{
    AssessmentOutcome, AssessmentPayload, AttendancePayload, AttendanceStatus, Capture,
    EvidencePayload, LogbookPayload, RecordKind,
};
use crate::store::Collection;

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Record a capture.
#[derive(Debug, Subcommand)]
pub enum CaptureCommand {
    /// Record attendance for a learner
    Attendance {
        /// Learner id
        #[arg(short, long)]
        learner: i64,

        /// Attendance status
        #[arg(short, long, value_enum, default_value = "present")]
        status: AttendanceArg,

        /// Day being recorded (defaults to today)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Workplace placement id
        #[arg(long)]
        placement: Option<i64>,

        /// Clock-in time (HH:MM)
        #[arg(long)]
        time_in: Option<String>,

        /// Clock-out time (HH:MM)
        #[arg(long)]
        time_out: Option<String>,

        /// Hours worked
        #[arg(long)]
        hours: Option<f64>,

        /// Notes
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Record a logbook entry
    Logbook {
        /// Learner id
        #[arg(short, long)]
        learner: i64,

        /// Tasks performed
        #[arg(short, long)]
        tasks: String,

        /// Day the work was done (defaults to today)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Workplace placement id
        #[arg(long)]
        placement: Option<i64>,

        /// Hours spent
        #[arg(long)]
        hours: Option<f64>,

        /// Reflection
        #[arg(short, long)]
        reflection: Option<String>,
    },

    /// Record an assessment result
    Assessment {
        /// Assessment schedule id
        #[arg(short, long)]
        schedule: i64,

        /// Enrollment id
        #[arg(short, long)]
        enrollment: i64,

        /// Activity id
        #[arg(short, long)]
        activity: i64,

        /// Outcome
        #[arg(short, long, value_enum)]
        result: OutcomeArg,

        /// Assessor comments
        #[arg(long)]
        comments: Option<String>,
    },

    /// Attach photo evidence to an assessment result
    Evidence {
        /// Assessment result id
        #[arg(short, long)]
        result: i64,

        /// Image as a data URL
        #[arg(short, long)]
        image: String,

        /// Caption
        #[arg(short, long)]
        description: Option<String>,
    },
}

impl CaptureCommand {
    /// Build the capture these arguments describe.
    #[must_use]
    pub fn into_capture(self) -> Capture {
        let today = || Utc::now().date_naive();
        match self {
            Self::Attendance {
                learner,
                status,
                date,
                placement,
                time_in,
                time_out,
                hours,
                notes,
            } => Capture::attendance(AttendancePayload {
                learner_id: learner,
                placement_id: placement,
                date: date.unwrap_or_else(today),
                status: status.into(),
                time_in,
                time_out,
                hours_worked: hours,
                notes,
            }),
            Self::Logbook {
                learner,
                tasks,
                date,
                placement,
                hours,
                reflection,
            } => Capture::logbook(LogbookPayload {
                learner_id: learner,
                placement_id: placement,
                entry_date: date.unwrap_or_else(today),
                hours,
                tasks,
                reflection,
            }),
            Self::Assessment {
                schedule,
                enrollment,
                activity,
                result,
                comments,
            } => Capture::assessment(AssessmentPayload {
                schedule_id: schedule,
                enrollment_id: enrollment,
                activity_id: activity,
                result: result.into(),
                comments,
            }),
            Self::Evidence {
                result,
                image,
                description,
            } => Capture::evidence(EvidencePayload {
                result_id: result,
                image_data: image,
                description,
            }),
        }
    }
}

/// Sync command arguments.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Only deliver pending photo evidence
    #[arg(long)]
    pub evidence_only: bool,

    /// Output the report as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Pending command arguments.
#[derive(Debug, Args)]
pub struct PendingCommand {
    /// Only list records of this kind
    #[arg(short, long, value_enum)]
    pub kind: Option<KindArg>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

impl PendingCommand {
    /// Collections to list.
    #[must_use]
    pub fn collections(&self) -> Vec<Collection> {
        match self.kind {
            Some(kind) => vec![RecordKind::from(kind).collection()],
            None => Collection::ALL.to_vec(),
        }
    }
}

/// Conflicts command arguments.
#[derive(Debug, Args)]
pub struct ConflictsCommand {
    /// Maximum number of entries
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Release command arguments.
#[derive(Debug, Args)]
pub struct ReleaseCommand {
    /// Record kind
    #[arg(value_enum)]
    pub kind: KindArg,

    /// Local record id
    pub id: i64,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Record kind argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// Attendance
    Attendance,
    /// Logbook entries
    Logbook,
    /// Assessment results
    Assessment,
    /// Photo evidence
    Evidence,
}

impl From<KindArg> for RecordKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Attendance => Self::Attendance,
            KindArg::Logbook => Self::LogbookEntry,
            KindArg::Assessment => Self::AssessmentResult,
            KindArg::Evidence => Self::Evidence,
        }
    }
}

/// Attendance status argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AttendanceArg {
    /// Present
    Present,
    /// Absent
    Absent,
    /// Late
    Late,
    /// Excused
    Excused,
    /// Sick
    Sick,
    /// On leave
    Leave,
}

impl From<AttendanceArg> for AttendanceStatus {
    fn from(arg: AttendanceArg) -> Self {
        match arg {
            AttendanceArg::Present => Self::Present,
            AttendanceArg::Absent => Self::Absent,
            AttendanceArg::Late => Self::Late,
            AttendanceArg::Excused => Self::Excused,
            AttendanceArg::Sick => Self::Sick,
            AttendanceArg::Leave => Self::Leave,
        }
    }
}

/// Assessment outcome argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutcomeArg {
    /// Competent
    #[value(name = "c")]
    Competent,
    /// Not yet competent
    #[value(name = "nyc")]
    NotYetCompetent,
    /// Absent
    #[value(name = "abs")]
    Absent,
    /// Deferred
    #[value(name = "def")]
    Deferred,
}

impl From<OutcomeArg> for AssessmentOutcome {
    fn from(arg: OutcomeArg) -> Self {
        match arg {
            OutcomeArg::Competent => Self::Competent,
            OutcomeArg::NotYetCompetent => Self::NotYetCompetent,
            OutcomeArg::Absent => Self::Absent,
            OutcomeArg::Deferred => Self::Deferred,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CapturePayload;

    #[test]
    fn test_kind_arg_conversion() {
        assert_eq!(RecordKind::from(KindArg::Attendance), RecordKind::Attendance);
        assert_eq!(RecordKind::from(KindArg::Logbook), RecordKind::LogbookEntry);
        assert_eq!(
            RecordKind::from(KindArg::Assessment),
            RecordKind::AssessmentResult
        );
        assert_eq!(RecordKind::from(KindArg::Evidence), RecordKind::Evidence);
    }

    #[test]
    fn test_outcome_arg_conversion() {
        assert_eq!(
            AssessmentOutcome::from(OutcomeArg::NotYetCompetent),
            AssessmentOutcome::NotYetCompetent
        );
        assert_eq!(
            AssessmentOutcome::from(OutcomeArg::Deferred),
            AssessmentOutcome::Deferred
        );
    }

    #[test]
    fn test_attendance_defaults_to_today() {
        let capture = CaptureCommand::Attendance {
            learner: 42,
            status: AttendanceArg::Late,
            date: None,
            placement: None,
            time_in: Some("08:15".to_string()),
            time_out: None,
            hours: None,
            notes: None,
        }
        .into_capture();

        let CapturePayload::Attendance(payload) = capture.payload else {
            panic!("expected attendance");
        };
        assert_eq!(payload.learner_id, 42);
        assert_eq!(payload.status, AttendanceStatus::Late);
        assert_eq!(payload.date, Utc::now().date_naive());
        assert_eq!(payload.time_in.as_deref(), Some("08:15"));
    }

    #[test]
    fn test_evidence_capture() {
        let capture = CaptureCommand::Evidence {
            result: 7,
            image: "data:image/png;base64,AAAA".to_string(),
            description: None,
        }
        .into_capture();

        assert_eq!(capture.kind(), RecordKind::Evidence);
        assert_eq!(capture.payload.index_values().result_id, Some(7));
    }

    #[test]
    fn test_pending_collections() {
        let all = PendingCommand {
            kind: None,
            json: false,
        };
        assert_eq!(all.collections().len(), 4);

        let one = PendingCommand {
            kind: Some(KindArg::Assessment),
            json: false,
        };
        assert_eq!(one.collections(), vec![Collection::AssessmentResults]);
    }
}
