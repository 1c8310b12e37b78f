//! Cached reference entities and conflict audit entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-owned reference data kept for offline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Workplace placement.
    Placement,
    /// Learner profile.
    Learner,
    /// Assessment schedule.
    Schedule,
    /// Stored assessor signature.
    Signature,
}

impl EntityKind {
    /// All entity kinds.
    pub const ALL: [EntityKind; 4] = [
        Self::Placement,
        Self::Learner,
        Self::Schedule,
        Self::Signature,
    ];

    /// Stable name used as the storage discriminator.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Placement => "placement",
            Self::Learner => "learner",
            Self::Schedule => "schedule",
            Self::Signature => "signature",
        }
    }

    /// Parse a storage discriminator.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Guess the entity kind served by an API path.
    ///
    /// Matches the first path segment after an optional `/api` prefix, e.g.
    /// `/api/placements/` or `/learners/42/`.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.split('?').next().unwrap_or(path);
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let mut first = segments.next()?;
        if first == "api" {
            first = segments.next()?;
        }
        match first {
            "placements" => Some(Self::Placement),
            "learners" => Some(Self::Learner),
            "schedules" => Some(Self::Schedule),
            "signatures" => Some(Self::Signature),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known server snapshot of one entity.
///
/// At most one snapshot exists per `(kind, remote_id)`; a later write replaces
/// the earlier one wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntity {
    /// Entity kind.
    pub kind: EntityKind,
    /// Id assigned by the server.
    pub remote_id: i64,
    /// Full snapshot.
    pub data: serde_json::Value,
    /// When the snapshot was cached.
    pub cached_at: DateTime<Utc>,
}

impl CachedEntity {
    /// Build a snapshot from a JSON object carrying an integer `id`.
    #[must_use]
    pub fn from_json(kind: EntityKind, data: serde_json::Value) -> Option<Self> {
        let remote_id = data.get("id")?.as_i64()?;
        Some(Self {
            kind,
            remote_id,
            data,
            cached_at: Utc::now(),
        })
    }
}

/// Audit entry for a conflict the remote reported during a bulk sync.
///
/// The local value always wins; this row is the only trace of what the
/// server held before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Audit row id.
    pub id: Option<i64>,
    /// Offline id of the local record.
    pub offline_id: String,
    /// Local record id, when it could be matched.
    pub record_id: Option<i64>,
    /// Value the server held.
    pub remote_value: serde_json::Value,
    /// Value this device sent.
    pub client_value: serde_json::Value,
    /// Resolution applied.
    pub resolution: String,
    /// When the conflict was recorded.
    pub recorded_at: DateTime<Utc>,
}
