//! Error types for fieldsync.
//!
//! Capture-path failures are mostly absorbed by the sync engine; the variants
//! here still carry enough context to log them usefully and to decide whether
//! a failed submission belongs in the offline queue.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for fieldsync operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Store Errors ===
    /// The local store could not be opened. Offline saving is disabled.
    #[error("offline store unavailable at {path}: {source}")]
    StoreUnavailable {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// The store failed to open earlier, so offline saving is off.
    #[error("offline saving disabled: {reason}")]
    OfflineSavingDisabled {
        /// Why the store is unavailable.
        reason: String,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// A collection was queried on an index it does not declare.
    #[error("collection '{collection}' has no index '{index}'")]
    UnsupportedIndex {
        /// Collection name.
        collection: &'static str,
        /// Index name.
        index: &'static str,
    },

    /// A stored row could not be decoded back into a record.
    #[error("corrupt record {id} in '{collection}': {message}")]
    CorruptRecord {
        /// Collection name.
        collection: &'static str,
        /// Row id.
        id: i64,
        /// Description of the decoding failure.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Remote Errors ===
    /// The remote could not be reached (transient).
    #[error("network failure: {message}")]
    Network {
        /// Description of the transport failure.
        message: String,
    },

    /// The remote answered with a non-2xx status.
    #[error("remote rejected request with status {status}: {message}")]
    RemoteRejected {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    // === Sync Errors ===
    /// Some records in a sync pass could not be delivered.
    #[error("{failed} of {attempted} records failed to sync")]
    SyncPartialFailure {
        /// Records that stayed pending.
        failed: usize,
        /// Records attempted in the pass.
        attempted: usize,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for fieldsync operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new remote rejection error.
    #[must_use]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::RemoteRejected {
            status,
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error means offline saving is disabled.
    #[must_use]
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::OfflineSavingDisabled { .. }
        )
    }

    /// Check if a failed submission should fall back to the offline queue.
    #[must_use]
    pub fn should_queue_offline(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::RemoteRejected { .. })
    }

    /// Check if the remote refused the record for a reason retrying won't fix.
    ///
    /// Client errors count, except request timeout and rate limiting.
    #[must_use]
    pub fn is_permanent_rejection(&self) -> bool {
        match self {
            Self::RemoteRejected { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            _ => false,
        }
    }
}
