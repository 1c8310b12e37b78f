//! `fieldsync` - Offline-first capture and sync for workplace training records
//!
//! Mentors capture attendance, logbook entries, assessment results and photo
//! evidence in places with poor connectivity. Every capture is either
//! delivered to the platform immediately or written to a local SQLite queue
//! and delivered later, when connectivity returns, by a single-flight sync
//! pass.
//!
//! The main pieces:
//!
//! - [`store::Store`] keeps pending records, cached entities and HTTP
//!   responses on disk.
//! - [`monitor::ConnectivityMonitor`] tracks whether the platform is
//!   reachable and notifies subscribers on transitions.
//! - [`sync::SyncEngine`] submits captures and drains the queue.
//! - [`intercept::Interceptor`] routes outgoing requests through the
//!   offline-aware cache and queue.
//! - [`runtime::FieldSync`] wires all of the above together.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod entity;
pub mod error;
pub mod intercept;
pub mod logging;
pub mod monitor;
pub mod record;
pub mod remote;
pub mod runtime;
pub mod status;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use record::{Capture, CapturePayload, PendingRecord, RecordKind};
pub use remote::{HttpRequest, HttpResponse, HttpTransport, Transport};
pub use runtime::FieldSync;
pub use status::{StatusBus, StatusEvent, StatusSnapshot};
pub use store::{Store, StoreStats};
pub use sync::{SyncEngine, SyncReport};
