//! Sync engine and the triggers that drive it.

mod engine;
pub mod trigger;

pub use engine::{StoreSlot, SubmitOutcome, SyncEngine, SyncOutcome, SyncReport, SyncSettings};
pub use trigger::{
    BackgroundScheduler, BackgroundTag, ControlMessage, DeferredScheduler, Dispatcher, SyncTrigger,
};
