//! Domain types for the reply pipeline.
//!
//! This module contains the core data structures:
//! - Event: Normalized comment or message
//! - Record: Outcomes, ledger rows, activity entries, cycle counters

pub mod event;
pub mod record;

// Re-export commonly used types
pub use event::{Channel, CommentEvent, Event, EventKind, Ingress, MessageEvent, Sender};
pub use record::{
    ActivityLogEntry, CycleStats, Disposition, ErrorReason, LedgerRecord, LedgerStats, Outcome,
    RecordStatus, SkipReason,
};
