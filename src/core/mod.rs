//! Core reply pipeline.
//!
//! This module contains:
//! - Normalizer: raw payloads to canonical events
//! - Ledger: SQLite at-most-once outcome store
//! - Filters: fixed-order skip rules
//! - Orchestrator: per-event state machine, poll cycle, webhook batches
//! - Scheduler: non-overlapping periodic cycles

pub mod filters;
pub mod ledger;
pub mod normalizer;
pub mod orchestrator;
pub mod scheduler;

// Re-export commonly used types
pub use ledger::{Ledger, LedgerError};
pub use normalizer::{NormalizeError, WebhookBatch};
pub use orchestrator::{clean_reply, Orchestrator, PipelineSettings, MAX_CONTEXT_WINDOW};
pub use scheduler::{CycleRunner, Scheduler, SchedulerError, SchedulerHandle, SchedulerReport};
