//! pagebot - At-most-once AI auto-replies for page comments and messages
//!
//! Watches a page for new comments and private messages, asks an AI model for
//! a reply, and posts it back. Events arrive from two paths: webhook pushes
//! and a scheduled poll.
//!
//! # Architecture
//!
//! The system is built around an idempotency ledger:
//! - Every event id is claimed in the ledger before any external call
//! - The first terminal outcome (replied, skipped, errored) is final
//! - A re-delivered or re-polled event never triggers a second reply
//!
//! # Modules
//!
//! - `adapters`: External system integrations (Gemini, Graph API)
//! - `core`: Normalizer, Ledger, Filters, Orchestrator, Scheduler
//! - `domain`: Data structures (Event, Outcome, LedgerRecord, CycleStats)
//! - `webhook`: Push endpoint (axum)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Poll and serve webhooks until Ctrl+C
//! pagebot run
//!
//! # One poll cycle
//! pagebot check
//!
//! # Inspect the ledger
//! pagebot stats
//! pagebot history --limit 10
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod webhook;

// Re-export main types at crate root for convenience
pub use adapters::{
    Dispatcher, GenerationError, GenerationRequest, Generator, PageSource, SourceError,
};
pub use config::Config;
pub use core::{Ledger, LedgerError, Orchestrator, PipelineSettings, Scheduler, SchedulerReport};
pub use domain::{
    CycleStats, Disposition, ErrorReason, Event, EventKind, LedgerRecord, Outcome, SkipReason,
};
