//! Outcomes, ledger rows, and per-cycle counters.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::EventKind;

/// Why an event was closed without generating a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Authored by the page itself
    SelfOrigin,
    /// Comment hidden by a moderator
    Hidden,
    /// Messenger echo of a page-sent message
    Echo,
    /// No text, or whitespace only
    Empty,
    /// The page already answered this comment
    AlreadyReplied,
    /// Another ingestion path reserved this id first
    AlreadyClaimed,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SelfOrigin => "self",
            Self::Hidden => "hidden",
            Self::Echo => "echo",
            Self::Empty => "empty",
            Self::AlreadyReplied => "already-replied",
            Self::AlreadyClaimed => "already-claimed",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an event that passed the filters got no reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorReason {
    GenerationFailed,
    DispatchFailed,
    /// Fault caught at the per-event boundary
    Internal(String),
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenerationFailed => f.write_str("generation failed"),
            Self::DispatchFailed => f.write_str("dispatch failed"),
            Self::Internal(detail) => write!(f, "internal error: {}", detail),
        }
    }
}

/// Terminal state of one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Replied {
        reply: String,
    },
    Skipped {
        reason: SkipReason,
        /// The page's earlier reply, for `AlreadyReplied`
        existing_reply: Option<String>,
    },
    Errored {
        reason: ErrorReason,
        /// Generated text that could not be delivered
        reply: Option<String>,
    },
}

impl Outcome {
    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped {
            reason,
            existing_reply: None,
        }
    }

    pub fn errored(reason: ErrorReason) -> Self {
        Self::Errored {
            reason,
            reply: None,
        }
    }

    /// Whether the customer has a reply from the page
    pub fn replied(&self) -> bool {
        matches!(
            self,
            Self::Replied { .. }
                | Self::Skipped {
                    reason: SkipReason::AlreadyReplied,
                    ..
                }
        )
    }

    pub fn reply_text(&self) -> Option<&str> {
        match self {
            Self::Replied { reply } => Some(reply),
            Self::Skipped { existing_reply, .. } => existing_reply.as_deref(),
            Self::Errored { reply, .. } => reply.as_deref(),
        }
    }

    /// Value of the ledger's `error_reason` column
    pub fn error_reason(&self) -> Option<String> {
        match self {
            Self::Replied { .. } => None,
            Self::Skipped { reason, .. } => Some(reason.to_string()),
            Self::Errored { reason, .. } => Some(reason.to_string()),
        }
    }

    pub fn status(&self) -> RecordStatus {
        match self {
            Self::Replied { .. } => RecordStatus::Replied,
            Self::Skipped { .. } => RecordStatus::Skipped,
            Self::Errored { .. } => RecordStatus::Errored,
        }
    }
}

/// Result of running one event through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// A ledger record already existed; nothing was done
    Duplicate,

    /// This pass decided the event's terminal outcome
    Decided(Outcome),
}

/// Lifecycle column of a ledger row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Claimed; generation or dispatch in progress
    Pending,
    Replied,
    Skipped,
    Errored,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Replied => "replied",
            Self::Skipped => "skipped",
            Self::Errored => "errored",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "replied" => Some(Self::Replied),
            "skipped" => Some(Self::Skipped),
            "errored" => Some(Self::Errored),
            _ => None,
        }
    }
}

/// Permanent memory of how an event id was handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: String,
    pub kind: EventKind,
    pub thread_id: String,
    pub text: Option<String>,
    pub sender_name: Option<String>,
    pub sender_id: Option<String>,
    pub reply_text: Option<String>,
    pub replied: bool,
    pub error_reason: Option<String>,
    pub status: RecordStatus,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only observability row, never read by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub kind: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate ledger counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub total_comments: u64,
    pub replied_comments: u64,
    pub total_messages: u64,
    pub replied_messages: u64,
}

/// Counters for one orchestration cycle (not persisted)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    /// Threads (posts, conversations) or payload entries inspected
    pub checked: usize,
    /// Candidate events found
    pub found: usize,
    /// Events whose outcome this cycle decided
    pub new_count: usize,
    pub replies_sent: usize,
    pub errors: usize,
}

impl CycleStats {
    /// Fold one event's disposition into the counters
    pub fn tally(&mut self, disposition: &Disposition) {
        let Disposition::Decided(outcome) = disposition else {
            return;
        };
        match outcome {
            Outcome::Skipped {
                reason: SkipReason::AlreadyClaimed,
                ..
            } => {}
            Outcome::Replied { .. } => {
                self.new_count += 1;
                self.replies_sent += 1;
            }
            Outcome::Skipped { .. } => self.new_count += 1,
            Outcome::Errored { .. } => {
                self.new_count += 1;
                self.errors += 1;
            }
        }
    }

    pub fn merge(&mut self, other: &CycleStats) {
        self.checked += other.checked;
        self.found += other.found;
        self.new_count += other.new_count;
        self.replies_sent += other.replies_sent;
        self.errors += other.errors;
    }

    pub fn summary(&self) -> String {
        format!(
            "checked {}, found {}, new {}, replied {}, errors {}",
            self.checked, self.found, self.new_count, self.replies_sent, self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_ledger_columns() {
        let replied = Outcome::Replied {
            reply: "Thanks!".to_string(),
        };
        assert!(replied.replied());
        assert_eq!(replied.error_reason(), None);

        let already = Outcome::Skipped {
            reason: SkipReason::AlreadyReplied,
            existing_reply: Some("earlier".to_string()),
        };
        assert!(already.replied());
        assert_eq!(already.reply_text(), Some("earlier"));
        assert_eq!(already.error_reason().as_deref(), Some("already-replied"));

        let empty = Outcome::skipped(SkipReason::Empty);
        assert!(!empty.replied());
        assert_eq!(empty.error_reason().as_deref(), Some("empty"));

        let failed = Outcome::errored(ErrorReason::GenerationFailed);
        assert_eq!(failed.error_reason().as_deref(), Some("generation failed"));
        assert_eq!(failed.status(), RecordStatus::Errored);
    }

    #[test]
    fn test_tally_ignores_duplicates_and_lost_races() {
        let mut stats = CycleStats::default();
        stats.tally(&Disposition::Duplicate);
        stats.tally(&Disposition::Decided(Outcome::skipped(SkipReason::AlreadyClaimed)));
        assert_eq!(stats, CycleStats::default());

        stats.tally(&Disposition::Decided(Outcome::Replied {
            reply: "ok".to_string(),
        }));
        stats.tally(&Disposition::Decided(Outcome::skipped(SkipReason::SelfOrigin)));
        stats.tally(&Disposition::Decided(Outcome::errored(ErrorReason::DispatchFailed)));
        assert_eq!(stats.new_count, 3);
        assert_eq!(stats.replies_sent, 1);
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn test_internal_reason_text() {
        let reason = ErrorReason::Internal("disk full".to_string());
        assert_eq!(reason.to_string(), "internal error: disk full");
    }
}
