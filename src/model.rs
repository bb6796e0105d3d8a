//! Core data model.
//!
//! A record is one account to upsert remotely. Its `code` is the natural key:
//! the remote side rejects a second account with the same code, which we treat
//! as success. Records are immutable once loaded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One account to upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Record {
    /// Natural key. The remote system dedups on this.
    pub code: String,

    pub name: String,

    /// Account category, e.g. "EXPENSE". Sent as `Type`.
    #[serde(rename = "Type")]
    pub account_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Record {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        account_type: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            account_type: account_type.into(),
            description: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Where a record is in its worker's retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Sitting in a worker's inbox.
    Dispatched,
    /// Remote call in progress.
    Attempting,
    /// Last attempt failed, waiting out the retry delay.
    Retrying,
    /// Uploaded, already present remotely, or out of attempts. Terminal.
    Done,
}

impl RecordState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: RecordState) -> bool {
        use RecordState::*;
        matches!(
            (self, to),
            (Dispatched, Attempting)
                | (Attempting, Done)
                | (Attempting, Retrying)
                | (Retrying, Attempting)
                | (Retrying, Done) // budget spent
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RecordState::Done)
    }
}

impl std::fmt::Display for RecordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordState::Dispatched => "dispatched",
            RecordState::Attempting => "attempting",
            RecordState::Retrying => "retrying",
            RecordState::Done => "done",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How a record reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Remote call succeeded.
    Uploaded,
    /// Remote rejected the code as a duplicate. Counts as success.
    AlreadyExists,
    /// Every attempt failed.
    Exhausted { last_error: String },
    /// The worker went away before the record finished.
    Abandoned { reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Uploaded | Outcome::AlreadyExists)
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Uploaded => "uploaded",
            Outcome::AlreadyExists => "already_exists",
            Outcome::Exhausted { .. } => "exhausted",
            Outcome::Abandoned { .. } => "abandoned",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Exhausted { last_error } => write!(f, "exhausted: {last_error}"),
            Outcome::Abandoned { reason } => write!(f, "abandoned: {reason}"),
            other => write!(f, "{}", other.label()),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Terminal result for one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordReport {
    /// Position in the submitted batch.
    pub index: usize,
    pub code: String,
    /// Worker that handled it. None if it never reached one.
    pub worker: Option<usize>,
    /// Remote calls made.
    pub attempts: u32,
    /// Time between delivery to the worker and its first attempt.
    /// None if no attempt was made.
    pub inbox_wait_ms: Option<u64>,
    pub outcome: Outcome,
    pub finished_at: DateTime<Utc>,
}

/// Result of a whole batch, records in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub records: Vec<RecordReport>,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn uploaded(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Uploaded))
    }

    pub fn already_existed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::AlreadyExists))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| !o.is_success())
    }

    /// True when no record was exhausted or abandoned.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }
}
