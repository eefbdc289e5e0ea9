//! Per-record outcomes of a batch invocation.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which stage of a record failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    FetchError,
    RenderFailure,
    StoreError,
}

impl FailureKind {
    /// Fetch and store failures are transient from the batch's point of view;
    /// a malformed payload renders the same way on every attempt.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::RenderFailure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    /// A thumbnail was written to the destination bucket.
    Stored {
        width: u32,
        height: u32,
        size_bytes: usize,
    },
    /// The source content is not an image or document.
    Skipped,
    /// The destination key was deleted (or was already absent).
    Deleted,
    Ignored { reason: String },
    Failed {
        error: FailureKind,
        retryable: bool,
        message: String,
    },
}

impl RecordOutcome {
    pub fn failed(error: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed {
            error,
            retryable: error.is_retryable(),
            message: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub index: usize,
    pub key: String,
    pub event_name: String,
    #[serde(flatten)]
    pub outcome: RecordOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub message: String,
    pub processed: usize,
    pub failed: usize,
    pub records: Vec<RecordReport>,
    pub completed_at: DateTime<Utc>,
}

impl BatchReport {
    /// Build a report; records are sorted back into delivery order.
    pub fn from_records(mut records: Vec<RecordReport>) -> Self {
        records.sort_by_key(|r| r.index);
        let failed = records.iter().filter(|r| r.outcome.is_failure()).count();
        Self {
            message: if failed == 0 {
                "success".into()
            } else {
                "partial_failure".into()
            },
            processed: records.len(),
            failed,
            records,
            completed_at: Utc::now(),
        }
    }

    /// True when redelivering the batch could change the result.
    pub fn has_retryable_failure(&self) -> bool {
        self.records.iter().any(|r| {
            matches!(
                r.outcome,
                RecordOutcome::Failed {
                    retryable: true,
                    ..
                }
            )
        })
    }
}
