//! Result types returned by a run.
//!
//! A run never throws its partial work away: whether it completes, halts on
//! a fatal service answer or is cancelled, the caller gets a [`RunResult`]
//! with the artifact as it stood after the last committed batch, plus one
//! [`BatchRecord`] per batch explaining what happened to it.

use crate::document::Document;
use crate::error::{BatchError, RewriteError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Input exhausted and the final batch processed.
    Completed,
    /// A batch got a non-retryable answer, or the checkpoint policy said stop.
    HaltedOnFatalError,
    /// A cancel request was honoured between batches.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Completed => "completed",
            RunStatus::HaltedOnFatalError => "halted",
            RunStatus::Cancelled => "cancelled",
        })
    }
}

/// How a batch's result was committed to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchDisposition {
    /// The answer was written into the output.
    Applied,
    /// Audit mode only: the service reported no defects.
    Clean,
    /// The batch's paragraphs were left as they were.
    Unmodified,
    /// The run stopped at this batch.
    Halted,
}

/// What happened to one sealed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    /// 1-based batch number.
    pub sequence: u64,
    /// Indices of the source paragraphs the batch carried.
    pub paragraph_indices: Vec<usize>,
    /// Size of the request text in bytes.
    pub input_bytes: usize,
    /// Size of the service's answer in bytes (0 on failure).
    pub output_bytes: usize,
    /// Service calls made, first attempt included.
    pub attempts: u32,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    pub disposition: BatchDisposition,
    pub error: Option<BatchError>,
}

impl BatchRecord {
    pub fn is_success(&self) -> bool {
        matches!(
            self.disposition,
            BatchDisposition::Applied | BatchDisposition::Clean
        )
    }
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Paragraphs in the source document.
    pub total_paragraphs: usize,
    /// Paragraphs consumed from the source before the run stopped.
    pub paragraphs_consumed: usize,
    /// Paragraphs too short to send, copied through untouched.
    pub paragraphs_passed_through: usize,
    /// Paragraphs whose text the service replaced.
    pub paragraphs_rewritten: usize,
    /// Paragraphs that were sent but kept their original text.
    pub paragraphs_unmodified: usize,
    pub batches_total: usize,
    pub batches_succeeded: usize,
    /// Batches left unmodified after exhausting retries.
    pub batches_degraded: usize,
    /// Batches left unmodified because segments did not line up.
    pub batches_mismatched: usize,
    pub total_attempts: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub checkpoint_failures: usize,
    pub total_duration_ms: u64,
}

/// Compact end-of-run summary handed to progress callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub batches: usize,
    pub succeeded: usize,
    pub degraded: usize,
    pub fatal_reason: Option<String>,
}

/// Everything a finished run hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    /// The output document: complete if `status` is `Completed`, otherwise
    /// the state after the last committed batch.
    pub artifact: Document,
    pub batches: Vec<BatchRecord>,
    pub stats: RunStats,
    /// Diagnostic text of the error that halted the run.
    pub fatal_reason: Option<String>,
    /// Sequence number of the last batch committed to the output.
    pub last_completed_sequence: Option<u64>,
}

impl RunResult {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            status: self.status,
            batches: self.stats.batches_total,
            succeeded: self.stats.batches_succeeded,
            degraded: self.stats.batches_degraded + self.stats.batches_mismatched,
            fatal_reason: self.fatal_reason.clone(),
        }
    }

    /// Treat anything but a completed run as an error.
    ///
    /// Degraded batches do not count as failures here; inspect
    /// [`RunStats::batches_degraded`] for that.
    pub fn into_result(self) -> Result<RunResult, RewriteError> {
        match self.status {
            RunStatus::Completed => Ok(self),
            RunStatus::HaltedOnFatalError => {
                let sequence = self
                    .batches
                    .iter()
                    .rev()
                    .find(|b| b.disposition == BatchDisposition::Halted)
                    .map(|b| b.sequence)
                    .unwrap_or_else(|| self.last_completed_sequence.unwrap_or(0));
                Err(RewriteError::FatalService {
                    sequence,
                    reason: self
                        .fatal_reason
                        .unwrap_or_else(|| "unknown fatal error".to_string()),
                })
            }
            RunStatus::Cancelled => Err(RewriteError::Cancelled {
                last_completed: self.last_completed_sequence.unwrap_or(0),
            }),
        }
    }
}
