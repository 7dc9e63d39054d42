//! Error types for the edgequake-manuscript library.
//!
//! Failures come in three tiers, matching how far their damage reaches:
//!
//! * [`RewriteError`]: **Fatal to the call**: the run cannot start or its
//!   result cannot be delivered (missing input, unparseable document,
//!   provider not configured, output not writable). Returned as
//!   `Err(RewriteError)` from the top-level entry points.
//!
//! * [`BatchError`]: **Local to one batch**: the service kept failing, or its
//!   answer could not be mapped back onto the source paragraphs. Stored in
//!   [`crate::output::BatchRecord`]; the affected paragraphs keep their
//!   original text and the run continues. A fatal service answer also lands
//!   here, and additionally halts the run.
//!
//! * [`ServiceError`]: **Local to one attempt**: what a single call to the
//!   transformation service reported, already classified so the retry loop
//!   knows whether waiting can help.
//!
//! [`CheckpointError`] covers the durable store; whether it halts the run is
//! decided by [`crate::config::CheckpointPolicy`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-manuscript library.
#[derive(Debug, Error)]
pub enum RewriteError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file was read but could not be parsed as a document.
    #[error("Could not parse document '{path}': {detail}")]
    InvalidDocument { path: PathBuf, detail: String },

    /// The document contains no paragraph long enough to transform.
    #[error("Document '{path}' has no paragraphs to process")]
    EmptyDocument { path: PathBuf },

    // ── Service errors ────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A batch received a non-retryable answer and the run halted.
    ///
    /// Returned by [`crate::output::RunResult::into_result`]; the partial
    /// artifact is still available from the last checkpoint.
    #[error("Run halted on batch {sequence}: {reason}")]
    FatalService { sequence: u64, reason: String },

    /// The run was cancelled between batches.
    #[error("Run cancelled after batch {last_completed}")]
    Cancelled { last_completed: u64 },

    // ── Checkpoint errors ─────────────────────────────────────────────────
    /// The durable store failed and the policy says to stop.
    #[error("Checkpoint failure: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// A checkpoint from an earlier run is present and would be overwritten.
    #[error(
        "An unfinished run left a checkpoint at '{path}' (batch {sequence}).\n\
Use --recover to write its partial output, or --discard-checkpoint to start over."
    )]
    CheckpointExists { path: PathBuf, sequence: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output document.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An orchestrator was asked to run when it is not idle.
    #[error("Orchestrator is {state}; a run can only start from Idle")]
    InvalidState { state: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// What a single call to the transformation service reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Rate limiting, overload, 5xx, timeouts. Worth waiting for.
    #[error("transient service error: {0}")]
    Transient(String),

    /// Bad request, unknown model, rejected credentials. Retrying cannot help.
    #[error("fatal service error: {0}")]
    Fatal(String),

    /// Anything the classifier does not recognise.
    #[error("unclassified service error: {0}")]
    Unknown(String),
}

impl ServiceError {
    /// The diagnostic text, without the classification prefix.
    pub fn message(&self) -> &str {
        match self {
            ServiceError::Transient(m) | ServiceError::Fatal(m) | ServiceError::Unknown(m) => m,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::Fatal(_))
    }
}

/// A non-fatal error for a single batch.
///
/// Stored alongside [`crate::output::BatchRecord`]; every paragraph of the
/// batch keeps its original text.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum BatchError {
    /// The service kept reporting transient failures.
    #[error("Batch {sequence}: gave up after {attempts} attempts: {detail}")]
    RetriesExhausted {
        sequence: u64,
        attempts: u32,
        detail: String,
    },

    /// The response did not split into one segment per submitted paragraph.
    #[error("Batch {sequence}: expected {expected} segments, service returned {actual}")]
    StructuralMismatch {
        sequence: u64,
        expected: usize,
        actual: usize,
    },

    /// The service rejected the request outright; the run halts.
    #[error("Batch {sequence}: fatal service error: {detail}")]
    Fatal { sequence: u64, detail: String },
}

/// Failures of the durable checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not serialise checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The file exists but does not hold a checkpoint this version can read.
    #[error("checkpoint '{path}' is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_service_display() {
        let e = RewriteError::FatalService {
            sequence: 4,
            reason: "404 model not found".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("batch 4"), "got: {msg}");
        assert!(msg.contains("404"), "got: {msg}");
    }

    #[test]
    fn retries_exhausted_display() {
        let e = BatchError::RetriesExhausted {
            sequence: 2,
            attempts: 6,
            detail: "429 quota".into(),
        };
        assert!(e.to_string().contains("6 attempts"));
    }

    #[test]
    fn structural_mismatch_display() {
        let e = BatchError::StructuralMismatch {
            sequence: 7,
            expected: 5,
            actual: 3,
        };
        let msg = e.to_string();
        assert!(msg.contains("expected 5"));
        assert!(msg.contains("returned 3"));
    }

    #[test]
    fn service_error_message_strips_prefix() {
        let e = ServiceError::Transient("overloaded".into());
        assert_eq!(e.message(), "overloaded");
        assert!(!e.is_fatal());
        assert!(ServiceError::Fatal("bad".into()).is_fatal());
    }

    #[test]
    fn checkpoint_exists_mentions_both_flags() {
        let e = RewriteError::CheckpointExists {
            path: PathBuf::from("/tmp/run.ckpt"),
            sequence: 3,
        };
        let msg = e.to_string();
        assert!(msg.contains("--recover"));
        assert!(msg.contains("--discard-checkpoint"));
    }
}
