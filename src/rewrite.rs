//! Run orchestration and the top-level entry points.
//!
//! [`Orchestrator`] drives one run through its state machine:
//!
//! ```text
//! Idle ──run()──▶ Running ──▶ Completed
//!                         ├──▶ HaltedOnFatalError
//!                         └──▶ Cancelled
//! ```
//!
//! While running it pulls paragraphs in source order, feeds the chunk
//! builder and, whenever a batch is sealed, executes it, reassembles the
//! result and saves a checkpoint before pulling the next paragraph. At most
//! one service call is in flight at any time.
//!
//! The free functions [`rewrite`], [`rewrite_to_file`] and [`rewrite_sync`]
//! wrap the orchestrator for callers that start from a path or URL.

use crate::checkpoint::{
    write_atomic, Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
};
use crate::config::{CheckpointPolicy, RewriteConfig};
use crate::document::{Document, DocumentFormat};
use crate::error::{BatchError, RewriteError};
use crate::output::{BatchDisposition, BatchRecord, RunResult, RunStats, RunStatus};
use crate::pipeline::chunk::{Batch, ChunkBuilder, PARAGRAPH_SEPARATOR};
use crate::pipeline::input;
use crate::pipeline::llm::{TransformationClient, TransformationRequest, TransformationResult};
use crate::pipeline::reassemble::Reassembler;
use crate::pipeline::retry::RetryPolicy;
use crate::progress::{BatchEstimate, NoopProgressCallback, ProgressCallback};
use crate::service::{LlmService, TransformationService};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

// ── Cancellation ─────────────────────────────────────────────────────────

/// Cooperative cancel flag, checked by the orchestrator between batches.
///
/// Cancelling never interrupts a request or a backoff sleep; the run stops
/// after the batch in flight has been committed and checkpointed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────

/// Lifecycle of an [`Orchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    HaltedOnFatalError,
    Cancelled,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::HaltedOnFatalError => "halted",
            RunState::Cancelled => "cancelled",
        })
    }
}

impl From<RunStatus> for RunState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Completed => RunState::Completed,
            RunStatus::HaltedOnFatalError => RunState::HaltedOnFatalError,
            RunStatus::Cancelled => RunState::Cancelled,
        }
    }
}

/// Drives one batched run over a document.
///
/// # Example
/// ```rust,no_run
/// use edgequake_manuscript::{Document, LlmService, Orchestrator, RewriteConfig};
/// use std::sync::Arc;
///
/// # async fn demo() -> Result<(), edgequake_manuscript::RewriteError> {
/// let config = RewriteConfig::builder().checkpoint_path("book.ckpt").build()?;
/// let service = Arc::new(LlmService::from_config(&config)?);
/// let doc = Document::from_markdown("It were a dark and stormy night.");
///
/// let mut orchestrator = Orchestrator::new(service, config);
/// let result = orchestrator.run(&doc).await?;
/// println!("{}", result.artifact.to_markdown());
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    config: RewriteConfig,
    client: TransformationClient,
    store: Arc<dyn CheckpointStore>,
    cancel: CancelToken,
    state: RunState,
}

impl Orchestrator {
    /// Create an idle orchestrator.
    ///
    /// The checkpoint store is a file at `config.checkpoint_path` when set,
    /// otherwise an in-memory store.
    pub fn new(service: Arc<dyn TransformationService>, config: RewriteConfig) -> Self {
        let client = TransformationClient::new(service, RetryPolicy::from_config(&config));
        let store = checkpoint_store(&config);
        Self {
            config,
            client,
            store,
            cancel: CancelToken::new(),
            state: RunState::Idle,
        }
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// A handle that cancels this orchestrator's run between batches.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &RewriteConfig {
        &self.config
    }

    /// The checkpoint left by an earlier run, if any.
    pub fn recover(&self) -> Result<Option<Checkpoint>, RewriteError> {
        Ok(self.store.load()?)
    }

    /// Delete the checkpoint, once its artifact has been accepted or is unwanted.
    pub fn discard_checkpoint(&self) -> Result<(), RewriteError> {
        Ok(self.store.clear()?)
    }

    /// Run the whole document.
    ///
    /// Returns `Ok` for every terminal state; a fatal service answer or a
    /// cancellation is reported through [`RunResult::status`], with the
    /// partial artifact attached. Use [`RunResult::into_result`] to treat
    /// those as errors.
    ///
    /// # Errors
    /// - [`RewriteError::InvalidState`] if this orchestrator already ran
    /// - [`RewriteError::CheckpointExists`] if an earlier run left a
    ///   checkpoint; [`recover`](Self::recover) or
    ///   [`discard_checkpoint`](Self::discard_checkpoint) it first
    pub async fn run(&mut self, source: &Document) -> Result<RunResult, RewriteError> {
        if self.state != RunState::Idle {
            return Err(RewriteError::InvalidState {
                state: self.state.to_string(),
            });
        }
        if let Some(existing) = self.store.load()? {
            return Err(RewriteError::CheckpointExists {
                path: PathBuf::from(self.store.location()),
                sequence: existing.last_completed_sequence,
            });
        }

        self.state = RunState::Running;
        let result = self.execute(source).await;
        self.state = result.status.into();
        Ok(result)
    }

    async fn execute(&self, source: &Document) -> RunResult {
        let started = Instant::now();
        let config = &self.config;
        let callback: ProgressCallback = config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));

        let mut builder = ChunkBuilder::from_config(config);
        let mut run = RunContext {
            reassembler: Reassembler::new(source, config),
            estimate: BatchEstimate::new(builder.estimate_bytes(source.iter()), config.batch_size),
            stats: RunStats {
                total_paragraphs: source.len(),
                ..Default::default()
            },
            records: Vec::new(),
            last_completed: None,
            fatal_reason: None,
            durable: true,
            callback,
        };

        info!(
            "Starting {} run: {} paragraphs, ~{} batches of {} bytes",
            config.mode,
            source.len(),
            run.estimate.total(),
            config.batch_size
        );
        run.callback.on_run_start(run.estimate.total());

        let mut paragraphs = source.iter();
        let status = loop {
            let next = paragraphs.next();
            let sealed = match next {
                Some(p) => {
                    run.stats.paragraphs_consumed += 1;
                    if builder.qualifies(p) {
                        builder.add(p)
                    } else {
                        run.stats.paragraphs_passed_through += 1;
                        run.reassembler.passthrough(p, !builder.is_empty());
                        None
                    }
                }
                None => builder.flush(),
            };

            if let Some(batch) = sealed {
                if let Some(halt) = self.process_batch(&mut run, &batch).await {
                    break halt;
                }
                if next.is_some() && self.cancel.is_cancelled() {
                    info!("Cancelled after batch {}", batch.sequence);
                    break RunStatus::Cancelled;
                }
            }
            if next.is_none() {
                break RunStatus::Completed;
            }
        };

        run.stats.total_duration_ms = started.elapsed().as_millis() as u64;
        let artifact = match status {
            RunStatus::Completed => run.reassembler.finish(),
            _ => run.reassembler.artifact().clone(),
        };

        let result = RunResult {
            status,
            artifact,
            batches: run.records,
            stats: run.stats,
            fatal_reason: run.fatal_reason,
            last_completed_sequence: run.last_completed,
        };

        info!(
            "Run {}: {}/{} batches succeeded, {} degraded, {} mismatched, {}ms",
            result.status,
            result.stats.batches_succeeded,
            result.stats.batches_total,
            result.stats.batches_degraded,
            result.stats.batches_mismatched,
            result.stats.total_duration_ms
        );
        run.callback.on_run_complete(&result.summary());
        result
    }

    /// Execute, reassemble and checkpoint one batch.
    ///
    /// Returns the terminal status when the run must stop here.
    async fn process_batch(&self, run: &mut RunContext, batch: &Batch) -> Option<RunStatus> {
        let sequence = batch.sequence;
        run.estimate.consume(batch.byte_len() + PARAGRAPH_SEPARATOR.len());
        run.estimate.complete_batch();
        let estimated = run.estimate.total();

        info!(
            "Batch {}/~{}: {} paragraphs, {} bytes",
            sequence,
            estimated,
            batch.members.len(),
            batch.byte_len()
        );
        run.callback.on_batch_start(sequence, estimated);

        let batch_start = Instant::now();
        let request = TransformationRequest::from_config(batch, &self.config);
        let result = self.client.execute(&request).await;
        let outcome = run.reassembler.apply(batch, &result);

        let (output_bytes, input_tokens, output_tokens) = match &result {
            TransformationResult::Success {
                text,
                input_tokens,
                output_tokens,
                ..
            } => (text.len(), *input_tokens, *output_tokens),
            _ => (0, 0, 0),
        };

        let stats = &mut run.stats;
        stats.batches_total += 1;
        stats.total_attempts += u64::from(result.attempts());
        stats.total_input_tokens += input_tokens as u64;
        stats.total_output_tokens += output_tokens as u64;
        match outcome.disposition {
            BatchDisposition::Applied | BatchDisposition::Clean => {
                stats.batches_succeeded += 1;
                stats.paragraphs_rewritten += outcome.rewritten;
            }
            BatchDisposition::Unmodified => {
                if matches!(outcome.error, Some(BatchError::StructuralMismatch { .. })) {
                    stats.batches_mismatched += 1;
                } else {
                    stats.batches_degraded += 1;
                }
                stats.paragraphs_unmodified += batch.members.len();
            }
            BatchDisposition::Halted => {
                stats.paragraphs_unmodified += batch.members.len();
            }
        }

        run.records.push(BatchRecord {
            sequence,
            paragraph_indices: batch.paragraph_indices(),
            input_bytes: batch.byte_len(),
            output_bytes,
            attempts: result.attempts(),
            input_tokens,
            output_tokens,
            duration_ms: batch_start.elapsed().as_millis() as u64,
            disposition: outcome.disposition,
            error: outcome.error.clone(),
        });

        if outcome.disposition == BatchDisposition::Halted {
            let reason = match &result {
                TransformationResult::FatalFailure { reason, .. } => reason.clone(),
                _ => "fatal service error".to_string(),
            };
            error!("Batch {}: fatal service error, halting: {}", sequence, reason);
            run.callback.on_batch_error(sequence, estimated, &reason);
            run.fatal_reason = Some(reason);
            return Some(RunStatus::HaltedOnFatalError);
        }

        match &outcome.error {
            Some(err) => run.callback.on_batch_error(sequence, estimated, &err.to_string()),
            None => run.callback.on_batch_complete(sequence, estimated, output_bytes),
        }
        run.last_completed = Some(sequence);

        self.save_checkpoint(run, sequence)
    }

    fn save_checkpoint(&self, run: &mut RunContext, sequence: u64) -> Option<RunStatus> {
        if !run.durable {
            return None;
        }
        let checkpoint = Checkpoint::new(sequence, self.config.mode, run.reassembler.artifact().clone())
            .with_progress(run.stats.paragraphs_consumed, run.stats.total_paragraphs);

        let err = match self.store.save(&checkpoint) {
            Ok(()) => return None,
            Err(e) => e,
        };
        run.stats.checkpoint_failures += 1;
        run.callback.on_checkpoint_error(sequence, &err.to_string());

        match self.config.checkpoint_policy {
            CheckpointPolicy::WarnAndContinue => {
                warn!(
                    "Batch {}: checkpoint write to {} failed, continuing in memory only: {}",
                    sequence,
                    self.store.location(),
                    err
                );
                run.durable = false;
                None
            }
            CheckpointPolicy::Halt => {
                error!("Batch {}: checkpoint write failed, halting: {}", sequence, err);
                run.fatal_reason = Some(format!("checkpoint write failed: {err}"));
                Some(RunStatus::HaltedOnFatalError)
            }
        }
    }
}

/// Mutable state of one run, torn down when the run ends.
struct RunContext {
    reassembler: Reassembler,
    estimate: BatchEstimate,
    stats: RunStats,
    records: Vec<BatchRecord>,
    last_completed: Option<u64>,
    fatal_reason: Option<String>,
    /// False once a checkpoint write failed under `WarnAndContinue`.
    durable: bool,
    callback: ProgressCallback,
}

/// The store a config asks for: a file when a path is set, memory otherwise.
pub fn checkpoint_store(config: &RewriteConfig) -> Arc<dyn CheckpointStore> {
    match &config.checkpoint_path {
        Some(path) => Arc::new(FileCheckpointStore::new(path)),
        None => Arc::new(MemoryCheckpointStore::new()),
    }
}

/// Load the checkpoint an earlier run left at `config.checkpoint_path`.
pub fn recover(config: &RewriteConfig) -> Result<Option<Checkpoint>, RewriteError> {
    Ok(checkpoint_store(config).load()?)
}

/// Delete the checkpoint at `config.checkpoint_path`.
pub fn discard_checkpoint(config: &RewriteConfig) -> Result<(), RewriteError> {
    Ok(checkpoint_store(config).clear()?)
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Rewrite a document file or URL.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `input`: Local file path or HTTP/HTTPS URL (`.json` or Markdown/text)
/// * `config`: Run configuration
///
/// # Returns
/// `Ok(RunResult)` once the run reaches any terminal state, even if some
/// batches were left unmodified (check `result.stats.batches_degraded`) or a
/// fatal answer halted it (check `result.status`).
///
/// # Errors
/// Returns `Err(RewriteError)` only when the run cannot start:
/// - File not found / unreadable / not a document
/// - Document has no paragraphs
/// - No LLM provider configured
/// - A checkpoint from an earlier run is in the way
pub async fn rewrite(
    input_str: impl AsRef<str>,
    config: &RewriteConfig,
) -> Result<RunResult, RewriteError> {
    let input_str = input_str.as_ref();
    info!("Starting rewrite: {}", input_str);

    let (resolved, doc) = input::load_document(input_str, config.download_timeout_secs).await?;
    if doc.is_empty() {
        return Err(RewriteError::EmptyDocument {
            path: resolved.path().to_path_buf(),
        });
    }

    let service = LlmService::from_config(config)?;
    let mut orchestrator = Orchestrator::new(Arc::new(service), config.clone());
    orchestrator.run(&doc).await
}

/// Rewrite a document and write the artifact to `output_path`.
///
/// The artifact is written even when the run halted, so the partial result
/// is available; the checkpoint is deleted only after a completed run's
/// output has been written. The output encoding follows the extension of
/// `output_path`.
pub async fn rewrite_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &RewriteConfig,
) -> Result<RunResult, RewriteError> {
    let result = rewrite(input_str, config).await?;
    write_document(&result.artifact, output_path.as_ref()).await?;
    if result.is_complete() {
        discard_checkpoint(config)?;
    }
    Ok(result)
}

/// Write `doc` to `path` atomically, the same way checkpoints are written.
///
/// The encoding follows the extension of `path`.
pub async fn write_document(doc: &Document, path: &Path) -> Result<(), RewriteError> {
    let format = DocumentFormat::from_path(path);
    let rendered = doc
        .render(format)
        .map_err(|e| RewriteError::Internal(format!("Failed to render document: {}", e)))?;

    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&target, rendered.as_bytes()))
        .await
        .map_err(|e| RewriteError::Internal(format!("Output writer panicked: {}", e)))?
        .map_err(|e| RewriteError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Synchronous wrapper around [`rewrite`].
///
/// Creates a temporary tokio runtime internally.
pub fn rewrite_sync(
    input_str: impl AsRef<str>,
    config: &RewriteConfig,
) -> Result<RunResult, RewriteError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| RewriteError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(rewrite(input_str, config))
}
