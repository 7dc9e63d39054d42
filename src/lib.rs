//! # edgequake-manuscript
//!
//! Rewrite, audit or clean up long manuscripts with an LLM, batch by batch,
//! without losing work to rate limits or crashes.
//!
//! ## Why this crate?
//!
//! Sending a whole book in one request does not fit a context window, and
//! sending it one paragraph at a time burns through a shared rate limit. This
//! crate groups paragraphs into size-bounded batches, retries transient
//! failures on a bounded backoff, writes each answer back into the paragraph
//! slots it came from, and snapshots the output after every batch so a
//! crash or a fatal error never costs more than the batch in flight.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Document
//!  │
//!  ├─ 1. Input       resolve local file or download from URL, parse paragraphs
//!  ├─ 2. Chunk       accumulate qualifying paragraphs until BATCH_SIZE bytes
//!  ├─ 3. Transform   one call per batch, retried with capped backoff
//!  ├─ 4. Polish      strip fences and Markdown artefacts from the answer
//!  ├─ 5. Reassemble  write segments into their original slots (or blocks)
//!  └─ 6. Checkpoint  atomic snapshot of the output after every batch
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_manuscript::{rewrite_to_file, RewriteConfig, ToneProfile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = RewriteConfig::builder()
//!         .tone(ToneProfile::KidFriendly)
//!         .checkpoint_path("book.ckpt")
//!         .build()?;
//!     let result = rewrite_to_file("book.md", "book.rewritten.md", &config).await?;
//!     eprintln!("{} batches, {} degraded",
//!         result.stats.batches_total,
//!         result.stats.batches_degraded);
//!     result.into_result()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `manuscript` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-manuscript = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod checkpoint;
pub mod config;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod rewrite;
pub mod service;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::{
    BackoffGrowth, CheckpointPolicy, ReassemblyStrategy, RewriteConfig, RewriteConfigBuilder,
    ToneProfile, TransformMode,
};
pub use document::{Document, DocumentFormat, Paragraph, StyleTag};
pub use error::{BatchError, CheckpointError, RewriteError, ServiceError};
pub use output::{BatchDisposition, BatchRecord, RunResult, RunStats, RunStatus, RunSummary};
pub use pipeline::chunk::{Batch, ChunkBuilder};
pub use pipeline::llm::{TransformationClient, TransformationRequest, TransformationResult};
pub use pipeline::reassemble::Reassembler;
pub use pipeline::retry::RetryPolicy;
pub use progress::{NoopProgressCallback, ProgressCallback, RewriteProgressCallback};
pub use rewrite::{
    discard_checkpoint, recover, rewrite, rewrite_sync, rewrite_to_file, write_document,
    CancelToken, Orchestrator, RunState,
};
pub use service::{Generation, LlmService, TransformationService};
