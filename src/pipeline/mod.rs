//! Pipeline stages for batched document rewriting.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the orchestrator in [`crate::rewrite`] only sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ chunk ──▶ llm ──▶ postprocess ──▶ reassemble ──▶ checkpoint
//! (path/URL) (batches) (retry)  (cleanup)      (output doc)   (snapshot)
//! ```
//!
//! 1. [`input`]: resolve the path or URL and parse the document
//! 2. [`chunk`]: group qualifying paragraphs into size-bounded batches
//! 3. [`llm`]: send one batch to the service; the only stage with
//!    network I/O. Waits come from [`retry`]
//! 4. [`postprocess`]: deterministic cleanup of the model's answer
//! 5. [`reassemble`]: write the answer back into the output document

pub mod chunk;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod reassemble;
pub mod retry;
