//! Reassembler: commit each batch's result to the output document.
//!
//! ## Strategies
//!
//! * **Structure-preserving** starts from a copy of the source. A successful
//!   answer is split on blank lines and segment `i` replaces the text of
//!   member `i`, keeping that slot's style. When the segment count does not
//!   match the member count the batch is left as it was and the mismatch is
//!   reported; guessing an alignment would shift text between paragraphs.
//!
//! * **Block-concatenating** builds the output by appending. A successful
//!   answer becomes one `Normal` block, preceded by the configured separator
//!   when an earlier block exists. Paragraphs that were never sent are
//!   appended in source order around the blocks.
//!
//! Audit runs produce a report instead of an edited document, see
//! [`Reassembler::new`].
//!
//! Whatever the strategy, a failed batch never overwrites anything: its
//! members keep their original text (and, in block mode, are appended as
//! they were).

use crate::config::{ReassemblyStrategy, RewriteConfig, TransformMode};
use crate::document::{Document, Paragraph, StyleTag};
use crate::error::BatchError;
use crate::output::BatchDisposition;
use crate::pipeline::chunk::Batch;
use crate::pipeline::llm::TransformationResult;
use crate::pipeline::postprocess::{clean_response, clean_segment, split_segments};
use crate::prompts::is_clean_audit;
use tracing::{debug, warn};

/// Title of the first paragraph of an audit report.
pub const AUDIT_REPORT_TITLE: &str = "Audit Report";

/// What [`Reassembler::apply`] did with one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub disposition: BatchDisposition,
    /// Source paragraphs whose text was replaced.
    pub rewritten: usize,
    pub error: Option<BatchError>,
}

impl ApplyOutcome {
    fn applied(rewritten: usize) -> Self {
        Self {
            disposition: BatchDisposition::Applied,
            rewritten,
            error: None,
        }
    }

    fn unmodified(error: Option<BatchError>) -> Self {
        Self {
            disposition: BatchDisposition::Unmodified,
            rewritten: 0,
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Slots,
    Blocks,
    Report,
}

/// Owns the output document while a run is in progress.
#[derive(Debug)]
pub struct Reassembler {
    target: Target,
    separator: String,
    strip_markdown: bool,
    output: Document,
    /// Block mode: pass-through paragraphs that sit between members of a
    /// batch still being accumulated.
    held: Vec<Paragraph>,
    blocks: usize,
}

impl Reassembler {
    /// Create a reassembler for `source`.
    ///
    /// Audit mode always writes a report; workbook cleanup always writes
    /// into the original slots, since its answers are per-exercise.
    pub fn new(source: &Document, config: &RewriteConfig) -> Self {
        let target = match (config.mode, config.reassembly) {
            (TransformMode::Audit, _) => Target::Report,
            (TransformMode::WorkbookCleanup, _) => Target::Slots,
            (TransformMode::Rewrite, ReassemblyStrategy::StructurePreserving) => Target::Slots,
            (TransformMode::Rewrite, ReassemblyStrategy::BlockConcatenating) => Target::Blocks,
        };
        let output = match target {
            Target::Slots => source.clone(),
            Target::Blocks => Document::default(),
            Target::Report => {
                let mut report = Document::default();
                report.push(AUDIT_REPORT_TITLE, StyleTag::heading(1));
                report
            }
        };
        Self {
            target,
            separator: config.block_separator.clone(),
            strip_markdown: config.strip_markdown,
            output,
            held: Vec::new(),
            blocks: 0,
        }
    }

    /// Record a paragraph that was not sent to the service.
    ///
    /// `batch_open` says whether the chunk builder is holding members that
    /// precede this paragraph; in block mode it is then held back until that
    /// batch is committed so source order is kept.
    pub fn passthrough(&mut self, paragraph: &Paragraph, batch_open: bool) {
        if self.target != Target::Blocks {
            return;
        }
        if batch_open {
            self.held.push(paragraph.clone());
        } else {
            self.append(paragraph.text.clone(), paragraph.style.clone());
        }
    }

    /// Commit the result of one batch.
    pub fn apply(&mut self, batch: &Batch, result: &TransformationResult) -> ApplyOutcome {
        let outcome = match result {
            TransformationResult::Success { text, .. } => match self.target {
                Target::Slots => self.write_slots(batch, text),
                Target::Blocks => self.write_block(batch, text),
                Target::Report => self.write_report(batch, text),
            },
            TransformationResult::TransientFailure { reason, attempts } => {
                warn!(
                    "Batch {}: leaving {} paragraphs unmodified after {} attempts",
                    batch.sequence,
                    batch.members.len(),
                    attempts
                );
                self.keep_members(batch);
                ApplyOutcome::unmodified(Some(BatchError::RetriesExhausted {
                    sequence: batch.sequence,
                    attempts: *attempts,
                    detail: reason.clone(),
                }))
            }
            TransformationResult::FatalFailure { reason, .. } => {
                // Nothing of this batch is committed, so neither are the
                // pass-throughs that sit between its members.
                self.held.clear();
                return ApplyOutcome {
                    disposition: BatchDisposition::Halted,
                    rewritten: 0,
                    error: Some(BatchError::Fatal {
                        sequence: batch.sequence,
                        detail: reason.clone(),
                    }),
                };
            }
        };
        self.release_held();
        outcome
    }

    /// The output as committed so far.
    pub fn artifact(&self) -> &Document {
        &self.output
    }

    /// Finish the run and take the output, releasing any held paragraphs.
    pub fn finish(mut self) -> Document {
        self.release_held();
        self.output
    }

    // ── Strategies ───────────────────────────────────────────────────────

    fn write_slots(&mut self, batch: &Batch, response: &str) -> ApplyOutcome {
        let segments = split_segments(&clean_response(response));
        let counts = batch.segment_counts();
        let expected: usize = counts.iter().sum();
        if segments.len() != expected {
            warn!(
                "Batch {}: expected {} segments, got {}; leaving paragraphs unmodified",
                batch.sequence,
                expected,
                segments.len()
            );
            return ApplyOutcome::unmodified(Some(BatchError::StructuralMismatch {
                sequence: batch.sequence,
                expected,
                actual: segments.len(),
            }));
        }

        let mut rewritten = 0;
        let mut segments = segments.into_iter();
        for (member, count) in batch.members.iter().zip(counts) {
            let text = segments
                .by_ref()
                .take(count)
                .map(|s| self.tidy(&s))
                .collect::<Vec<_>>()
                .join("\n\n");
            if let Some(slot) = self.output.get_mut(member.index) {
                slot.text = text;
                rewritten += 1;
            }
        }
        debug!("Batch {}: {} slots rewritten", batch.sequence, rewritten);
        ApplyOutcome::applied(rewritten)
    }

    fn write_block(&mut self, batch: &Batch, response: &str) -> ApplyOutcome {
        let block = split_segments(&clean_response(response))
            .iter()
            .map(|s| self.tidy(s))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if block.is_empty() {
            self.keep_members(batch);
            return ApplyOutcome::unmodified(Some(BatchError::StructuralMismatch {
                sequence: batch.sequence,
                expected: batch.members.len(),
                actual: 0,
            }));
        }
        if self.blocks > 0 && !self.separator.is_empty() {
            self.append(self.separator.clone(), StyleTag::Normal);
        }
        self.append(block, StyleTag::Normal);
        self.blocks += 1;
        ApplyOutcome::applied(batch.members.len())
    }

    fn write_report(&mut self, batch: &Batch, response: &str) -> ApplyOutcome {
        if is_clean_audit(response) {
            return ApplyOutcome {
                disposition: BatchDisposition::Clean,
                rewritten: 0,
                error: None,
            };
        }
        let (first, last) = batch.index_range();
        let findings = clean_response(response);
        self.append(
            format!("{}:\n{}", range_label(first, last), findings),
            StyleTag::Normal,
        );
        ApplyOutcome::applied(0)
    }

    /// Failed batch: slots and report are left alone; block mode re-appends
    /// the members as they were, interleaved with held paragraphs in source
    /// order.
    fn keep_members(&mut self, batch: &Batch) {
        if self.target != Target::Blocks {
            return;
        }
        let mut originals: Vec<Paragraph> = batch.members.clone();
        originals.append(&mut self.held);
        originals.sort_by_key(|p| p.index);
        for p in originals {
            self.append(p.text, p.style);
        }
    }

    fn tidy(&self, segment: &str) -> String {
        if self.strip_markdown {
            clean_segment(segment)
        } else {
            segment.trim().to_string()
        }
    }

    fn append(&mut self, text: String, style: StyleTag) {
        self.output.push(text, style);
    }

    fn release_held(&mut self) {
        for p in std::mem::take(&mut self.held) {
            self.append(p.text, p.style);
        }
    }
}

fn range_label(first: usize, last: usize) -> String {
    if first == last {
        format!("Paragraph {}", first + 1)
    } else {
        format!("Paragraphs {}-{}", first + 1, last + 1)
    }
}
