//! Chunk builder: group consecutive paragraphs into size-bounded batches.
//!
//! Paragraph text is accumulated with [`PARAGRAPH_SEPARATOR`] between
//! members. A batch is sealed as soon as the accumulated text reaches the
//! configured byte threshold, or when [`ChunkBuilder::flush`] is called at the
//! end of the input. Every batch sealed by the threshold therefore has
//! `byte_len() >= batch_size`; only the final flushed batch may be smaller.
//!
//! Paragraphs that do not qualify (too short, or in workbook mode without a
//! fill-in line) are never added. They neither count towards the threshold
//! nor reach the service; the reassembler copies them through unchanged.

use crate::config::{RewriteConfig, TransformMode};
use crate::document::Paragraph;
use crate::pipeline::postprocess::split_segments;
use tracing::debug;

/// Separator placed between paragraphs in a batch's request text.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Why a batch was sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealReason {
    /// The accumulated text reached the byte threshold.
    Threshold,
    /// The input ran out.
    EndOfInput,
}

/// A sealed, immutable group of consecutive qualifying paragraphs.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// 1-based, assigned in seal order.
    pub sequence: u64,
    pub members: Vec<Paragraph>,
    /// `members[i].text` joined with [`PARAGRAPH_SEPARATOR`].
    pub text: String,
    pub sealed_by: SealReason,
}

impl Batch {
    pub fn byte_len(&self) -> usize {
        self.text.len()
    }

    pub fn paragraph_indices(&self) -> Vec<usize> {
        self.members.iter().map(|p| p.index).collect()
    }

    /// Blank-line separated segments each member contributes to [`Self::text`].
    ///
    /// Usually 1; a paragraph that itself contains blank lines (a quote with
    /// several stanzas, JSON input) contributes more.
    pub fn segment_counts(&self) -> Vec<usize> {
        self.members
            .iter()
            .map(|p| split_segments(&p.text).len().max(1))
            .collect()
    }

    /// Segments the service is expected to return for this batch.
    pub fn segment_count(&self) -> usize {
        self.segment_counts().iter().sum()
    }

    /// `(first, last)` source indices, 0-based.
    pub fn index_range(&self) -> (usize, usize) {
        let first = self.members.first().map(|p| p.index).unwrap_or(0);
        let last = self.members.last().map(|p| p.index).unwrap_or(first);
        (first, last)
    }
}

/// Which paragraphs are worth sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParagraphFilter {
    /// Trimmed text has at least this many characters.
    MinChars(usize),
    /// As `MinChars`, and the text contains a fill-in line: a run of at least
    /// `threshold` characters from `_`, `.` and `-`.
    FillInLines { min_chars: usize, threshold: usize },
}

impl ParagraphFilter {
    pub fn from_config(config: &RewriteConfig) -> Self {
        match config.mode {
            TransformMode::WorkbookCleanup => ParagraphFilter::FillInLines {
                min_chars: config.min_paragraph_chars,
                threshold: config.blank_line_threshold,
            },
            TransformMode::Audit | TransformMode::Rewrite => {
                ParagraphFilter::MinChars(config.min_paragraph_chars)
            }
        }
    }

    pub fn accepts(&self, paragraph: &Paragraph) -> bool {
        match self {
            ParagraphFilter::MinChars(min) => has_min_chars(&paragraph.text, *min),
            ParagraphFilter::FillInLines {
                min_chars,
                threshold,
            } => {
                has_min_chars(&paragraph.text, *min_chars)
                    && has_fill_in_line(&paragraph.text, *threshold)
            }
        }
    }
}

fn has_min_chars(text: &str, min: usize) -> bool {
    text.trim().chars().count() >= min
}

/// True when `text` contains `threshold` consecutive `_`, `.` or `-` characters.
pub fn has_fill_in_line(text: &str, threshold: usize) -> bool {
    let mut run = 0usize;
    for c in text.chars() {
        if matches!(c, '_' | '.' | '-') {
            run += 1;
            if run >= threshold {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Accumulates qualifying paragraphs and seals them into [`Batch`]es.
#[derive(Debug)]
pub struct ChunkBuilder {
    batch_size: usize,
    filter: ParagraphFilter,
    next_sequence: u64,
    members: Vec<Paragraph>,
    text: String,
}

impl ChunkBuilder {
    pub fn new(batch_size: usize, filter: ParagraphFilter) -> Self {
        Self {
            batch_size: batch_size.max(1),
            filter,
            next_sequence: 1,
            members: Vec::new(),
            text: String::new(),
        }
    }

    pub fn from_config(config: &RewriteConfig) -> Self {
        Self::new(config.batch_size, ParagraphFilter::from_config(config))
    }

    /// Whether `paragraph` would be accumulated by [`add`](Self::add).
    pub fn qualifies(&self, paragraph: &Paragraph) -> bool {
        self.filter.accepts(paragraph)
    }

    /// Add one paragraph; returns a sealed batch once the threshold is reached.
    ///
    /// Non-qualifying paragraphs are ignored and never seal a batch.
    pub fn add(&mut self, paragraph: &Paragraph) -> Option<Batch> {
        if !self.qualifies(paragraph) {
            return None;
        }
        if !self.members.is_empty() {
            self.text.push_str(PARAGRAPH_SEPARATOR);
        }
        self.text.push_str(&paragraph.text);
        self.members.push(paragraph.clone());

        if self.text.len() >= self.batch_size {
            Some(self.seal(SealReason::Threshold))
        } else {
            None
        }
    }

    /// Seal whatever is accumulated. Call once at end of input.
    pub fn flush(&mut self) -> Option<Batch> {
        if self.members.is_empty() {
            None
        } else {
            Some(self.seal(SealReason::EndOfInput))
        }
    }

    /// True when no paragraph is waiting in the accumulator.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn pending_bytes(&self) -> usize {
        self.text.len()
    }

    /// Sequence number the next sealed batch will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Request bytes the qualifying paragraphs of `paragraphs` would produce,
    /// separators included, ignoring batch boundaries.
    pub fn estimate_bytes<'a>(&self, paragraphs: impl IntoIterator<Item = &'a Paragraph>) -> usize {
        let (bytes, count) = paragraphs
            .into_iter()
            .filter(|p| self.qualifies(p))
            .fold((0usize, 0usize), |(b, n), p| (b + p.text.len(), n + 1));
        bytes + count.saturating_sub(1) * PARAGRAPH_SEPARATOR.len()
    }

    fn seal(&mut self, reason: SealReason) -> Batch {
        let batch = Batch {
            sequence: self.next_sequence,
            members: std::mem::take(&mut self.members),
            text: std::mem::take(&mut self.text),
            sealed_by: reason,
        };
        self.next_sequence += 1;
        debug!(
            "Sealed batch {}: {} paragraphs, {} bytes ({:?})",
            batch.sequence,
            batch.members.len(),
            batch.byte_len(),
            reason
        );
        batch
    }
}
