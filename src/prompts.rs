//! Instruction templates for the transformation service.
//!
//! Every prompt the pipeline sends is assembled here, so a wording change
//! touches exactly one place and unit tests can inspect the templates without
//! a live model. The batch text is always appended last, after the rules,
//! and always uses the same paragraph separator the chunk builder used so
//! the model can see where paragraph boundaries are.

use crate::config::{RewriteConfig, ToneProfile, TransformMode};

/// Sentinel an audit answer contains when a batch has no defects.
pub const CLEAN_SENTINEL: &str = "CLEAN";

/// Call to action used by workbook cleanup unless the caller sets one.
pub const DEFAULT_CALL_TO_ACTION: &str = "(Interactive exercise): Complete this in your Activity Workbook. Download it free here: [LINK]";

/// Default system prompt, used when `RewriteConfig::system_prompt` is `None`.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a meticulous manuscript editor working on a book, one excerpt at a time.

Follow these rules precisely:

1. Work only on the excerpt you are given. Do not invent content.
2. Paragraphs are separated by a single blank line. Keep that separation.
3. Never use Markdown: no **bold**, no *italics*, no # headings, no bullets.
4. Output ONLY what the task asks for. No commentary, no preamble."#;

/// The per-run parts of an instruction, everything except the batch itself.
#[derive(Debug, Clone, Copy)]
pub struct PromptParts<'a> {
    pub mode: TransformMode,
    pub tone: &'a ToneProfile,
    pub house_rules: Option<&'a str>,
    pub call_to_action: &'a str,
}

impl<'a> PromptParts<'a> {
    pub fn from_config(config: &'a RewriteConfig) -> Self {
        Self {
            mode: config.mode,
            tone: &config.tone,
            house_rules: config.house_rules.as_deref(),
            call_to_action: &config.call_to_action,
        }
    }

    /// Render the user prompt for one batch of `paragraph_count` paragraphs.
    pub fn render(&self, batch_text: &str, paragraph_count: usize) -> String {
        match self.mode {
            TransformMode::Audit => audit_prompt(self.house_rules, batch_text),
            TransformMode::Rewrite => {
                rewrite_prompt(self.tone, self.house_rules, batch_text, paragraph_count)
            }
            TransformMode::WorkbookCleanup => {
                workbook_prompt(self.call_to_action, batch_text, paragraph_count)
            }
        }
    }
}

/// Build the full user prompt for one batch.
pub fn build_prompt(config: &RewriteConfig, batch_text: &str, paragraph_count: usize) -> String {
    PromptParts::from_config(config).render(batch_text, paragraph_count)
}

fn audit_prompt(house_rules: Option<&str>, text: &str) -> String {
    format!(
        "AUDIT this text for grammar, spelling, consistency and style defects.\n\
RULES:{}\n\
Output a short list of the issues found, quoting the offending words.\n\
If there are no issues, output exactly '{CLEAN_SENTINEL}'.\n\n\
TEXT:\n\"\"\"\n{text}\n\"\"\"",
        rules_suffix(house_rules)
    )
}

fn rewrite_prompt(
    tone: &ToneProfile,
    house_rules: Option<&str>,
    text: &str,
    paragraph_count: usize,
) -> String {
    format!(
        "Rewrite the text below into native US English.\n\
RULES: NO Markdown. {}{}\n\
The text has {paragraph_count} paragraph(s) separated by blank lines. \
Return exactly {paragraph_count} paragraph(s), in the same order, separated by single blank lines.\n\n\
TEXT:\n\"\"\"\n{text}\n\"\"\"",
        tone.instruction(),
        rules_suffix(house_rules)
    )
}

fn workbook_prompt(call_to_action: &str, text: &str, paragraph_count: usize) -> String {
    format!(
        "TASK: Each paragraph below is a workbook exercise. Identify the question in it and \
remove the fill-in-the-blank lines (____, ----, ....).\n\
Insert this call to action after the question: \"{call_to_action}\".\n\
Return exactly {paragraph_count} paragraph(s), in the same order, separated by single blank lines.\n\n\
INPUT:\n\"\"\"\n{text}\n\"\"\"\n\nOUTPUT (text only):"
    )
}

fn rules_suffix(house_rules: Option<&str>) -> String {
    match house_rules.map(str::trim) {
        Some(r) if !r.is_empty() => format!(" {r}"),
        _ => String::new(),
    }
}

/// Whether an audit answer reports the batch as defect-free.
pub fn is_clean_audit(answer: &str) -> bool {
    answer.contains(CLEAN_SENTINEL)
}
