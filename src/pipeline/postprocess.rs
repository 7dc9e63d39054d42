//! Post-processing: deterministic cleanup of model-generated prose.
//!
//! Models asked for plain text still decorate it: they wrap the answer in a
//! code fence, bold a name, turn a paragraph into a bullet or leave two
//! spaces after a full stop. These rules undo that without touching content.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so every later rule sees `\n`; fences
//! are stripped before segment splitting so the fence lines do not become
//! segments of their own.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean a whole response before it is split into segments.
///
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip an outer code fence
/// 3. Strip an outer pair of quotes the prompt's `"""` delimiters invite
/// 4. Remove invisible Unicode (zero-width spaces, BOM, soft hyphens)
pub fn clean_response(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_code_fences(&s);
    let s = strip_triple_quotes(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

/// Clean a single rewritten paragraph.
///
/// 1. Strip `**bold**`, `*italic*` and `__underline__` markers
/// 2. Drop leading heading hashes and a leading `- ` bullet
/// 3. Collapse runs of spaces
/// 4. Trim each line and the whole segment
pub fn clean_segment(input: &str) -> String {
    let s = strip_emphasis(input);
    let s = strip_line_prefixes(&s);
    let s = collapse_spaces(&s);
    s.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Split a cleaned response on blank lines into non-empty segments.
pub fn split_segments(response: &str) -> Vec<String> {
    RE_BLANK_LINE
        .split(response)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Rule: Normalise line endings ─────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule: Strip outer code fences ────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule: Strip outer triple quotes ──────────────────────────────────────────

fn strip_triple_quotes(input: &str) -> String {
    let t = input.trim();
    match t.strip_prefix("\"\"\"").and_then(|r| r.strip_suffix("\"\"\"")) {
        Some(inner) => inner.to_string(),
        None => input.to_string(),
    }
}

// ── Rule: Remove invisible Unicode characters ────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule: Strip emphasis markers ─────────────────────────────────────────────

static RE_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static RE_ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*\n]+?)\*").unwrap());
static RE_UNDERLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__(.*?)__").unwrap());

fn strip_emphasis(input: &str) -> String {
    let s = RE_BOLD.replace_all(input, "$1");
    let s = RE_ITALIC.replace_all(&s, "$1");
    RE_UNDERLINE.replace_all(&s, "$1").to_string()
}

// ── Rule: Drop heading hashes and bullets ────────────────────────────────────

static RE_HEADING_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#+\s*").unwrap());

fn strip_line_prefixes(input: &str) -> String {
    let s = RE_HEADING_PREFIX.replace_all(input, "");
    let t = s.trim_start();
    match t.strip_prefix("- ") {
        Some(rest) => rest.to_string(),
        None => s.to_string(),
    }
}

// ── Rule: Collapse runs of spaces ────────────────────────────────────────────

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ ]{2,}").unwrap());

fn collapse_spaces(input: &str) -> String {
    RE_SPACES.replace_all(input, " ").to_string()
}

static RE_BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").unwrap());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_fences_are_stripped() {
        let raw = "```text\nFirst.\n\nSecond.\n```\n";
        assert_eq!(clean_response(raw), "First.\n\nSecond.");
    }

    #[test]
    fn response_crlf_normalised() {
        assert_eq!(clean_response("a\r\n\r\nb"), "a\n\nb");
    }

    #[test]
    fn response_triple_quotes_are_stripped() {
        assert_eq!(clean_response("\"\"\"\nHello.\n\"\"\""), "Hello.");
    }

    #[test]
    fn response_invisible_chars_removed() {
        assert_eq!(clean_response("a\u{200B}b\u{FEFF}"), "ab");
    }

    #[test]
    fn segment_emphasis_removed() {
        assert_eq!(
            clean_segment("The **wind** was *very* __strong__."),
            "The wind was very strong."
        );
    }

    #[test]
    fn segment_heading_and_bullet_removed() {
        assert_eq!(clean_segment("## Chapter One"), "Chapter One");
        assert_eq!(clean_segment("- He ran home."), "He ran home.");
    }

    #[test]
    fn segment_double_spaces_collapsed() {
        assert_eq!(clean_segment("He  ran.   Fast."), "He ran. Fast.");
    }

    #[test]
    fn segment_keeps_inner_hyphen() {
        assert_eq!(clean_segment("A well-known - and loved - tale."), "A well-known - and loved - tale.");
    }

    #[test]
    fn split_on_blank_lines_only() {
        let segs = split_segments("One\nstill one.\n\nTwo.\n  \nThree.\n\n\n");
        assert_eq!(segs, vec!["One\nstill one.", "Two.", "Three."]);
    }

    #[test]
    fn split_ignores_extra_blank_lines() {
        let segs = split_segments("A.\n\n\n\nB.");
        assert_eq!(segs, vec!["A.", "B."]);
    }
}
