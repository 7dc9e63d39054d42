//! Paragraph-level document model shared by the input and the output side.
//!
//! The pipeline never looks inside a paragraph's formatting: it only needs
//! the ordered text and a coarse style tag so a rewritten paragraph can be
//! written back with the style it came in with. Two on-disk encodings are
//! supported:
//!
//! * **Markdown / plain text**: blocks separated by blank lines. `#`
//!   headings, `>` quotes and `-`/`*` list items are recognised; everything
//!   else is a normal paragraph.
//! * **JSON**: the serde form of [`Document`], lossless for any style name.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Structural role of a paragraph in the source document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StyleTag {
    #[default]
    Normal,
    /// Section heading, level 1–6.
    Heading { level: u8 },
    /// Any other named style (quote, list item, caption, …).
    Other { name: String },
}

impl StyleTag {
    pub const QUOTE: &'static str = "Quote";
    pub const LIST_BULLET: &'static str = "List Bullet";

    pub fn heading(level: u8) -> Self {
        StyleTag::Heading {
            level: level.clamp(1, 6),
        }
    }

    pub fn other(name: impl Into<String>) -> Self {
        StyleTag::Other { name: name.into() }
    }

    fn is_list_item(&self) -> bool {
        matches!(self, StyleTag::Other { name } if name == Self::LIST_BULLET)
    }
}

/// One paragraph of the document. `index` is its 0-based position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub index: usize,
    pub text: String,
    #[serde(default)]
    pub style: StyleTag,
}

impl Paragraph {
    pub fn new(index: usize, text: impl Into<String>, style: StyleTag) -> Self {
        Self {
            index,
            text: text.into(),
            style,
        }
    }
}

/// An ordered sequence of paragraphs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub paragraphs: Vec<Paragraph>,
}

/// On-disk encoding of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DocumentFormat {
    #[default]
    Markdown,
    Json,
}

impl DocumentFormat {
    /// Pick the encoding from a file extension; anything but `.json` is Markdown.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Markdown,
        }
    }
}

impl Document {
    /// Build a document from `(text, style)` pairs, numbering them in order.
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = (S, StyleTag)>,
        S: Into<String>,
    {
        let paragraphs = parts
            .into_iter()
            .enumerate()
            .map(|(i, (text, style))| Paragraph::new(i, text, style))
            .collect();
        Self { paragraphs }
    }

    /// Append a paragraph at the end, assigning the next index.
    pub fn push(&mut self, text: impl Into<String>, style: StyleTag) {
        let index = self.paragraphs.len();
        self.paragraphs.push(Paragraph::new(index, text, style));
    }

    pub fn len(&self) -> usize {
        self.paragraphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Paragraph> {
        self.paragraphs.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Paragraph> {
        self.paragraphs.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Paragraph> {
        self.paragraphs.iter()
    }

    /// Parse Markdown or plain text into paragraphs.
    pub fn from_markdown(input: &str) -> Self {
        let normalised = input.replace("\r\n", "\n").replace('\r', "\n");
        let mut doc = Document::default();

        for block in split_blocks(&normalised) {
            let lines: Vec<&str> = block.lines().collect();
            let first = lines[0].trim_start();

            if let Some((level, rest)) = parse_heading(first) {
                let mut text = rest.to_string();
                for extra in &lines[1..] {
                    text.push(' ');
                    text.push_str(extra.trim());
                }
                doc.push(text, StyleTag::heading(level));
            } else if lines.iter().all(|l| l.trim_start().starts_with('>')) {
                let text = lines
                    .iter()
                    .map(|l| strip_quote_marker(l))
                    .collect::<Vec<_>>()
                    .join("\n");
                doc.push(text, StyleTag::other(StyleTag::QUOTE));
            } else if list_marker(first).is_some() {
                // One paragraph per item; continuation lines attach to the item above.
                let mut current: Option<String> = None;
                for line in &lines {
                    match list_marker(line.trim_start()) {
                        Some(item) => {
                            if let Some(done) = current.take() {
                                doc.push(done, StyleTag::other(StyleTag::LIST_BULLET));
                            }
                            current = Some(item.to_string());
                        }
                        None => {
                            if let Some(ref mut cur) = current {
                                cur.push(' ');
                                cur.push_str(line.trim());
                            }
                        }
                    }
                }
                if let Some(done) = current {
                    doc.push(done, StyleTag::other(StyleTag::LIST_BULLET));
                }
            } else {
                doc.push(lines.join("\n"), StyleTag::Normal);
            }
        }

        doc
    }

    /// Parse the JSON encoding. Indices are renumbered to match positions.
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        let mut doc: Document = serde_json::from_str(input)?;
        doc.renumber();
        Ok(doc)
    }

    /// Parse `input` with the given encoding.
    pub fn parse(input: &str, format: DocumentFormat) -> Result<Self, serde_json::Error> {
        match format {
            DocumentFormat::Markdown => Ok(Self::from_markdown(input)),
            DocumentFormat::Json => Self::from_json(input),
        }
    }

    /// Render as Markdown. Whitespace-only paragraphs have no Markdown form and are omitted.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let mut prev_list = false;

        for p in self.paragraphs.iter().filter(|p| !p.text.trim().is_empty()) {
            let is_list = p.style.is_list_item();
            if !out.is_empty() {
                out.push_str(if is_list && prev_list { "\n" } else { "\n\n" });
            }
            match &p.style {
                StyleTag::Normal => out.push_str(&p.text),
                StyleTag::Heading { level } => {
                    out.push_str(&"#".repeat(*level as usize));
                    out.push(' ');
                    out.push_str(&p.text);
                }
                StyleTag::Other { name } if name == StyleTag::QUOTE => {
                    let quoted: Vec<String> = p.text.lines().map(|l| format!("> {l}")).collect();
                    out.push_str(&quoted.join("\n"));
                }
                StyleTag::Other { .. } if is_list => {
                    out.push_str("- ");
                    out.push_str(&p.text);
                }
                StyleTag::Other { .. } => out.push_str(&p.text),
            }
            prev_list = is_list;
        }

        if !out.is_empty() {
            out.push('\n');
        }
        out
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Render with the given encoding.
    pub fn render(&self, format: DocumentFormat) -> Result<String, serde_json::Error> {
        match format {
            DocumentFormat::Markdown => Ok(self.to_markdown()),
            DocumentFormat::Json => self.to_json(),
        }
    }

    fn renumber(&mut self) {
        for (i, p) in self.paragraphs.iter_mut().enumerate() {
            p.index = i;
        }
    }
}

/// Split on blank lines, dropping empty blocks.
fn split_blocks(input: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in input.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
}

fn parse_heading(line: &str) -> Option<(u8, &str)> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &line[hashes..];
    if rest.starts_with(' ') {
        Some((hashes as u8, rest.trim()))
    } else {
        None
    }
}

fn list_marker(line: &str) -> Option<&str> {
    line.strip_prefix("- ").or_else(|| line.strip_prefix("* "))
}

fn strip_quote_marker(line: &str) -> &str {
    let l = line.trim_start().trim_start_matches('>');
    l.strip_prefix(' ').unwrap_or(l)
}
