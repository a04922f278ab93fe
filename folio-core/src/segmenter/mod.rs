//! Rule-driven structural segmentation
//!
//! Turns a flat stream of manuscript bytes into a hierarchical TOC tree plus
//! an audit list of skipped lines. `segment` is a pure function of its inputs:
//! no I/O, no shared state. Same input and same template version always yield
//! the same tree.

use crate::error::SegmentError;
use crate::types::{RuleSet, SkipReason, SkippedLine, TitleExtraction, TocNode};
use encoding_rs::{Encoding, GB18030, UTF_8};

/// Result of segmenting one manuscript
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    /// Synthetic root; front matter lives in its `content`
    pub root: TocNode,

    /// Lines removed before classification, in input order
    pub skipped: Vec<SkippedLine>,

    /// Title derived per the template's strategy; callers' explicit titles
    /// always take precedence
    pub derived_title: Option<String>,
}

/// Segmentation engine with a configurable, ordered encoding candidate list
#[derive(Debug, Clone)]
pub struct Segmenter {
    encodings: Vec<&'static Encoding>,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self {
            encodings: vec![UTF_8, GB18030],
        }
    }
}

impl Segmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the candidate encodings; first clean decode wins
    pub fn with_encodings(mut self, encodings: Vec<&'static Encoding>) -> Self {
        self.encodings = encodings;
        self
    }

    /// Segment raw manuscript bytes with a compiled rule template
    pub fn segment(&self, raw: &[u8], rules: &RuleSet) -> Result<Segmentation, SegmentError> {
        let text = self.decode(raw)?;
        let lines = logical_lines(&text);

        let mut skipped = Vec::new();
        let mut root = TocNode::new(0, "", 1);
        // Currently open nodes, root excluded, levels strictly increasing
        let mut stack: Vec<TocNode> = Vec::new();

        for (idx, raw_line) in lines.iter().enumerate() {
            let line_no = idx + 1;

            let mut line = (*raw_line).to_string();
            let mut rewritten = false;
            let mut dropped = false;
            for rule in &rules.cleanup {
                match &rule.action {
                    crate::types::CleanupAction::Drop => {
                        if rule.regex.is_match(&line) {
                            skipped.push(SkippedLine {
                                line_number: line_no,
                                raw_text: (*raw_line).to_string(),
                                reason: SkipReason::NoiseDrop,
                            });
                            dropped = true;
                            break;
                        }
                    }
                    crate::types::CleanupAction::Replace(replacement) => {
                        if rule.regex.is_match(&line) {
                            line = rule.regex.replace_all(&line, replacement.as_str()).into_owned();
                            rewritten = true;
                        }
                    }
                }
            }
            if dropped {
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                skipped.push(SkippedLine {
                    line_number: line_no,
                    raw_text: (*raw_line).to_string(),
                    reason: SkipReason::Empty,
                });
                continue;
            }

            if let Some(level_idx) = rules.match_level(trimmed) {
                let node_level = level_idx + 1;
                close_open_nodes(&mut root, &mut stack, node_level, line_no);
                stack.push(TocNode::new(node_level, trimmed, line_no));
            } else {
                // Keep the original text unless a cleanup rule rewrote it
                let content_line = if rewritten { line } else { (*raw_line).to_string() };
                match stack.last_mut() {
                    Some(open) => open.content.push(content_line),
                    None => root.content.push(content_line),
                }
            }
        }

        let end = lines.len() + 1;
        close_open_nodes(&mut root, &mut stack, 1, end);
        root.source_line_range = (1, end);

        let derived_title = derive_title(&root, rules);

        Ok(Segmentation {
            root,
            skipped,
            derived_title,
        })
    }

    /// Decode with the first candidate encoding that accepts the whole input.
    /// The reported offset is the first candidate's failure position.
    fn decode(&self, raw: &[u8]) -> Result<String, SegmentError> {
        if raw.is_empty() {
            return Ok(String::new());
        }

        let mut first_failure: Option<usize> = None;
        for enc in &self.encodings {
            let mut decoder = enc.new_decoder();
            let capacity = decoder
                .max_utf8_buffer_length_without_replacement(raw.len())
                .unwrap_or(raw.len().saturating_mul(3) + 4);
            let mut out = String::with_capacity(capacity);
            let (result, read) = decoder.decode_to_string_without_replacement(raw, &mut out, true);
            match result {
                encoding_rs::DecoderResult::InputEmpty => return Ok(out),
                encoding_rs::DecoderResult::Malformed(bad, pushed) => {
                    let offset = read.saturating_sub(bad as usize + pushed as usize);
                    first_failure.get_or_insert(offset);
                }
                encoding_rs::DecoderResult::OutputFull => {
                    first_failure.get_or_insert(read);
                }
            }
        }
        Err(SegmentError::Encoding {
            offset: first_failure.unwrap_or(0),
        })
    }
}

/// Split decoded text into logical lines, tolerating CRLF endings.
/// A trailing newline does not produce a phantom empty line.
fn logical_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&str> = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)).collect();
    if text.ends_with('\n') {
        lines.pop();
    }
    lines
}

/// Close all open nodes at `level` or deeper, attaching each to its parent.
/// The boundary line itself is excluded from the closed ranges.
fn close_open_nodes(root: &mut TocNode, stack: &mut Vec<TocNode>, level: usize, boundary_line: usize) {
    while stack.last().is_some_and(|open| open.level >= level) {
        let Some(mut closed) = stack.pop() else { break };
        closed.source_line_range.1 = boundary_line;
        match stack.last_mut() {
            Some(parent) => parent.children.push(closed),
            None => root.children.push(closed),
        }
    }
}

fn derive_title(root: &TocNode, rules: &RuleSet) -> Option<String> {
    match &rules.title_extraction {
        TitleExtraction::None => None,
        TitleExtraction::Fixed(value) => Some(value.clone()),
        TitleExtraction::FirstShortLine => {
            let max_width = rules.min_content_line_length.saturating_mul(3);
            root.content
                .iter()
                .map(|line| line.trim())
                .find(|line| !line.is_empty() && line.chars().count() < max_width)
                .map(str::to_string)
        }
    }
}
