//! Table-of-contents tree produced by the segmentation engine

use serde::{Deserialize, Serialize};

/// A node in the TOC tree.
///
/// The tree is a strict forest rooted at a synthetic root node (level 0).
/// Front matter before the first structural match lands in the root's own
/// `content`, so no input line is ever lost. A node opened by the pattern at
/// hierarchy index `i` has level `i + 1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TocNode {
    /// Hierarchy depth, 0 = synthetic root
    pub level: usize,

    /// Matched line after cleanup; empty for the synthetic root
    pub title: String,

    /// Content lines up to the next structural match at the same or
    /// shallower level; excludes children's titles and content
    pub content: Vec<String>,

    /// Ordered child nodes
    pub children: Vec<TocNode>,

    /// 1-based, half-open range of source lines covered by this node
    pub source_line_range: (usize, usize),
}

impl TocNode {
    /// Create a new node opening at the given source line
    pub fn new(level: usize, title: impl Into<String>, start_line: usize) -> Self {
        Self {
            level,
            title: title.into(),
            content: Vec::new(),
            children: Vec::new(),
            source_line_range: (start_line, start_line),
        }
    }

    /// Whether this is the synthetic root
    pub fn is_root(&self) -> bool {
        self.level == 0
    }

    /// Whether the node carries any non-blank content of its own
    pub fn has_content(&self) -> bool {
        self.content.iter().any(|line| !line.trim().is_empty())
    }

    /// Node content joined with newlines
    pub fn text(&self) -> String {
        self.content.join("\n")
    }

    /// Total number of nodes in this subtree, including self
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TocNode::node_count).sum::<usize>()
    }

    /// Depth-first iteration over the subtree, self first
    pub fn walk(&self) -> impl Iterator<Item = &TocNode> {
        let mut out = Vec::with_capacity(self.node_count());
        fn push<'a>(node: &'a TocNode, out: &mut Vec<&'a TocNode>) {
            out.push(node);
            for child in &node.children {
                push(child, out);
            }
        }
        push(self, &mut out);
        out.into_iter()
    }
}

/// A line removed before structural classification, kept for preview/audit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedLine {
    /// 1-based line number in the decoded input
    pub line_number: usize,

    /// The line as it appeared before cleanup
    pub raw_text: String,

    pub reason: SkipReason,
}

/// Why a line was skipped
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A cleanup rule with a drop action matched
    NoiseDrop,
    /// The line was blank (or blank after cleanup)
    Empty,
}
