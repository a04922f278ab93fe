//! Rule template types
//!
//! A rule template is a declarative, versioned description of how to recognize
//! structural boundaries and noise in raw manuscript text. Templates are plain
//! data (serde documents); they are compiled once into a [`RuleSet`] of typed
//! patterns, so an invalid regex is rejected at load time rather than during
//! segmentation.

use crate::error::TemplateError;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Declarative rule template as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleTemplate {
    /// Stable template identity
    pub id: String,

    /// Display name
    pub name: String,

    /// Monotonic version per template identity
    pub version: u32,

    /// Hierarchy patterns, outermost level first; order defines nesting depth
    pub structural_patterns: Vec<StructuralPattern>,

    /// Line rewrites/drops applied before structural classification
    #[serde(default)]
    pub cleanup_rules: Vec<CleanupRule>,

    /// How to derive a book title when none is supplied by the caller
    #[serde(default)]
    pub title_extraction: TitleExtraction,

    /// Heuristic width used by title derivation
    #[serde(default = "default_min_content_line_length")]
    pub min_content_line_length: usize,
}

fn default_min_content_line_length() -> usize {
    12
}

/// A single hierarchy level and the pattern that opens it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuralPattern {
    /// Level name, e.g. "volume" or "chapter"
    pub level: String,

    /// Regex matched against a single cleaned line
    pub pattern: String,
}

/// A pattern-based rewrite or drop applied to every line before classification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupRule {
    pub pattern: String,
    pub action: CleanupAction,
}

/// What a matching cleanup rule does to the line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CleanupAction {
    /// Remove the line entirely; it is recorded as a noise drop
    Drop,
    /// Rewrite every match in place with the given replacement
    Replace(String),
}

/// Title derivation strategy, used only when no explicit title is supplied
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TitleExtraction {
    /// First short content line under the root node
    #[default]
    FirstShortLine,
    /// Always the configured value
    Fixed(String),
    /// No derivation
    None,
}

impl RuleTemplate {
    /// Compile every pattern, validating the template as a whole.
    ///
    /// Pattern evaluation order in the returned [`RuleSet`] is exactly the
    /// declaration order, so segmentation is deterministic across runs.
    pub fn compile(&self) -> Result<RuleSet, TemplateError> {
        if self.structural_patterns.is_empty() {
            return Err(TemplateError::NoStructuralPatterns);
        }

        let mut levels = Vec::with_capacity(self.structural_patterns.len());
        for sp in &self.structural_patterns {
            let regex = Regex::new(&sp.pattern).map_err(|source| TemplateError::InvalidPattern {
                level: sp.level.clone(),
                pattern: sp.pattern.clone(),
                source,
            })?;
            levels.push(CompiledLevel {
                name: sp.level.clone(),
                regex,
            });
        }

        let mut cleanup = Vec::with_capacity(self.cleanup_rules.len());
        for rule in &self.cleanup_rules {
            let regex = Regex::new(&rule.pattern).map_err(|source| TemplateError::InvalidCleanup {
                pattern: rule.pattern.clone(),
                source,
            })?;
            cleanup.push(CompiledCleanup {
                regex,
                action: rule.action.clone(),
            });
        }

        Ok(RuleSet {
            template_id: self.id.clone(),
            version: self.version,
            levels,
            cleanup,
            title_extraction: self.title_extraction.clone(),
            min_content_line_length: self.min_content_line_length,
        })
    }
}

/// A rule template compiled into typed patterns, ready for segmentation
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub template_id: String,
    pub version: u32,
    pub(crate) levels: Vec<CompiledLevel>,
    pub(crate) cleanup: Vec<CompiledCleanup>,
    pub(crate) title_extraction: TitleExtraction,
    pub(crate) min_content_line_length: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledLevel {
    pub(crate) name: String,
    pub(crate) regex: Regex,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledCleanup {
    pub(crate) regex: Regex,
    pub(crate) action: CleanupAction,
}

impl RuleSet {
    /// Number of hierarchy levels this template recognizes
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Name of the hierarchy level at the given index (0 = outermost)
    pub fn level_name(&self, index: usize) -> Option<&str> {
        self.levels.get(index).map(|l| l.name.as_str())
    }

    /// Index of the first (outermost) level whose pattern matches the line
    pub(crate) fn match_level(&self, line: &str) -> Option<usize> {
        self.levels.iter().position(|level| level.regex.is_match(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(patterns: &[(&str, &str)]) -> RuleTemplate {
        RuleTemplate {
            id: "t".into(),
            name: "t".into(),
            version: 1,
            structural_patterns: patterns
                .iter()
                .map(|(level, pattern)| StructuralPattern {
                    level: (*level).into(),
                    pattern: (*pattern).into(),
                })
                .collect(),
            cleanup_rules: Vec::new(),
            title_extraction: TitleExtraction::default(),
            min_content_line_length: 12,
        }
    }

    #[test]
    fn test_compile_preserves_level_order() {
        let rules = template(&[("volume", "^V"), ("chapter", "^C")])
            .compile()
            .unwrap();
        assert_eq!(rules.depth(), 2);
        assert_eq!(rules.level_name(0), Some("volume"));
        assert_eq!(rules.match_level("V1"), Some(0));
        assert_eq!(rules.match_level("C1"), Some(1));
        assert_eq!(rules.match_level("body"), None);
    }

    #[test]
    fn test_invalid_pattern_rejected_at_compile() {
        let err = template(&[("chapter", "([")]).compile().unwrap_err();
        assert!(matches!(err, TemplateError::InvalidPattern { .. }));
    }

    #[test]
    fn test_empty_template_rejected() {
        let err = template(&[]).compile().unwrap_err();
        assert!(matches!(err, TemplateError::NoStructuralPatterns));
    }

    #[test]
    fn test_template_document_round_trip() {
        let tmpl = RuleTemplate {
            id: "default".into(),
            name: "默认".into(),
            version: 3,
            structural_patterns: vec![StructuralPattern {
                level: "chapter".into(),
                pattern: "^第.+章".into(),
            }],
            cleanup_rules: vec![CleanupRule {
                pattern: "^PS:.*".into(),
                action: CleanupAction::Drop,
            }],
            title_extraction: TitleExtraction::Fixed("正文".into()),
            min_content_line_length: 8,
        };
        let json = serde_json::to_string(&tmpl).unwrap();
        let back: RuleTemplate = serde_json::from_str(&json).unwrap();
        assert_eq!(tmpl, back);
    }
}
