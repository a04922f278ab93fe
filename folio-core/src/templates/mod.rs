//! Rule template store
//!
//! Templates live as individual JSON documents in a directory, one file per
//! template id. Opening the store seeds a built-in default tuned for Chinese
//! web-novel manuscripts when no templates exist yet.

use crate::error::TemplateError;
use crate::types::{
    CleanupAction, CleanupRule, RuleSet, RuleTemplate, StructuralPattern, TitleExtraction,
};
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_TEMPLATE_ID: &str = "default";

#[derive(Debug, Clone)]
pub struct RuleTemplateStore {
    dir: PathBuf,
}

impl RuleTemplateStore {
    /// Open a store rooted at `dir`, creating the directory and seeding the
    /// default template if it is absent.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TemplateError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| TemplateError::Malformed {
            path: dir.display().to_string(),
            detail: e.to_string(),
        })?;

        let store = Self { dir };
        let default_path = store.path_for(DEFAULT_TEMPLATE_ID);
        if !default_path.exists() {
            store.put(&default_template())?;
        }
        Ok(store)
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Load and compile a template by id
    pub fn get(&self, id: &str) -> Result<(RuleTemplate, RuleSet), TemplateError> {
        let path = self.path_for(id);
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TemplateError::NotFound(id.to_string()),
            _ => TemplateError::Malformed {
                path: path.display().to_string(),
                detail: e.to_string(),
            },
        })?;
        let template: RuleTemplate =
            serde_json::from_slice(&bytes).map_err(|e| TemplateError::Malformed {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;
        let rules = template.compile()?;
        Ok((template, rules))
    }

    /// Persist a template document, replacing any previous version
    pub fn put(&self, template: &RuleTemplate) -> Result<(), TemplateError> {
        let path = self.path_for(&template.id);
        let json = serde_json::to_string_pretty(template).map_err(|e| TemplateError::Malformed {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        fs::write(&path, json).map_err(|e| TemplateError::Malformed {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }

    /// Load every template document in the directory, skipping non-JSON files
    pub fn load_all(&self) -> Result<Vec<RuleTemplate>, TemplateError> {
        let mut out = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| TemplateError::Malformed {
            path: self.dir.display().to_string(),
            detail: e.to_string(),
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| TemplateError::Malformed {
                path: self.dir.display().to_string(),
                detail: e.to_string(),
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).map_err(|e| TemplateError::Malformed {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;
            let template: RuleTemplate =
                serde_json::from_slice(&bytes).map_err(|e| TemplateError::Malformed {
                    path: path.display().to_string(),
                    detail: e.to_string(),
                })?;
            out.push(template);
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

/// Built-in template for Chinese web-novel manuscripts
pub fn default_template() -> RuleTemplate {
    RuleTemplate {
        id: DEFAULT_TEMPLATE_ID.into(),
        name: "中文网文默认".into(),
        version: 1,
        structural_patterns: vec![
            StructuralPattern {
                level: "volume".into(),
                pattern: "^第\\s*[0-9一二三四五六七八九十百千万两零〇]+\\s*卷.*".into(),
            },
            StructuralPattern {
                level: "chapter".into(),
                pattern: "^第\\s*[0-9一二三四五六七八九十百千万两零〇]+\\s*[章节回].*".into(),
            },
        ],
        cleanup_rules: vec![
            CleanupRule {
                pattern: "^\\s*(PS|ps)[:：].*".into(),
                action: CleanupAction::Drop,
            },
            CleanupRule {
                pattern: "^.*(最新章节|手打更新|广告|本章完).*$".into(),
                action: CleanupAction::Drop,
            },
            CleanupRule {
                pattern: "\u{3000}".into(),
                action: CleanupAction::Replace("  ".into()),
            },
        ],
        title_extraction: TitleExtraction::FirstShortLine,
        min_content_line_length: 12,
    }
}
