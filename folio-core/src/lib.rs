//! Folio Core Library
//!
//! This crate turns plain-text manuscripts into EPUB books. A rule template
//! segments the text into a TOC tree, the assembler maps the tree to a
//! deterministic EPUB archive, and the patcher edits metadata of existing
//! archives at the zip level. The job runner orchestrates the pipeline and
//! keeps the library index in sync with the archives on disk.

pub mod assembler;
pub mod error;
pub mod jobs;
pub mod library;
pub mod patcher;
pub mod segmenter;
pub mod storage;
pub mod templates;
pub mod types;

pub use assembler::EpubMetadata;
pub use error::{
    AssemblyError, FolioError, PatchError, Result, SegmentError, StorageError, TemplateError,
};
pub use jobs::{ConvertRequest, ImportRequest, JobRunner, PatchRequest};
pub use library::LibraryIndex;
pub use patcher::{EpubSummary, MetadataPatch};
pub use segmenter::{Segmentation, Segmenter};
pub use templates::RuleTemplateStore;
pub use types::{
    BookFilter, BookRecord, BookSort, BookStatus, Job, JobErrorKind, JobErrorRecord, JobStage,
    MetadataOverrides, RuleSet, RuleTemplate, SkipReason, SkippedLine, TocNode,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_segments_a_manuscript() {
        let rules = templates::default_template().compile().unwrap();
        let seg = Segmenter::new()
            .segment("第一章 开端\n正文。\n".as_bytes(), &rules)
            .unwrap();
        assert_eq!(seg.root.children[0].title, "第一章 开端");
    }
}
