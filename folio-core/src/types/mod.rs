//! Core types shared across the Folio conversion pipeline

mod book;
mod job;
mod rule;
mod toc;

pub use book::{BookFilter, BookRecord, BookSort, BookStatus, MetadataOverrides};
pub use job::{Job, JobErrorKind, JobErrorRecord, JobStage};
pub use rule::{CleanupAction, CleanupRule, RuleSet, RuleTemplate, StructuralPattern, TitleExtraction};
pub use toc::{SkipReason, SkippedLine, TocNode};
