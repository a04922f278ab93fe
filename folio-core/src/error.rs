//! Error types for Folio Core

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using FolioError
pub type Result<T> = std::result::Result<T, FolioError>;

/// Top-level error type for all Folio operations
#[derive(Debug, Error)]
pub enum FolioError {
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Segmentation error: {0}")]
    Segment(#[from] SegmentError),

    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Patch error: {0}")]
    Patch(#[from] PatchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Conflict: book {book_id} already has an active job")]
    Conflict { book_id: Uuid },

    #[error("Preprocess error: {0}")]
    Preprocess(String),

    #[error("Unknown job: {0}")]
    UnknownJob(Uuid),

    #[error("Unknown book: {0}")]
    UnknownBook(Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading or compiling a rule template
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("invalid pattern {pattern:?} for level {level:?}: {source}")]
    InvalidPattern {
        level: String,
        pattern: String,
        source: regex::Error,
    },

    #[error("invalid cleanup pattern {pattern:?}: {source}")]
    InvalidCleanup {
        pattern: String,
        source: regex::Error,
    },

    #[error("template has no structural patterns")]
    NoStructuralPatterns,

    #[error("template not found: {0}")]
    NotFound(String),

    #[error("malformed template document {path:?}: {detail}")]
    Malformed { path: String, detail: String },
}

/// Errors raised by the segmentation engine
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("no candidate encoding decoded the input (first failure at byte {offset})")]
    Encoding { offset: usize },
}

/// Errors raised by the EPUB assembler
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("TOC tree is empty, nothing to assemble")]
    EmptyToc,

    #[error("cover image is not a supported raster format")]
    UnsupportedCover,

    #[error("archive write failed: {0}")]
    Archive(String),
}

/// Errors raised by the metadata patcher
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("not an EPUB archive: {0}")]
    NotAnEpub(String),

    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("cover image is not a supported raster format")]
    UnsupportedCover,

    #[error("archive write failed: {0}")]
    Archive(String),
}

/// Errors raised by archive/index storage
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),
}
