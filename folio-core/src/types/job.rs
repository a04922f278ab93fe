//! Conversion job records

use crate::error::FolioError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Observable stage of a conversion job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Preprocessing,
    Segmenting,
    Assembling,
    PatchingMetadata,
    Finalizing,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStage {
    /// Whether the job can no longer change
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStage::Succeeded | JobStage::Failed | JobStage::Canceled)
    }

    /// Progress floor for the stage; progress is reset to this on entry and
    /// only ever increases within a run
    pub fn progress_floor(self) -> u8 {
        match self {
            JobStage::Queued => 0,
            JobStage::Preprocessing => 5,
            JobStage::Segmenting => 20,
            JobStage::Assembling => 45,
            JobStage::PatchingMetadata => 70,
            JobStage::Finalizing => 85,
            JobStage::Succeeded => 100,
            // Terminal failure/cancel keeps the last value for diagnostics
            JobStage::Failed | JobStage::Canceled => 0,
        }
    }
}

/// A single conversion job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,

    /// Target book, allocated at submission
    pub book_id: Option<Uuid>,

    pub stage: JobStage,

    /// 0-100, monotonic within a run
    pub progress: u8,

    /// Present only when `stage == Failed`
    pub error: Option<JobErrorRecord>,

    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: Uuid, book_id: Option<Uuid>) -> Self {
        Self {
            id,
            book_id,
            stage: JobStage::Queued,
            progress: 0,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Classified error recorded on a failed job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobErrorRecord {
    pub kind: JobErrorKind,

    /// Human-readable detail, recorded verbatim
    pub detail: String,

    /// Offending location when applicable (byte offset, path, pattern)
    pub location: Option<String>,
}

/// Error taxonomy surfaced to callers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    Encoding,
    Template,
    Assembly,
    NotAnEpub,
    CorruptArchive,
    Conflict,
    Preprocess,
    Storage,
    Internal,
}

impl JobErrorRecord {
    /// Classify a pipeline error at the stage boundary
    pub fn classify(err: &FolioError) -> Self {
        use crate::error::{PatchError, SegmentError};

        let (kind, location) = match err {
            FolioError::Segment(SegmentError::Encoding { offset }) => {
                (JobErrorKind::Encoding, Some(format!("byte {offset}")))
            }
            FolioError::Template(t) => (JobErrorKind::Template, Some(t.to_string())),
            FolioError::Assembly(_) => (JobErrorKind::Assembly, None),
            FolioError::Patch(PatchError::NotAnEpub(detail)) => {
                (JobErrorKind::NotAnEpub, Some(detail.clone()))
            }
            FolioError::Patch(PatchError::CorruptArchive(detail)) => {
                (JobErrorKind::CorruptArchive, Some(detail.clone()))
            }
            FolioError::Patch(_) => (JobErrorKind::NotAnEpub, None),
            FolioError::Conflict { book_id } => (JobErrorKind::Conflict, Some(book_id.to_string())),
            FolioError::Preprocess(_) => (JobErrorKind::Preprocess, None),
            FolioError::Storage(_) => (JobErrorKind::Storage, None),
            _ => (JobErrorKind::Internal, None),
        };

        Self {
            kind,
            detail: err.to_string(),
            location,
        }
    }
}
