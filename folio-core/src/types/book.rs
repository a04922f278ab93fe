//! Library book records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Whether the on-disk archive matches the last successful conversion or patch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    /// Archive generated but not yet finalized
    Pending,
    /// Archive on disk reflects the latest successful job
    Synced,
    /// The last job touching this book failed
    Error,
}

/// A book tracked by the library index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookRecord {
    /// Stable identity, assigned at first ingestion
    pub id: Uuid,

    pub title: String,
    pub author: Option<String>,
    pub series: Option<String>,
    pub description: Option<String>,

    /// Reference to the cover resource inside the archive, when present
    pub cover_ref: Option<String>,

    /// Archive location; immutable once assigned
    pub path: PathBuf,

    /// Owned exclusively by the job state machine
    pub status: BookStatus,

    pub updated_at: DateTime<Utc>,
}

impl BookRecord {
    /// Create a new record in `Pending` state
    pub fn new(id: Uuid, title: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            title: title.into(),
            author: None,
            series: None,
            description: None,
            cover_ref: None,
            path: path.into(),
            status: BookStatus::Pending,
            updated_at: Utc::now(),
        }
    }
}

/// Caller-supplied metadata overrides; explicit values always win over
/// anything derived from the manuscript
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetadataOverrides {
    pub title: Option<String>,
    pub author: Option<String>,
    pub series: Option<String>,
    pub description: Option<String>,
}

/// Filter for library listings
#[derive(Debug, Clone, Default)]
pub struct BookFilter {
    pub status: Option<BookStatus>,
    pub author: Option<String>,
}

/// Sort order for library listings
#[derive(Debug, Clone, Copy, Default)]
pub enum BookSort {
    /// Case-insensitive title, ascending
    #[default]
    Title,
    /// Most recently updated first
    UpdatedAt,
}
