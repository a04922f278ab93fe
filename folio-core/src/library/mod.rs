//! Library index
//!
//! A flat, serializable catalog of every book the system knows about. The
//! index holds records only; archive bytes live on disk at each record's
//! `path`. Status transitions are driven exclusively by the job state
//! machine, the index itself just stores them.

use crate::error::StorageError;
use crate::storage;
use crate::types::{BookFilter, BookRecord, BookSort, BookStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryIndex {
    books: HashMap<Uuid, BookRecord>,
}

impl LibraryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<&BookRecord> {
        self.books.get(id)
    }

    /// Insert or replace a record, keyed by its id
    pub fn upsert(&mut self, record: BookRecord) {
        self.books.insert(record.id, record);
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<BookRecord> {
        self.books.remove(id)
    }

    /// Update a record's status, bumping `updated_at`.
    /// Returns false when the book is unknown.
    pub fn set_status(&mut self, id: &Uuid, status: BookStatus) -> bool {
        match self.books.get_mut(id) {
            Some(record) => {
                record.status = status;
                record.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Filtered, sorted listing
    pub fn list(&self, filter: &BookFilter, sort: BookSort) -> Vec<BookRecord> {
        let mut out: Vec<BookRecord> = self
            .books
            .values()
            .filter(|b| filter.status.is_none_or(|s| b.status == s))
            .filter(|b| {
                filter
                    .author
                    .as_deref()
                    .is_none_or(|a| b.author.as_deref() == Some(a))
            })
            .cloned()
            .collect();

        match sort {
            BookSort::Title => {
                out.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
            }
            BookSort::UpdatedAt => out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
        }
        out
    }

    /// Load the index from disk; a missing file yields an empty index
    pub async fn load(path: &Path) -> Result<Self, StorageError> {
        match storage::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Backend(format!("parse {}: {e}", path.display()))),
            Err(StorageError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Persist the index atomically
    pub async fn save(&self, path: &Path) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StorageError::Backend(format!("serialize index: {e}")))?;
        storage::write_atomic(path, json.as_bytes()).await
    }
}
