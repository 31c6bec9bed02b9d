//! Upload status persistence.
//!
//! One [`UploadRecord`] per file base name. Uploading a file with a name that
//! was already seen overwrites the destination and upload time of the
//! existing record.

mod sqlite;

pub use sqlite::SqliteRecordStore;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{CamwatchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Uploaded,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Uploaded => "uploaded",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = CamwatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uploaded" => Ok(UploadStatus::Uploaded),
            other => Err(CamwatchError::InvalidInput(format!("unknown upload status: {}", other))),
        }
    }
}

/// Persisted upload status, keyed by file base name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub file_name: String,
    pub destination: String,
    pub status: UploadStatus,
    /// Set on first insert only
    pub created_at: DateTime<Utc>,
    /// Refreshed on every successful upload
    pub uploaded_at: DateTime<Utc>,
}

/// Upsert-by-key record persistence
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or update the record for `file_name` with status `uploaded`.
    /// `created_at` is only written on insert.
    async fn upsert_uploaded(&self, file_name: &str, destination: &str, at: DateTime<Utc>) -> Result<()>;

    async fn find(&self, file_name: &str) -> Result<Option<UploadRecord>>;

    /// Most recently uploaded first
    async fn list_recent(&self, limit: usize) -> Result<Vec<UploadRecord>>;
}

/// Marks files as uploaded in the record store
#[derive(Clone)]
pub struct StatusStore {
    records: Arc<dyn RecordStore>,
}

impl StatusStore {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Record that `file_name` now lives at `destination`. Errors propagate
    /// unchanged; nothing is buffered or retried.
    pub async fn mark_uploaded(&self, file_name: &str, destination: &str) -> Result<()> {
        self.records
            .upsert_uploaded(file_name, destination, Utc::now())
            .await
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }
}
