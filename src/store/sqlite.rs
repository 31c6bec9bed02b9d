use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{RecordStore, UploadRecord, UploadStatus};
use crate::db::Db;
use crate::error::{CamwatchError, Result};

/// [`RecordStore`] backed by the `files` table
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    db: Db,
}

impl SqliteRecordStore {
    /// Wrap an already migrated database
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Run migrations, then wrap. Fails if the database cannot be opened.
    pub async fn open(db: Db) -> Result<Self> {
        db.migrate().await?;
        log::info!("Record store ready: {}", db.path().display());
        Ok(Self { db })
    }
}

fn to_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CamwatchError::InvalidInput(format!("invalid timestamp {}: {}", value, e)))
}

/// Raw column values; converted outside the rusqlite row callback
struct RawRecord {
    file_name: String,
    destination: String,
    status: String,
    created_at: String,
    uploaded_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            file_name: row.get(0)?,
            destination: row.get(1)?,
            status: row.get(2)?,
            created_at: row.get(3)?,
            uploaded_at: row.get(4)?,
        })
    }

    fn into_record(self) -> Result<UploadRecord> {
        Ok(UploadRecord {
            status: self.status.parse::<UploadStatus>()?,
            created_at: parse_timestamp(&self.created_at)?,
            uploaded_at: parse_timestamp(&self.uploaded_at)?,
            file_name: self.file_name,
            destination: self.destination,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upsert_uploaded(&self, file_name: &str, destination: &str, at: DateTime<Utc>) -> Result<()> {
        let file_name = file_name.to_string();
        let destination = destination.to_string();
        let at = to_timestamp(at);

        self.db
            .with_connection(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO files (file_name, destination, status, created_at, uploaded_at)
                    VALUES (?1, ?2, ?3, ?4, ?4)
                    ON CONFLICT(file_name) DO UPDATE SET
                        destination = excluded.destination,
                        status = excluded.status,
                        uploaded_at = excluded.uploaded_at
                    "#,
                    params![file_name, destination, UploadStatus::Uploaded.as_str(), at],
                )?;
                Ok(())
            })
            .await
    }

    async fn find(&self, file_name: &str) -> Result<Option<UploadRecord>> {
        let file_name = file_name.to_string();
        let raw = self
            .db
            .with_connection(move |conn| {
                let raw = conn
                    .query_row(
                        "SELECT file_name, destination, status, created_at, uploaded_at
                         FROM files WHERE file_name = ?1",
                        params![file_name],
                        RawRecord::from_row,
                    )
                    .optional()?;
                Ok(raw)
            })
            .await?;
        raw.map(RawRecord::into_record).transpose()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<UploadRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT file_name, destination, status, created_at, uploaded_at
                     FROM files ORDER BY uploaded_at DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit], RawRecord::from_row)?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(RawRecord::into_record).collect()
    }
}
