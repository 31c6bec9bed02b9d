//! Upload of a single local file to object storage.
//!
//! [`Uploader::upload`] never returns an error: validation and transfer
//! failures are captured in the returned [`UploadOutcome`].

mod content_type;
mod naming;

pub use content_type::{content_type_for, DEFAULT_CONTENT_TYPE};
pub use naming::{destination_key, format_bytes};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{CamwatchError, Result};
use crate::storage::{ObjectMetadata, ObjectStore, PutObject};

/// Result of one upload attempt
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub success: bool,
    pub source_path: PathBuf,
    /// Full storage URI, e.g. `gs://bucket/2024/03/15/a.jpg`
    pub destination: String,
    pub uploaded_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Validates, transfers, and optionally removes local files
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    delete_after_upload: bool,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, delete_after_upload: bool) -> Self {
        log::info!("Uploader initialized for bucket: {}", store.bucket());
        Self {
            store,
            delete_after_upload,
        }
    }

    pub fn bucket(&self) -> &str {
        self.store.bucket()
    }

    /// Upload `source` under a key derived from the current UTC date
    pub async fn upload(&self, source: &Path) -> UploadOutcome {
        self.upload_at(source, Utc::now()).await
    }

    /// Upload `source` as if ingested at `now`
    pub async fn upload_at(&self, source: &Path, now: DateTime<Utc>) -> UploadOutcome {
        let start = Instant::now();
        let file_name = base_name(source);
        let key = destination_key(&now, &file_name);
        let destination = self.store.object_uri(&key);

        log::debug!("Starting upload: {} -> {}", source.display(), destination);

        let result = self.transfer(source, &key, now).await;
        let uploaded_at = Utc::now();

        match result {
            Ok(size) => {
                log::info!(
                    "Uploaded {} in {}ms ({})",
                    file_name,
                    start.elapsed().as_millis(),
                    format_bytes(size)
                );

                if self.delete_after_upload {
                    self.remove_local(source);
                }

                UploadOutcome {
                    success: true,
                    source_path: source.to_path_buf(),
                    destination,
                    uploaded_at,
                    error: None,
                }
            }
            Err(e) => {
                log::error!("Failed to upload {}: {}", file_name, e);
                UploadOutcome {
                    success: false,
                    source_path: source.to_path_buf(),
                    destination,
                    uploaded_at,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Validate the source and hand it to the store; returns the file size
    async fn transfer(&self, source: &Path, key: &str, now: DateTime<Utc>) -> Result<u64> {
        let metadata = match tokio::fs::metadata(source).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CamwatchError::InvalidInput(format!(
                    "File does not exist: {}",
                    source.display()
                )));
            }
            Err(e) => return Err(CamwatchError::Io(e)),
        };
        if !metadata.is_file() {
            return Err(CamwatchError::InvalidInput(format!(
                "Not a file: {}",
                source.display()
            )));
        }

        let object_metadata = ObjectMetadata {
            uploaded_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            original_path: source.display().to_string(),
        };
        self.store
            .put(PutObject {
                key,
                source,
                content_type: content_type_for(source),
                metadata: &object_metadata,
            })
            .await?;

        Ok(metadata.len())
    }

    /// Delete the local copy; failure only warns since the upload already succeeded.
    fn remove_local(&self, source: &Path) {
        match std::fs::remove_file(source) {
            Ok(()) => log::debug!("Deleted local file: {}", source.display()),
            Err(e) => {
                log::warn!("Could not delete local file {}: {}", source.display(), e);
                log::debug!("File will remain in the watched directory");
            }
        }
    }
}

/// Final path component as a string
pub fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Debug, Clone)]
    struct RecordedPut {
        key: String,
        content_type: String,
        metadata: ObjectMetadata,
    }

    #[derive(Default)]
    struct RecordingStore {
        puts: Mutex<Vec<RecordedPut>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        fn bucket(&self) -> &str {
            "test-bucket"
        }

        async fn put(&self, object: PutObject<'_>) -> Result<()> {
            self.puts.lock().unwrap().push(RecordedPut {
                key: object.key.to_string(),
                content_type: object.content_type.to_string(),
                metadata: object.metadata.clone(),
            });
            match &self.fail_with {
                Some(msg) => Err(CamwatchError::Storage(msg.clone())),
                None => Ok(()),
            }
        }
    }

    fn ingest_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn test_upload_success() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("test.jpg");
        fs::write(&source, vec![0u8; 1536]).unwrap();

        let store = Arc::new(RecordingStore::default());
        let uploader = Uploader::new(store.clone(), false);
        let outcome = uploader.upload_at(&source, ingest_time()).await;

        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.destination, "gs://test-bucket/2024/03/15/test.jpg");
        assert_eq!(outcome.source_path, source);
        assert!(outcome.error.is_none());

        let puts = store.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].key, "2024/03/15/test.jpg");
        assert_eq!(puts[0].content_type, "image/jpeg");
        assert_eq!(puts[0].metadata.uploaded_at, "2024-03-15T10:30:00.000Z");
        assert_eq!(puts[0].metadata.original_path, source.display().to_string());
        // Kept when delete_after_upload is off
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_missing_file_never_reaches_store() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("missing.jpg");

        let store = Arc::new(RecordingStore::default());
        let uploader = Uploader::new(store.clone(), false);
        let outcome = uploader.upload(&source).await;

        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("does not exist"));
        assert!(outcome.destination.ends_with("/missing.jpg"));
        assert!(store.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("folder.jpg");
        fs::create_dir(&sub).unwrap();

        let store = Arc::new(RecordingStore::default());
        let uploader = Uploader::new(store.clone(), false);
        let outcome = uploader.upload(&sub).await;

        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("Not a file"));
        assert!(store.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_error_captured() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("clip.avi");
        fs::write(&source, b"avi").unwrap();

        let store = Arc::new(RecordingStore {
            fail_with: Some("503 Service Unavailable".to_string()),
            ..RecordingStore::default()
        });
        let uploader = Uploader::new(store.clone(), true);
        let outcome = uploader.upload(&source).await;

        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("503"));
        // Exactly one attempt, no retry
        assert_eq!(store.puts.lock().unwrap().len(), 1);
        assert_eq!(store.puts.lock().unwrap()[0].content_type, "video/x-msvideo");
        // Never deleted when the upload failed
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_delete_after_upload() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("snap.png");
        fs::write(&source, b"png").unwrap();

        let uploader = Uploader::new(Arc::new(RecordingStore::default()), true);
        let outcome = uploader.upload(&source).await;

        assert!(outcome.success);
        assert!(!source.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_failure_keeps_success() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        let source = locked.join("snap.png");
        fs::write(&source, b"png").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let uploader = Uploader::new(Arc::new(RecordingStore::default()), true);
        let outcome = uploader.upload(&source).await;

        let removed = !source.exists();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(outcome.success);
        // Root ignores directory permissions; only check when the delete really failed
        if !removed {
            assert!(outcome.error.is_none());
        }
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(Path::new("/watch/a.jpg")), "a.jpg");
        assert_eq!(base_name(Path::new("b.png")), "b.png");
    }
}
