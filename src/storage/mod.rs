//! Object storage capability.
//!
//! The uploader only talks to [`ObjectStore`]; `gcs` sends objects to Google
//! Cloud Storage and `local` mirrors a bucket on the local filesystem.

mod gcs;
mod local;

pub use gcs::{GcsCredentials, GcsStore};
pub use local::LocalStore;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::Result;

/// Custom metadata attached to every uploaded object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    /// ISO-8601 upload timestamp
    pub uploaded_at: String,
    pub original_path: String,
}

/// A single object write
#[derive(Debug, Clone, Copy)]
pub struct PutObject<'a> {
    pub key: &'a str,
    pub source: &'a Path,
    pub content_type: &'a str,
    pub metadata: &'a ObjectMetadata,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket every object is written to
    fn bucket(&self) -> &str;

    /// URI under which `key` is addressed once uploaded
    fn object_uri(&self, key: &str) -> String {
        format!("gs://{}/{}", self.bucket(), key)
    }

    /// Upload the file at `object.source` under `object.key`.
    /// No retries happen here.
    async fn put(&self, object: PutObject<'_>) -> Result<()>;
}

/// Build the configured storage backend
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend {
        StorageBackend::Gcs => {
            let credentials = gcs_credentials(config, |key| std::env::var(key).ok());
            let store = GcsStore::new(
                config.bucket.clone(),
                config.project_id.clone(),
                credentials,
                &config.endpoint,
            )?;
            Ok(Arc::new(store))
        }
        StorageBackend::Local => {
            let root = config.local_root.clone().ok_or_else(|| {
                crate::error::CamwatchError::Config(
                    "storage.local_root is required for the local backend".to_string(),
                )
            })?;
            Ok(Arc::new(LocalStore::new(root, config.bucket.clone())))
        }
    }
}

/// A token in the env var named by `access_token_env` overrides Application
/// Default Credentials
fn gcs_credentials<F>(config: &StorageConfig, lookup: F) -> GcsCredentials
where
    F: Fn(&str) -> Option<String>,
{
    if config.anonymous {
        log::warn!("Uploads to gs://{} are sent without credentials", config.bucket);
        return GcsCredentials::Anonymous;
    }
    match lookup(&config.access_token_env).filter(|t| !t.trim().is_empty()) {
        Some(token) => {
            log::warn!(
                "Using the fixed token from {}; it will not be refreshed when it expires",
                config.access_token_env
            );
            GcsCredentials::Static(token.trim().to_string())
        }
        None => GcsCredentials::Adc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_serializes_camel_case() {
        let metadata = ObjectMetadata {
            uploaded_at: "2024-03-15T10:30:00.000Z".to_string(),
            original_path: "/watch/a.jpg".to_string(),
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["uploadedAt"], "2024-03-15T10:30:00.000Z");
        assert_eq!(json["originalPath"], "/watch/a.jpg");
    }

    #[test]
    fn test_from_config_local_requires_root() {
        let config = StorageConfig {
            backend: StorageBackend::Local,
            bucket: "b".to_string(),
            ..StorageConfig::default()
        };
        assert!(from_config(&config).is_err());
    }

    #[test]
    fn test_from_config_builds_gcs() {
        let config = StorageConfig {
            bucket: "camera-bucket".to_string(),
            ..StorageConfig::default()
        };
        let store = from_config(&config).unwrap();
        assert_eq!(store.bucket(), "camera-bucket");
        assert_eq!(store.object_uri("2024/03/15/a.jpg"), "gs://camera-bucket/2024/03/15/a.jpg");
    }

    #[test]
    fn test_gcs_credentials_selection() {
        let config = StorageConfig {
            bucket: "b".to_string(),
            ..StorageConfig::default()
        };
        let none = |_: &str| None;
        assert!(matches!(gcs_credentials(&config, none), GcsCredentials::Adc));

        let token = |key: &str| (key == "GCS_ACCESS_TOKEN").then(|| "ya29.abc\n".to_string());
        match gcs_credentials(&config, token) {
            GcsCredentials::Static(t) => assert_eq!(t, "ya29.abc"),
            other => panic!("expected static token, got {:?}", other),
        }

        let blank = |_: &str| Some("  ".to_string());
        assert!(matches!(gcs_credentials(&config, blank), GcsCredentials::Adc));

        let emulator = StorageConfig {
            anonymous: true,
            ..config
        };
        assert!(matches!(gcs_credentials(&emulator, token), GcsCredentials::Anonymous));
    }
}
