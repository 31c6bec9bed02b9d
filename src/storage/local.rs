use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::{ObjectMetadata, ObjectStore, PutObject};
use crate::error::{CamwatchError, Result};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar<'a> {
    content_type: &'a str,
    metadata: &'a ObjectMetadata,
}

/// Bucket emulated as a directory tree: `<root>/<bucket>/<key>`
///
/// Each object gets a `<key>.metadata.json` sidecar with its content type and
/// custom metadata.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    bucket: String,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(root: P, bucket: String) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            bucket,
        }
    }

    /// Filesystem location of `key`
    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.root.join(&self.bucket);
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(CamwatchError::InvalidInput(format!("invalid object key: {}", key)));
            }
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_uri(&self, key: &str) -> String {
        format!("file://{}/{}/{}", self.root.display(), self.bucket, key)
    }

    async fn put(&self, object: PutObject<'_>) -> Result<()> {
        let target = self.object_path(object.key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(object.source, &target).await?;

        let sidecar = Sidecar {
            content_type: object.content_type,
            metadata: object.metadata,
        };
        let json = serde_json::to_vec_pretty(&sidecar)
            .map_err(|e| CamwatchError::Storage(format!("failed to encode metadata: {}", e)))?;
        let mut sidecar_path = target.into_os_string();
        sidecar_path.push(".metadata.json");
        tokio::fs::write(PathBuf::from(sidecar_path), json).await?;

        Ok(())
    }
}
