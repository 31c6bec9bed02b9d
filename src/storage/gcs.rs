use async_trait::async_trait;
use gcp_auth::TokenProvider;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};
use serde::Serialize;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use url::Url;

use super::{ObjectMetadata, ObjectStore, PutObject};
use crate::error::{CamwatchError, Result};

const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

/// How upload requests are authorized
pub enum GcsCredentials {
    /// Application Default Credentials. Tokens are cached by the provider and
    /// refreshed before they expire.
    Adc,
    /// Fixed bearer token
    Static(String),
    /// No Authorization header (storage emulators)
    Anonymous,
}

impl std::fmt::Debug for GcsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GcsCredentials::Adc => f.write_str("Adc"),
            GcsCredentials::Static(_) => f.write_str("Static(<redacted>)"),
            GcsCredentials::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// Object resource sent as the first part of a multipart upload
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource<'a> {
    name: &'a str,
    content_type: &'a str,
    metadata: &'a ObjectMetadata,
}

/// Google Cloud Storage client using the JSON API multipart upload
///
/// One request per object; the first part carries the object resource
/// (name, content type, custom metadata) and the second the file bytes,
/// streamed from disk.
pub struct GcsStore {
    client: Client,
    endpoint: Url,
    bucket: String,
    project_id: Option<String>,
    credentials: GcsCredentials,
    provider: OnceCell<Arc<dyn TokenProvider>>,
}

impl GcsStore {
    pub fn new(
        bucket: String,
        project_id: Option<String>,
        credentials: GcsCredentials,
        endpoint: &str,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| CamwatchError::Config(format!("invalid storage endpoint {}: {}", endpoint, e)))?;

        // Large videos go through the same request
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(3600))
            .build()
            .map_err(|e| CamwatchError::Config(format!("failed to build HTTP client: {}", e)))?;

        log::info!("GCS storage initialized for bucket: {} ({:?})", bucket, credentials);

        Ok(Self {
            client,
            endpoint,
            bucket,
            project_id,
            credentials,
            provider: OnceCell::new(),
        })
    }

    fn upload_url(&self) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| CamwatchError::Config(format!("storage endpoint cannot be a base: {}", self.endpoint)))?
            .pop_if_empty()
            .extend(["upload", "storage", "v1", "b", self.bucket.as_str(), "o"]);
        url.query_pairs_mut().append_pair("uploadType", "multipart");
        Ok(url)
    }

    /// Bearer token for the next request, if any
    async fn bearer(&self) -> Result<Option<String>> {
        match &self.credentials {
            GcsCredentials::Anonymous => Ok(None),
            GcsCredentials::Static(token) => Ok(Some(token.clone())),
            GcsCredentials::Adc => {
                // A failed lookup is retried on the next upload
                let provider = self
                    .provider
                    .get_or_try_init(gcp_auth::provider)
                    .await
                    .map_err(|e| CamwatchError::Storage(format!("Failed to load Google credentials: {}", e)))?;
                let token = provider
                    .token(&[STORAGE_SCOPE])
                    .await
                    .map_err(|e| CamwatchError::Storage(format!("Failed to obtain access token: {}", e)))?;
                Ok(Some(token.as_str().to_string()))
            }
        }
    }
}

/// Framing around the media bytes of a `multipart/related` body: the JSON
/// resource part plus the media part header, and the closing delimiter.
fn multipart_frame(boundary: &str, resource_json: &[u8], content_type: &str) -> (Vec<u8>, Vec<u8>) {
    let mut head = Vec::with_capacity(resource_json.len() + 128);
    head.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    head.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    head.extend_from_slice(resource_json);
    head.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    head.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());

    let tail = format!("\r\n--{}--\r\n", boundary).into_bytes();
    (head, tail)
}

/// The full multipart body as a reader over `source`, with its exact length
async fn multipart_reader(
    boundary: &str,
    resource_json: &[u8],
    content_type: &str,
    source: &Path,
) -> Result<(impl AsyncRead + Send + Unpin + 'static, u64)> {
    let file = tokio::fs::File::open(source).await?;
    let media_len = file.metadata().await?.len();
    let (head, tail) = multipart_frame(boundary, resource_json, content_type);
    let length = head.len() as u64 + media_len + tail.len() as u64;

    let reader = Cursor::new(head).chain(file).chain(Cursor::new(tail));
    Ok((reader, length))
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, object: PutObject<'_>) -> Result<()> {
        let resource = ObjectResource {
            name: object.key,
            content_type: object.content_type,
            metadata: object.metadata,
        };
        let resource_json = serde_json::to_vec(&resource)
            .map_err(|e| CamwatchError::Storage(format!("failed to encode object resource: {}", e)))?;

        let boundary = format!("camwatch-{}", uuid::Uuid::new_v4().simple());
        let (reader, length) =
            multipart_reader(&boundary, &resource_json, object.content_type, object.source).await?;

        let mut request = self
            .client
            .post(self.upload_url()?)
            .header(CONTENT_TYPE, format!("multipart/related; boundary={}", boundary))
            .header(CONTENT_LENGTH, length)
            .body(Body::wrap_stream(ReaderStream::new(reader)));
        if let Some(token) = self.bearer().await? {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(project) = &self.project_id {
            request = request.header("x-goog-user-project", project);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CamwatchError::Storage(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(CamwatchError::Storage(format!(
                "GCS upload of gs://{}/{} failed with {}: {}",
                self.bucket, object.key, status, body
            )));
        }

        Ok(())
    }
}
