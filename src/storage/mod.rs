//! Storage abstraction layer
//!
//! Provides a unified bucket provider interface over a native Amazon S3
//! client and a generic, URL-scheme selected blob store.

use std::collections::HashMap;
use std::future::Future;
use std::io::{BufRead, Cursor, Lines};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::{Error, Result};

pub mod blob;
pub mod locator;
pub mod s3;

pub use blob::GenericBlobProvider;
pub use locator::BucketLocator;
pub use s3::CloudNativeProvider;

/// Deadline applied to every backend call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Longest bucket name accepted by S3, GCS and Azure
pub const MAX_BUCKET_NAME_LEN: usize = 63;

/// Metadata key carrying the artifact classifier
pub const CLASSIFICATION_METADATA_KEY: &str = "classification";

/// Bucket provider trait
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Create a dynamically named bucket for a cluster and return its URL
    async fn create_new_bucket_for_cluster(
        &self,
        cluster_name: &str,
        bucket_kind: &str,
    ) -> Result<String>;

    /// Create the bucket unless it already exists
    async fn ensure_bucket_is_created(&self, bucket_url: &str) -> Result<()>;

    /// Upload `content` as `object_name` and return the object locator
    async fn upload_file_to_bucket(
        &self,
        content: Bytes,
        object_name: &str,
        bucket_url: &str,
    ) -> Result<String>;

    /// Download the object addressed by `object_url`
    async fn download_file_from_bucket(&self, object_url: &str) -> Result<ObjectLines>;
}

/// Backend-independent settings shared by all providers
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub timeout: Duration,
    /// Root directory for `file://` buckets
    pub local_root: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            local_root: PathBuf::from("./buckets"),
        }
    }
}

/// The provider chosen for a cluster
///
/// Selected once by [`crate::factory::select`]; callers only use the
/// [`StorageProvider`] surface afterwards.
pub enum Provider {
    Native(CloudNativeProvider),
    Generic(GenericBlobProvider),
}

impl Provider {
    /// Finish setting up a provider selected without cluster configuration.
    ///
    /// Legacy deployments carry their bucket URL and classifier in the
    /// storage location rather than in cluster configuration, so the generic
    /// provider is bound to them here. Every other provider is left untouched.
    pub fn prepare(&self, bucket_url: &str, classifier: &str) -> Result<()> {
        match self {
            Provider::Generic(provider) if !provider.is_initialized() => {
                tracing::warn!(
                    "Initializing legacy bucket provider with bucket URL {}, classifier {}",
                    bucket_url,
                    classifier
                );
                provider.initialize(bucket_url, classifier)
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl StorageProvider for Provider {
    async fn create_new_bucket_for_cluster(
        &self,
        cluster_name: &str,
        bucket_kind: &str,
    ) -> Result<String> {
        match self {
            Provider::Native(p) => p.create_new_bucket_for_cluster(cluster_name, bucket_kind).await,
            Provider::Generic(p) => p.create_new_bucket_for_cluster(cluster_name, bucket_kind).await,
        }
    }

    async fn ensure_bucket_is_created(&self, bucket_url: &str) -> Result<()> {
        match self {
            Provider::Native(p) => p.ensure_bucket_is_created(bucket_url).await,
            Provider::Generic(p) => p.ensure_bucket_is_created(bucket_url).await,
        }
    }

    async fn upload_file_to_bucket(
        &self,
        content: Bytes,
        object_name: &str,
        bucket_url: &str,
    ) -> Result<String> {
        match self {
            Provider::Native(p) => p.upload_file_to_bucket(content, object_name, bucket_url).await,
            Provider::Generic(p) => p.upload_file_to_bucket(content, object_name, bucket_url).await,
        }
    }

    async fn download_file_from_bucket(&self, object_url: &str) -> Result<ObjectLines> {
        match self {
            Provider::Native(p) => p.download_file_from_bucket(object_url).await,
            Provider::Generic(p) => p.download_file_from_bucket(object_url).await,
        }
    }
}

/// One object to be written, built at collection time
#[derive(Debug, Clone)]
pub struct UploadArtifact {
    pub name: String,
    pub content: Bytes,
    pub content_type: String,
    pub classification: String,
}

impl UploadArtifact {
    pub fn new(name: impl Into<String>, content: Bytes, classification: impl Into<String>) -> Self {
        let name = name.into();
        let content_type = content_type_for_name(&name).to_string();
        Self {
            name,
            content,
            content_type,
            classification: classification.into(),
        }
    }

    /// User metadata attached to the stored object
    pub fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([(
            CLASSIFICATION_METADATA_KEY.to_string(),
            self.classification.clone(),
        )])
    }
}

/// Downloaded object contents, read line by line
#[derive(Debug, Clone)]
pub struct ObjectLines {
    data: Bytes,
}

impl ObjectLines {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// Iterate over the object's lines, without line terminators
    pub fn lines(self) -> Lines<Cursor<Bytes>> {
        Cursor::new(self.data).lines()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

/// Content type for an object, derived from its extension
pub fn content_type_for_name(name: &str) -> &'static str {
    let extension = name
        .rsplit('/')
        .next()
        .and_then(|file| file.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("log") | Some("txt") => "text/plain; charset=utf-8",
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("csv") => "text/csv; charset=utf-8",
        Some("md") => "text/markdown; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("yaml") | Some("yml") => "application/yaml",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some("gz") | Some("tgz") => "application/gzip",
        Some("zip") => "application/zip",
        Some("tar") => "application/x-tar",
        _ => "application/octet-stream",
    }
}

/// Build a bucket name from cluster, kind and a unique suffix.
///
/// The joined name is cut from the right to `max_len` bytes and any
/// separator left dangling by the cut is removed.
pub fn bucket_name_for_cluster(
    cluster_name: &str,
    bucket_kind: &str,
    suffix: &str,
    max_len: usize,
) -> String {
    let mut name = format!("{}-{}-{}", cluster_name, bucket_kind, suffix);

    if name.len() > max_len {
        let mut cut = max_len;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }

    name.trim_end_matches('-').to_string()
}

/// Fresh globally unique bucket name for a cluster
pub fn new_bucket_name(cluster_name: &str, bucket_kind: &str) -> String {
    bucket_name_for_cluster(
        cluster_name,
        bucket_kind,
        &Uuid::new_v4().to_string(),
        MAX_BUCKET_NAME_LEN,
    )
}

/// Ensure `bucket_url` exists, keeping the URL in the error on failure
pub(crate) async fn create_bucket_at<P>(provider: &P, bucket_url: String) -> Result<String>
where
    P: StorageProvider + ?Sized,
{
    match provider.ensure_bucket_is_created(&bucket_url).await {
        Ok(()) => Ok(bucket_url),
        Err(source) => Err(Error::BucketCreation {
            bucket_url,
            source: Box::new(source),
        }),
    }
}

/// Run a backend call under a deadline
pub(crate) async fn with_timeout<T, F>(after: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}
