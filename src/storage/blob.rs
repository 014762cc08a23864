//! Generic blob storage provider
//!
//! Backends are picked from the bucket URL scheme:
//!
//! | scheme          | backend                                   |
//! |-----------------|-------------------------------------------|
//! | `s3`, `s3a`     | Amazon S3                                 |
//! | `gs`            | Google Cloud Storage                      |
//! | `az`, `azblob`  | Azure Blob Storage                        |
//! | `file`          | directory `<local_root>/<container>`      |
//! | `mem`           | in-process memory                         |
//!
//! Cloud credentials come from the usual `AWS_*`, `GOOGLE_*` and `AZURE_*`
//! environment variables.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};

use crate::{Error, Result};

use super::{
    create_bucket_at, new_bucket_name, with_timeout, BucketLocator, ObjectLines,
    StorageProvider, StorageSettings, UploadArtifact, CLASSIFICATION_METADATA_KEY,
};

struct BoundStore {
    locator: BucketLocator,
    store: Arc<dyn ObjectStore>,
}

struct BlobState {
    classifier: String,
    /// Store opened by `initialize`, reused for every call on that bucket
    bound: Option<BoundStore>,
}

/// Bucket provider backed by `object_store`, selected by URL scheme
pub struct GenericBlobProvider {
    state: OnceLock<BlobState>,
    /// Stores for buckets other than the bound one, opened on first use
    stores: DashMap<BucketLocator, Arc<dyn ObjectStore>>,
    timeout: Duration,
    local_root: PathBuf,
}

impl GenericBlobProvider {
    /// Ready-to-use provider stamping uploads with `classifier`
    pub fn new(classifier: impl Into<String>, settings: &StorageSettings) -> Self {
        Self {
            state: OnceLock::from(BlobState {
                classifier: classifier.into(),
                bound: None,
            }),
            ..Self::uninitialized(settings)
        }
    }

    /// Provider that must be bound with [`Self::initialize`] before use
    pub fn uninitialized(settings: &StorageSettings) -> Self {
        Self {
            state: OnceLock::new(),
            stores: DashMap::new(),
            timeout: settings.timeout,
            local_root: settings.local_root.clone(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }

    /// Bind the provider to a bucket and classifier.
    ///
    /// Repeating the call with the same bucket is a no-op; any other bucket
    /// is rejected once the provider is initialized.
    pub fn initialize(&self, bucket_url: &str, classifier: &str) -> Result<()> {
        if bucket_url.trim().is_empty() {
            return Err(Error::configuration(
                "no bucket URL is configured for the storage location",
            ));
        }

        let locator = BucketLocator::parse(bucket_url.trim())?.bucket();

        if let Some(state) = self.state.get() {
            return match &state.bound {
                Some(bound) if bound.locator == locator => Ok(()),
                _ => Err(Error::configuration(format!(
                    "generic provider is already initialized, cannot bind it to {}",
                    bucket_url
                ))),
            };
        }

        let store = self.open_store(&locator)?;

        self.state
            .set(BlobState {
                classifier: classifier.to_string(),
                bound: Some(BoundStore { locator, store }),
            })
            .map_err(|_| Error::configuration("generic provider was initialized concurrently"))
    }

    fn state(&self) -> Result<&BlobState> {
        self.state.get().ok_or_else(|| {
            Error::not_initialized("generic provider requires a bucket URL; call initialize first")
        })
    }

    fn store_for(&self, locator: &BucketLocator) -> Result<Arc<dyn ObjectStore>> {
        if let Some(bound) = &self.state()?.bound {
            if bound.locator.same_bucket(locator) {
                return Ok(bound.store.clone());
            }
        }

        let bucket = locator.bucket();
        if let Some(store) = self.stores.get(&bucket) {
            return Ok(store.value().clone());
        }

        // `mem` buckets only live as long as their store, so every bucket
        // keeps the first store opened for it
        let store = self.open_store(&bucket)?;
        Ok(self.stores.entry(bucket).or_insert(store).value().clone())
    }

    fn local_dir(&self, locator: &BucketLocator) -> PathBuf {
        self.local_root.join(locator.container())
    }

    fn open_store(&self, locator: &BucketLocator) -> Result<Arc<dyn ObjectStore>> {
        let container = locator.container();
        let open_failed = |e: object_store::Error| {
            Error::transport("open bucket", locator.to_string(), None, e.to_string())
        };

        let store: Arc<dyn ObjectStore> = match locator.scheme() {
            "s3" | "s3a" => Arc::new(
                AmazonS3Builder::from_env()
                    .with_bucket_name(container)
                    .build()
                    .map_err(open_failed)?,
            ),
            "gs" => Arc::new(
                GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(container)
                    .build()
                    .map_err(open_failed)?,
            ),
            "az" | "azblob" => Arc::new(
                MicrosoftAzureBuilder::from_env()
                    .with_container_name(container)
                    .build()
                    .map_err(open_failed)?,
            ),
            "file" => {
                let dir = self.local_dir(locator);
                if !dir.is_dir() {
                    return Err(Error::not_found(format!(
                        "bucket directory {}",
                        dir.display()
                    )));
                }
                Arc::new(LocalFileSystem::new_with_prefix(&dir).map_err(open_failed)?)
            }
            "mem" => Arc::new(InMemory::new()),
            other => {
                return Err(Error::configuration(format!(
                    "unsupported bucket URL scheme '{}' in {}",
                    other, locator
                )))
            }
        };

        Ok(store)
    }

    fn put_options(scheme: &str, artifact: &UploadArtifact) -> PutOptions {
        // Plain directories cannot carry object attributes
        if scheme == "file" {
            return PutOptions::default();
        }

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, artifact.content_type.clone().into());
        attributes.insert(
            Attribute::Metadata(CLASSIFICATION_METADATA_KEY.into()),
            artifact.classification.clone().into(),
        );

        PutOptions {
            attributes,
            ..Default::default()
        }
    }
}

fn store_error(operation: &str, resource: &BucketLocator, err: object_store::Error) -> Error {
    match err {
        object_store::Error::NotFound { .. } => Error::not_found(resource.to_string()),
        other => Error::transport(operation, resource.to_string(), None, other.to_string()),
    }
}

#[async_trait]
impl StorageProvider for GenericBlobProvider {
    async fn create_new_bucket_for_cluster(
        &self,
        cluster_name: &str,
        bucket_kind: &str,
    ) -> Result<String> {
        let scheme = match &self.state()?.bound {
            Some(bound) => bound.locator.scheme().to_string(),
            None => {
                return Err(Error::configuration(
                    "generic provider has no bound bucket to take the backend scheme from",
                ))
            }
        };

        let bucket_url = format!("{}://{}", scheme, new_bucket_name(cluster_name, bucket_kind));
        create_bucket_at(self, bucket_url).await
    }

    async fn ensure_bucket_is_created(&self, bucket_url: &str) -> Result<()> {
        self.state()?;
        let locator = BucketLocator::parse(bucket_url)?.bucket();

        match locator.scheme() {
            "mem" => Ok(()),
            "file" => {
                let dir = self.local_dir(&locator);
                if dir.is_dir() {
                    return Ok(());
                }
                tracing::info!("The bucket {} does not exist so creating it", bucket_url);
                tokio::fs::create_dir_all(&dir).await?;
                Ok(())
            }
            _ => {
                let store = self.store_for(&locator)?;
                let probe = with_timeout(self.timeout, "list bucket", async {
                    store
                        .list_with_delimiter(None)
                        .await
                        .map_err(|e| store_error("list bucket", &locator, e))
                })
                .await;

                match probe {
                    Ok(_) => Ok(()),
                    Err(e) if e.is_not_found() => Err(Error::configuration(format!(
                        "bucket {} does not exist and the generic provider cannot create {} buckets",
                        bucket_url,
                        locator.scheme()
                    ))),
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn upload_file_to_bucket(
        &self,
        content: Bytes,
        object_name: &str,
        bucket_url: &str,
    ) -> Result<String> {
        let classifier = self.state()?.classifier.clone();
        let target = BucketLocator::parse(bucket_url)?.join(object_name);
        let store = self.store_for(&target)?;
        let artifact = UploadArtifact::new(target.object_path(), content, classifier);
        let options = Self::put_options(target.scheme(), &artifact);
        let payload = PutPayload::from(artifact.content.clone());
        let path = Path::from(target.object_path());

        tracing::debug!(
            "Uploading {} ({} bytes, {})",
            target,
            artifact.content.len(),
            artifact.content_type
        );

        with_timeout(self.timeout, "put object", async {
            store
                .put_opts(&path, payload, options)
                .await
                .map_err(|e| store_error("put object", &target, e))
        })
        .await?;

        Ok(target.to_string())
    }

    async fn download_file_from_bucket(&self, object_url: &str) -> Result<ObjectLines> {
        let locator = BucketLocator::parse(object_url)?;
        let store = self.store_for(&locator)?;
        let path = Path::from(locator.object_path());

        let data = with_timeout(self.timeout, "get object", async {
            let result = store
                .get(&path)
                .await
                .map_err(|e| store_error("get object", &locator, e))?;
            result
                .bytes()
                .await
                .map_err(|e| store_error("get object", &locator, e))
        })
        .await?;

        Ok(ObjectLines::new(data))
    }
}
