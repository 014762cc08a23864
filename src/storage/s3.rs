//! S3 storage provider

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio::sync::OnceCell;

use crate::config::ClusterStorageConfig;
use crate::{Error, Result};

use super::{
    create_bucket_at, new_bucket_name, with_timeout, BucketLocator, ObjectLines,
    StorageProvider, StorageSettings, UploadArtifact,
};

pub const S3_SCHEME: &str = "s3";

/// Region in which buckets are created without a location constraint
pub const DEFAULT_REGION: &str = "us-east-1";

/// Location constraint for a create-bucket request in `region`.
///
/// S3 rejects an explicit constraint naming the default region, while any
/// other region has to be named or the bucket lands in the default one.
pub fn location_constraint(region: &str) -> Option<&str> {
    if region == DEFAULT_REGION {
        None
    } else {
        Some(region)
    }
}

/// The subset of the S3 API used by [`CloudNativeProvider`]
#[async_trait]
pub trait S3Api: Send + Sync {
    /// Succeeds if the bucket exists, `Error::NotFound` if it does not
    async fn head_bucket(&self, bucket: &str) -> Result<()>;

    async fn create_bucket(&self, bucket: &str, location: Option<&str>) -> Result<()>;

    async fn put_object(&self, bucket: &str, key: &str, artifact: UploadArtifact) -> Result<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes>;
}

/// [`S3Api`] backed by the AWS SDK
pub struct AwsS3Api {
    client: Client,
}

impl AwsS3Api {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the default credential chain for `region`
    pub async fn from_region(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self::new(Client::new(&config))
    }
}

fn sdk_error<E, R>(operation: &str, resource: &str, err: &SdkError<E, R>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err
        .as_service_error()
        .and_then(|e| e.code())
        .map(|c| c.to_string());
    Error::transport(
        operation,
        resource,
        code,
        format!("{}", DisplayErrorContext(err)),
    )
}

#[async_trait]
impl S3Api for AwsS3Api {
    async fn head_bucket(&self, bucket: &str) -> Result<()> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let missing = err.as_service_error().map(|e| e.is_not_found()).unwrap_or(false)
                    || err.raw_response().map(|r| r.status().as_u16()) == Some(404);
                if missing {
                    Err(Error::not_found(format!("bucket {}", bucket)))
                } else {
                    Err(sdk_error("HeadBucket", bucket, &err))
                }
            }
        }
    }

    async fn create_bucket(&self, bucket: &str, location: Option<&str>) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(bucket);

        if let Some(region) = location {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| sdk_error("CreateBucket", bucket, &e))?;

        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, artifact: UploadArtifact) -> Result<()> {
        let metadata = artifact.metadata();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(artifact.content_type)
            .set_metadata(Some(metadata))
            .body(ByteStream::from(artifact.content))
            .send()
            .await
            .map_err(|e| sdk_error("PutObject", &format!("{}/{}", bucket, key), &e))?;

        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let resource = format!("{}/{}", bucket, key);
        let response = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(err) => {
                let missing = err.as_service_error().map(|e| e.is_no_such_key()).unwrap_or(false)
                    || err.raw_response().map(|r| r.status().as_u16()) == Some(404);
                if missing {
                    return Err(Error::not_found(format!("object {}", resource)));
                }
                return Err(sdk_error("GetObject", &resource, &err));
            }
        };

        let data = response.body.collect().await.map_err(|e| {
            Error::transport("GetObject", &resource, None, format!("body read failed: {}", e))
        })?;

        Ok(data.into_bytes())
    }
}

/// Bucket provider talking to Amazon S3 directly
///
/// The S3 client is created on first use from the cluster region.
pub struct CloudNativeProvider {
    region: String,
    classifier: String,
    timeout: Duration,
    api: OnceCell<Arc<dyn S3Api>>,
}

impl CloudNativeProvider {
    pub fn new(config: &ClusterStorageConfig, settings: &StorageSettings) -> Self {
        Self {
            region: config.region.trim().to_string(),
            classifier: config.classifier_or_default().to_string(),
            timeout: settings.timeout,
            api: OnceCell::new(),
        }
    }

    /// Use an already constructed API handle instead of the AWS SDK
    pub fn with_api(
        config: &ClusterStorageConfig,
        settings: &StorageSettings,
        api: Arc<dyn S3Api>,
    ) -> Self {
        Self {
            api: OnceCell::new_with(Some(api)),
            ..Self::new(config, settings)
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Classifier stamped on every upload
    pub fn classifier(&self) -> &str {
        &self.classifier
    }

    fn require_region(&self) -> Result<&str> {
        if self.region.is_empty() {
            return Err(Error::configuration(
                "cluster configuration does not specify a region",
            ));
        }
        Ok(&self.region)
    }

    async fn api(&self) -> Result<&Arc<dyn S3Api>> {
        let region = self.require_region()?;
        self.api
            .get_or_try_init(|| async {
                tracing::debug!("Creating S3 client for region {}", region);
                let api: Arc<dyn S3Api> = Arc::new(AwsS3Api::from_region(region).await);
                Ok::<_, Error>(api)
            })
            .await
    }

    fn locate(&self, url: &str) -> Result<BucketLocator> {
        let locator = BucketLocator::parse(url)?;
        if locator.scheme() != S3_SCHEME {
            return Err(Error::configuration(format!(
                "S3 provider cannot handle '{}' URLs ({})",
                locator.scheme(),
                url
            )));
        }
        Ok(locator)
    }
}

#[async_trait]
impl StorageProvider for CloudNativeProvider {
    async fn create_new_bucket_for_cluster(
        &self,
        cluster_name: &str,
        bucket_kind: &str,
    ) -> Result<String> {
        self.require_region()?;

        let bucket_name = new_bucket_name(cluster_name, bucket_kind);
        let bucket_url = format!("{}://{}", S3_SCHEME, bucket_name);

        create_bucket_at(self, bucket_url).await
    }

    async fn ensure_bucket_is_created(&self, bucket_url: &str) -> Result<()> {
        let api = self.api().await?;
        let locator = self.locate(bucket_url)?;
        let bucket = locator.container();

        match with_timeout(self.timeout, "HeadBucket", api.head_bucket(bucket)).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        tracing::info!("The bucket {} does not exist so creating it", bucket_url);

        let location = location_constraint(&self.region);
        with_timeout(
            self.timeout,
            "CreateBucket",
            api.create_bucket(bucket, location),
        )
        .await
    }

    async fn upload_file_to_bucket(
        &self,
        content: Bytes,
        object_name: &str,
        bucket_url: &str,
    ) -> Result<String> {
        let api = self.api().await?;
        let target = self.locate(bucket_url)?.join(object_name);
        let artifact = UploadArtifact::new(target.object_path(), content, self.classifier.clone());

        tracing::debug!(
            "Uploading {} ({} bytes, {})",
            target,
            artifact.content.len(),
            artifact.content_type
        );

        with_timeout(
            self.timeout,
            "PutObject",
            api.put_object(target.container(), target.object_path(), artifact),
        )
        .await?;

        Ok(target.to_string())
    }

    async fn download_file_from_bucket(&self, object_url: &str) -> Result<ObjectLines> {
        let api = self.api().await?;
        let locator = self.locate(object_url)?;

        let data = with_timeout(
            self.timeout,
            "GetObject",
            api.get_object(locator.container(), locator.object_path()),
        )
        .await?;

        Ok(ObjectLines::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use crate::config::ProviderKind;

    #[derive(Default)]
    struct FakeS3 {
        buckets: Mutex<HashSet<String>>,
        creates: Mutex<Vec<(String, Option<String>)>>,
        objects: Mutex<HashMap<(String, String), UploadArtifact>>,
        head_error: Mutex<Option<Error>>,
        create_error: Mutex<Option<Error>>,
    }

    #[async_trait]
    impl S3Api for FakeS3 {
        async fn head_bucket(&self, bucket: &str) -> Result<()> {
            if let Some(err) = self.head_error.lock().unwrap().take() {
                return Err(err);
            }
            if self.buckets.lock().unwrap().contains(bucket) {
                Ok(())
            } else {
                Err(Error::not_found(bucket))
            }
        }

        async fn create_bucket(&self, bucket: &str, location: Option<&str>) -> Result<()> {
            if let Some(err) = self.create_error.lock().unwrap().take() {
                return Err(err);
            }
            self.creates
                .lock()
                .unwrap()
                .push((bucket.to_string(), location.map(str::to_string)));
            self.buckets.lock().unwrap().insert(bucket.to_string());
            Ok(())
        }

        async fn put_object(&self, bucket: &str, key: &str, artifact: UploadArtifact) -> Result<()> {
            self.objects
                .lock()
                .unwrap()
                .insert((bucket.to_string(), key.to_string()), artifact);
            Ok(())
        }

        async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
            self.objects
                .lock()
                .unwrap()
                .get(&(bucket.to_string(), key.to_string()))
                .map(|a| a.content.clone())
                .ok_or_else(|| Error::not_found(key))
        }
    }

    fn provider(region: &str, fake: Arc<FakeS3>) -> CloudNativeProvider {
        let config = ClusterStorageConfig {
            provider_kind: ProviderKind::Aws,
            region: region.to_string(),
            classifier: "logs".to_string(),
        };
        CloudNativeProvider::with_api(&config, &StorageSettings::default(), fake)
    }

    #[test]
    fn test_location_constraint() {
        assert_eq!(location_constraint("us-east-1"), None);
        assert_eq!(location_constraint("eu-west-1"), Some("eu-west-1"));
        assert_eq!(location_constraint("us-east-2"), Some("us-east-2"));
    }

    #[tokio::test]
    async fn test_ensure_bucket_creates_once() {
        let fake = Arc::new(FakeS3::default());
        let provider = provider("eu-west-1", fake.clone());

        provider.ensure_bucket_is_created("s3://artifacts").await.unwrap();
        provider.ensure_bucket_is_created("s3://artifacts").await.unwrap();

        let creates = fake.creates.lock().unwrap();
        assert_eq!(creates.len(), 1);
        assert_eq!(
            creates[0],
            ("artifacts".to_string(), Some("eu-west-1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_default_region_omits_location() {
        let fake = Arc::new(FakeS3::default());
        let provider = provider("us-east-1", fake.clone());

        provider.ensure_bucket_is_created("s3://artifacts").await.unwrap();

        assert_eq!(fake.creates.lock().unwrap()[0].1, None);
    }

    #[tokio::test]
    async fn test_missing_region_fails_fast() {
        let fake = Arc::new(FakeS3::default());
        let provider = provider("", fake.clone());

        let err = provider
            .create_new_bucket_for_cluster("dev", "logs")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(fake.creates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_new_bucket_for_cluster() {
        let fake = Arc::new(FakeS3::default());
        let provider = provider("eu-west-1", fake.clone());

        let url = provider
            .create_new_bucket_for_cluster(&"very-long-cluster-name".repeat(4), "logs")
            .await
            .unwrap();

        let name = url.strip_prefix("s3://").unwrap();
        assert!(name.len() <= 63);
        assert!(!name.ends_with('-'));
        assert!(fake.buckets.lock().unwrap().contains(name));
    }

    #[tokio::test]
    async fn test_failed_head_bucket_does_not_create() {
        let fake = Arc::new(FakeS3::default());
        *fake.head_error.lock().unwrap() = Some(Error::transport(
            "HeadBucket",
            "artifacts",
            Some("403".to_string()),
            "access denied",
        ));
        let provider = provider("eu-west-1", fake.clone());

        let err = provider
            .ensure_bucket_is_created("s3://artifacts")
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some("403"));
        assert!(fake.creates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_create_keeps_bucket_url() {
        let fake = Arc::new(FakeS3::default());
        *fake.create_error.lock().unwrap() = Some(Error::transport(
            "CreateBucket",
            "bucket",
            Some("BucketAlreadyExists".to_string()),
            "name taken",
        ));
        let provider = provider("eu-west-1", fake.clone());

        let err = provider
            .create_new_bucket_for_cluster(&"very-long-cluster-name".repeat(4), "logs")
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some("BucketAlreadyExists"));
        match err {
            Error::BucketCreation { bucket_url, .. } => {
                let name = bucket_url.strip_prefix("s3://").unwrap();
                assert!(name.starts_with("very-long-cluster-name"));
                assert!(name.len() <= 63);
                assert!(!name.ends_with('-'));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let fake = Arc::new(FakeS3::default());
        let provider = provider("eu-west-1", fake.clone());

        let url = provider
            .upload_file_to_bucket(Bytes::from("a\nb\n"), "jobs/1/build.log", "s3://artifacts")
            .await
            .unwrap();
        assert_eq!(url, "s3://artifacts/jobs/1/build.log");

        {
            let objects = fake.objects.lock().unwrap();
            let stored = &objects[&("artifacts".to_string(), "jobs/1/build.log".to_string())];
            assert_eq!(stored.content_type, "text/plain; charset=utf-8");
            assert_eq!(stored.classification, "logs");
        }

        let lines: Vec<String> = provider
            .download_file_from_bucket(&url)
            .await
            .unwrap()
            .lines()
            .collect::<std::io::Result<_>>()
            .unwrap();
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_download_missing_object() {
        let fake = Arc::new(FakeS3::default());
        let provider = provider("eu-west-1", fake);

        let err = provider
            .download_file_from_bucket("s3://artifacts/missing.txt")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_foreign_scheme() {
        let fake = Arc::new(FakeS3::default());
        let provider = provider("eu-west-1", fake);

        let err = provider
            .upload_file_to_bucket(Bytes::from("x"), "a.txt", "gs://bucket")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
