//! Artifact collection
//!
//! Turns glob patterns or in-memory payloads into stored objects and
//! returns the locator URL of each one.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::config::{ClusterStorageConfig, StorageLocation, DEFAULT_CLASSIFIER};
use crate::factory;
use crate::storage::{StorageProvider, StorageSettings};
use crate::{Error, Result};

/// A file collection that stopped part way
///
/// `uploaded` holds the locators stored before the failure.
#[derive(Error, Debug)]
#[error("failed to collect {file}: {source}")]
pub struct CollectError {
    pub file: String,
    pub uploaded: Vec<String>,
    #[source]
    pub source: Error,
}

/// Collector writing artifacts into a single bucket
pub struct BucketCollector {
    bucket_url: String,
    provider: Arc<dyn StorageProvider>,
}

impl BucketCollector {
    pub fn new(bucket_url: impl Into<String>, provider: Arc<dyn StorageProvider>) -> Self {
        Self {
            bucket_url: bucket_url.into(),
            provider,
        }
    }

    pub fn bucket_url(&self) -> &str {
        &self.bucket_url
    }

    /// Upload every file matching `patterns`.
    ///
    /// Files are uploaded one at a time, pattern by pattern, in the order the
    /// filesystem walk yields them, so the returned locators follow that
    /// order. Each object is named after the file's path relative to
    /// `base_dir`, prefixed with `output_path`; empty strings skip either
    /// step.
    pub async fn collect_files<S: AsRef<str>>(
        &self,
        patterns: &[S],
        output_path: &str,
        base_dir: &str,
    ) -> std::result::Result<Vec<String>, CollectError> {
        let mut urls = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            let entries = match glob::glob(pattern) {
                Ok(entries) => entries,
                Err(e) => {
                    return Err(CollectError {
                        file: pattern.to_string(),
                        uploaded: urls,
                        source: Error::configuration(format!(
                            "invalid glob pattern {}: {}",
                            pattern, e
                        )),
                    })
                }
            };

            for entry in entries {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        return Err(CollectError {
                            file: e.path().display().to_string(),
                            uploaded: urls,
                            source: Error::Io(e.into_error()),
                        })
                    }
                };

                if !path.is_file() {
                    continue;
                }

                match self.collect_file(&path, output_path, base_dir).await {
                    Ok(url) => urls.push(url),
                    Err(source) => {
                        return Err(CollectError {
                            file: path.display().to_string(),
                            uploaded: urls,
                            source,
                        })
                    }
                }
            }
        }

        Ok(urls)
    }

    async fn collect_file(&self, path: &Path, output_path: &str, base_dir: &str) -> Result<String> {
        let name = object_name(path, output_path, base_dir)?;
        let data = tokio::fs::read(path).await?;

        tracing::debug!("Collecting {} as {}", path.display(), name);

        self.provider
            .upload_file_to_bucket(Bytes::from(data), &name, &self.bucket_url)
            .await
    }

    /// Store `content` as `output_name` and return its locator
    pub async fn collect_data(&self, content: Bytes, output_name: &str) -> Result<String> {
        tracing::debug!("Collecting {} bytes as {}", content.len(), output_name);

        self.provider
            .upload_file_to_bucket(content, output_name, &self.bucket_url)
            .await
    }
}

/// Build a collector for `location`, picking the provider from cluster
/// configuration.
pub fn new_collector(
    location: &StorageLocation,
    cluster: Option<&ClusterStorageConfig>,
    settings: &StorageSettings,
) -> Result<BucketCollector> {
    let classifier = match location.classifier.trim() {
        "" => DEFAULT_CLASSIFIER,
        c => c,
    };

    let provider = factory::select(cluster, settings).ok_or_else(|| {
        Error::configuration("no bucket provider is available for the configured cluster provider")
    })?;
    provider.prepare(&location.bucket_url, classifier)?;

    Ok(BucketCollector::new(
        location.bucket_url.clone(),
        Arc::new(provider),
    ))
}

/// Object name for a collected file: `output_path/<path relative to base_dir>`,
/// always slash separated.
pub fn object_name(path: &Path, output_path: &str, base_dir: &str) -> Result<String> {
    let relative = if base_dir.is_empty() {
        path.to_path_buf()
    } else {
        relative_to(path, Path::new(base_dir)).ok_or_else(|| {
            Error::configuration(format!(
                "failed to remove base dir {} from {}",
                base_dir,
                path.display()
            ))
        })?
    };

    let mut segments: Vec<String> = output_path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    for component in relative.components() {
        match component {
            Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => segments.push("..".to_string()),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    Ok(segments.join("/"))
}

fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    let mut path_parts = path.components().filter(|c| *c != Component::CurDir);
    for base_part in base.components().filter(|c| *c != Component::CurDir) {
        if path_parts.next() != Some(base_part) {
            return None;
        }
    }
    Some(path_parts.collect())
}
