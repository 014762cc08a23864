use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::storage::{StorageSettings, DEFAULT_TIMEOUT};

/// Classifier stamped on artifacts when none is configured
pub const DEFAULT_CLASSIFIER: &str = "default";
const DEFAULT_STACK_WAIT_SECS: u64 = 3600;

/// Top-level application configuration loaded from file + environment.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Cluster requirements; absent on legacy installations
    pub cluster: Option<ClusterStorageConfig>,
    pub storage: StorageSection,
    pub collect: CollectSection,
    pub stack: StackSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Load configuration from disk and environment.
    pub fn load() -> Result<Self> {
        let config_path =
            env::var("BUCKETEER_CONFIG").unwrap_or_else(|_| "bucketeer.toml".to_string());

        let mut builder = config::Config::builder();

        if Path::new(&config_path).exists() {
            builder = builder.add_source(config::File::from(PathBuf::from(&config_path)));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BUCKETEER")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("collect.patterns")
                .try_parsing(true),
        );

        let settings = builder.build()?;
        let mut config: Self = settings.try_deserialize()?;

        if config.logging.level.trim().is_empty() {
            config.logging.level = "info".to_string();
        }

        Ok(config)
    }

    /// Where artifacts go, validated.
    pub fn storage_location(&self) -> Result<StorageLocation> {
        let bucket_url = self.storage.bucket_url.trim();
        if bucket_url.is_empty() {
            bail!("storage.bucket_url must be specified");
        }

        let classifier = match self.storage.classifier.trim() {
            "" => DEFAULT_CLASSIFIER.to_string(),
            c => c.to_string(),
        };

        Ok(StorageLocation {
            bucket_url: bucket_url.to_string(),
            classifier,
        })
    }

    /// Settings shared by every storage provider.
    pub fn storage_settings(&self) -> StorageSettings {
        let timeout = match self.storage.timeout_secs {
            0 => DEFAULT_TIMEOUT,
            secs => Duration::from_secs(secs),
        };

        StorageSettings {
            timeout,
            local_root: PathBuf::from(&self.storage.local_root),
        }
    }
}

/// Cluster-level storage requirements
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ClusterStorageConfig {
    #[serde(rename = "provider")]
    pub provider_kind: ProviderKind,
    pub region: String,
    pub classifier: String,
}

impl ClusterStorageConfig {
    /// The configured classifier, or [`DEFAULT_CLASSIFIER`] when it is blank
    pub fn classifier_or_default(&self) -> &str {
        match self.classifier.trim() {
            "" => DEFAULT_CLASSIFIER,
            c => c,
        }
    }
}

/// Kubernetes provider the cluster runs on
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    Eks,
    Gke,
    Generic,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A bucket URL paired with the classifier stamped on its objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    pub bucket_url: String,
    pub classifier: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub bucket_url: String,
    pub classifier: String,
    pub timeout_secs: u64,
    pub local_root: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            bucket_url: String::new(),
            classifier: DEFAULT_CLASSIFIER.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            local_root: "./buckets".to_string(),
        }
    }
}

/// File collection job run by the binary
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CollectSection {
    pub patterns: Vec<String>,
    pub output_path: String,
    pub base_dir: String,
}

/// Stack teardown run by the binary
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StackSection {
    /// Stack to delete after collection; empty skips the teardown
    pub name: String,
    pub wait_timeout_secs: u64,
}

impl StackSection {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

impl Default for StackSection {
    fn default() -> Self {
        Self {
            name: String::new(),
            wait_timeout_secs: DEFAULT_STACK_WAIT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}
