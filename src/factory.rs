//! Bucket provider selection
//!
//! Picks the provider for a cluster without touching the network; clients
//! are created lazily by the providers on first use.

use crate::config::{AppConfig, ClusterStorageConfig, ProviderKind};
use crate::storage::{CloudNativeProvider, GenericBlobProvider, Provider, StorageSettings};

/// Select the bucket provider for the given cluster configuration.
///
/// Without cluster configuration the generic provider is returned
/// uninitialized (legacy mode) and must be bound with
/// [`Provider::prepare`]. `None` means no provider supports the cluster.
pub fn select(config: Option<&ClusterStorageConfig>, settings: &StorageSettings) -> Option<Provider> {
    let Some(config) = config else {
        tracing::warn!("No cluster configuration found, falling back to the legacy bucket provider");
        return Some(Provider::Generic(GenericBlobProvider::uninitialized(
            settings,
        )));
    };

    match config.provider_kind {
        ProviderKind::Aws | ProviderKind::Eks => {
            Some(Provider::Native(CloudNativeProvider::new(config, settings)))
        }
        ProviderKind::Generic => Some(Provider::Generic(GenericBlobProvider::new(
            config.classifier_or_default(),
            settings,
        ))),
        other => {
            tracing::warn!("No bucket provider available for cluster provider {:?}", other);
            None
        }
    }
}

/// Select the bucket provider described by the application configuration
pub fn from_app_config(config: &AppConfig) -> Option<Provider> {
    select(config.cluster.as_ref(), &config.storage_settings())
}
