//! Deployment configuration for the registry service

use axum::Router;
use camino::Utf8PathBuf;
use serde::Deserialize;

use blob_store::{BlobStore, BlobStoreConfig, ObjectStoreConfig};
use metadata_store::{DocumentStoreConfig, MetadataStore, MetadataStoreConfig};

use crate::api::DEFAULT_MAX_MANIFEST_BYTES;
use crate::RegistryBuilder;

/// Which blob-store profile to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Filesystem,
    ObjectStore,
}

/// Which metadata-store profile to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataBackend {
    EmbeddedKv,
    RemoteDocumentStore,
}

/// Registry deployment configuration.
///
/// `storage_path` roots the filesystem blob profile (its `uploads/` and
/// `blobs/` directories) and holds the embedded metadata database
/// (`registry.db`).
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub storage_backend: StorageBackend,
    pub metadata_backend: MetadataBackend,

    #[serde(default)]
    pub storage_path: Option<Utf8PathBuf>,

    #[serde(default)]
    pub object_store: Option<ObjectStoreConfig>,

    #[serde(default)]
    pub remote_document_store: Option<DocumentStoreConfig>,

    #[serde(default = "default_max_manifest_bytes")]
    pub max_manifest_bytes: usize,
}

fn default_max_manifest_bytes() -> usize {
    DEFAULT_MAX_MANIFEST_BYTES
}

/// Errors raised while building a registry from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The selected backend needs a configuration section that is absent.
    #[error("{backend} requires the `{section}` option")]
    MissingSection {
        backend: &'static str,
        section: &'static str,
    },

    #[error("blob store: {0}")]
    Blobs(#[from] blob_store::BlobError),

    #[error("metadata store: {0}")]
    Metadata(#[from] metadata_store::MetadataError),
}

impl RegistryConfig {
    /// Construct the configured backends and assemble the service router.
    pub async fn build(self) -> Result<Router, ConfigError> {
        let blobs = self.blob_store().await?;
        let metadata = self.metadata_store().await?;

        Ok(RegistryBuilder::new()
            .blobs(blobs)
            .metadata(metadata)
            .max_manifest_bytes(self.max_manifest_bytes)
            .build())
    }

    async fn blob_store(&self) -> Result<BlobStore, ConfigError> {
        let config = match self.storage_backend {
            StorageBackend::Filesystem => {
                let path = self.storage_path.clone().ok_or(ConfigError::MissingSection {
                    backend: "filesystem storage",
                    section: "storage_path",
                })?;
                BlobStoreConfig::Filesystem { path }
            }
            StorageBackend::ObjectStore => {
                let config = self.object_store.clone().ok_or(ConfigError::MissingSection {
                    backend: "object-store storage",
                    section: "object_store",
                })?;
                BlobStoreConfig::ObjectStore(config)
            }
        };
        Ok(config.build().await?)
    }

    async fn metadata_store(&self) -> Result<MetadataStore, ConfigError> {
        let config = match self.metadata_backend {
            MetadataBackend::EmbeddedKv => {
                let path = self.storage_path.clone().ok_or(ConfigError::MissingSection {
                    backend: "embedded metadata",
                    section: "storage_path",
                })?;
                MetadataStoreConfig::EmbeddedKv {
                    path: path.join("registry.db"),
                }
            }
            MetadataBackend::RemoteDocumentStore => {
                let config =
                    self.remote_document_store
                        .clone()
                        .ok_or(ConfigError::MissingSection {
                            backend: "remote metadata",
                            section: "remote_document_store",
                        })?;
                MetadataStoreConfig::RemoteDocumentStore(config)
            }
        };
        Ok(config.build().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_filesystem_config() {
        let config: RegistryConfig = serde_json::from_value(serde_json::json!({
            "storage_backend": "filesystem",
            "metadata_backend": "embedded_kv",
            "storage_path": "/var/lib/registry"
        }))
        .unwrap();

        assert_eq!(config.storage_backend, StorageBackend::Filesystem);
        assert_eq!(config.metadata_backend, MetadataBackend::EmbeddedKv);
        assert_eq!(config.max_manifest_bytes, DEFAULT_MAX_MANIFEST_BYTES);
    }

    #[test]
    fn deserialize_remote_config() {
        let config: RegistryConfig = serde_json::from_value(serde_json::json!({
            "storage_backend": "object_store",
            "metadata_backend": "remote_document_store",
            "object_store": {
                "endpoint": "http://localhost:9000",
                "bucket": "registry",
                "access_key": "minio",
                "secret_key": "minio123",
                "path_style": true
            },
            "remote_document_store": {
                "endpoint": "http://localhost:8000",
                "table_prefix": "staging"
            },
            "max_manifest_bytes": 1048576
        }))
        .unwrap();

        assert_eq!(config.storage_backend, StorageBackend::ObjectStore);
        assert_eq!(config.max_manifest_bytes, 1048576);
        let object_store = config.object_store.unwrap();
        assert!(object_store.path_style);
        assert_eq!(object_store.region, "us-east-1");
    }

    #[tokio::test]
    async fn missing_section_is_rejected() {
        let config: RegistryConfig = serde_json::from_value(serde_json::json!({
            "storage_backend": "filesystem",
            "metadata_backend": "embedded_kv"
        }))
        .unwrap();

        assert!(matches!(
            config.build().await,
            Err(ConfigError::MissingSection { .. })
        ));
    }
}
