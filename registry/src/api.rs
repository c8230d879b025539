//! API server builder and router

use axum::http::{HeaderName, StatusCode};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::json;

use blob_store::BlobStore;
use metadata_store::MetadataStore;

use crate::error::{RegistryError, RegistryResult};

pub(crate) const DEFAULT_MAX_MANIFEST_BYTES: usize = 4 * 1024 * 1024;

pub(crate) const DOCKER_CONTENT_DIGEST: HeaderName =
    HeaderName::from_static("docker-content-digest");
pub(crate) const DOCKER_UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");
pub(crate) const OCI_SUBJECT: HeaderName = HeaderName::from_static("oci-subject");
pub(crate) const OCI_FILTERS_APPLIED: HeaderName = HeaderName::from_static("oci-filters-applied");

/// Shared handler state: the two capability stores chosen at startup.
#[derive(Debug, Clone)]
pub(crate) struct RegistryState {
    pub(crate) blobs: BlobStore,
    pub(crate) metadata: MetadataStore,
}

/// Registry builder for configuring and creating the distribution API
/// service
#[derive(Debug)]
pub struct RegistryBuilder {
    blobs: Option<BlobStore>,
    metadata: Option<MetadataStore>,
    max_manifest_bytes: usize,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self {
            blobs: None,
            metadata: None,
            max_manifest_bytes: DEFAULT_MAX_MANIFEST_BYTES,
        }
    }

    /// Set the blob storage backend
    pub fn blobs(mut self, blobs: BlobStore) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Set the metadata storage backend
    pub fn metadata(mut self, metadata: MetadataStore) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Cap manifest payloads (default 4 MiB)
    pub fn max_manifest_bytes(mut self, limit: usize) -> Self {
        self.max_manifest_bytes = limit;
        self
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn build(self) -> Router {
        let blobs = self.blobs.expect("blob store must be configured");
        let metadata = self.metadata.expect("metadata store must be configured");

        let state = RegistryState { blobs, metadata };

        Router::new()
            .route("/v2/", get(api_version_check))
            .merge(crate::blob::router())
            .merge(crate::upload::router())
            .merge(crate::manifest::router(self.max_manifest_bytes))
            .merge(crate::tag::router())
            .with_state(state)
    }
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
async fn api_version_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({})))
}

/// Validate repository name
pub(crate) fn validate_repository(name: &str) -> RegistryResult<()> {
    if name.is_empty() || name.contains("..") {
        return Err(RegistryError::InvalidRepository(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_names() {
        assert!(validate_repository("app").is_ok());
        assert!(validate_repository("team/app").is_ok());
        assert!(validate_repository("").is_err());
        assert!(validate_repository("../escape").is_err());
    }
}
