//! # Metadata storage backends
//!
//! The mutable half of the registry's data model: tag → digest mappings,
//! the referrer (subject → descriptors) index, and the repository ↔ blob
//! association set, behind a single capability trait with an embedded
//! key-value profile (redb) and a DynamoDB-compatible document-store
//! profile.

use std::fmt;
use std::sync::Arc;

use camino::Utf8PathBuf;
use oci_digest::Digest;
use oci_manifest::Descriptor;
use serde::Deserialize;

pub(crate) mod dynamo;
pub(crate) mod error;
pub(crate) mod kv;

#[doc(inline)]
pub use dynamo::{DocumentStoreConfig, DynamoMetadata};
#[doc(inline)]
pub use error::MetadataError;
#[doc(inline)]
pub use kv::KvMetadata;

/// A metadata storage backend.
///
/// Every operation is single-key atomic; callers compose them knowing that
/// multi-key sequences (a manifest PUT writes a blob association, a tag,
/// and possibly a referrer edge) are individually idempotent and safe to
/// replay.
#[async_trait::async_trait]
pub trait MetadataDriver: fmt::Debug + Send + Sync {
    /// The name of the backend profile.
    fn name(&self) -> &'static str;

    /// Point `tag` at `digest`, replacing any previous mapping.
    async fn save_tag(&self, repository: &str, digest: &Digest, tag: &str)
        -> Result<(), MetadataError>;

    /// Resolve a tag to its digest.
    async fn read_tag(&self, repository: &str, tag: &str) -> Result<Digest, MetadataError>;

    /// Remove a tag.
    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<(), MetadataError>;

    /// Tags of a repository in ascending lexicographic order. `after` is an
    /// exclusive cursor; `limit` caps the page (`None` returns all).
    async fn list_tags(
        &self,
        repository: &str,
        limit: Option<usize>,
        after: Option<&str>,
    ) -> Result<Vec<String>, MetadataError>;

    /// Append a referrer edge under `(repository, subject)`.
    async fn add_reference(
        &self,
        repository: &str,
        subject: &Digest,
        descriptor: Descriptor,
    ) -> Result<(), MetadataError>;

    /// Referrer edges of a subject, optionally filtered by `artifactType`
    /// equality. `NotFound` when no edge list exists for the subject.
    async fn references(
        &self,
        repository: &str,
        subject: &Digest,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Descriptor>, MetadataError>;

    /// Record that `repository` exposes `digest`.
    async fn add_blob(&self, repository: &str, digest: &Digest) -> Result<(), MetadataError>;

    /// Remove the association; the blob bytes are not touched.
    async fn delete_blob(&self, repository: &str, digest: &Digest) -> Result<(), MetadataError>;

    /// Whether `repository` exposes `digest`.
    async fn blob_exists(&self, repository: &str, digest: &Digest) -> Result<bool, MetadataError>;

    /// Associate an existing blob with another repository (cross-repo
    /// mount). Idempotent.
    async fn link_blob(&self, repository: &str, digest: &Digest) -> Result<(), MetadataError>;
}

pub(crate) type ArcMetadataDriver = Arc<dyn MetadataDriver>;

/// Handle to the configured metadata backend.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    driver: ArcMetadataDriver,
}

impl<D> From<D> for MetadataStore
where
    D: MetadataDriver + 'static,
{
    fn from(value: D) -> Self {
        MetadataStore::new(value)
    }
}

impl MetadataStore {
    pub fn new<D: MetadataDriver + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    pub fn name(&self) -> &'static str {
        self.driver.name()
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn save_tag(
        &self,
        repository: &str,
        digest: &Digest,
        tag: &str,
    ) -> Result<(), MetadataError> {
        self.driver.save_tag(repository, digest, tag).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn read_tag(&self, repository: &str, tag: &str) -> Result<Digest, MetadataError> {
        self.driver.read_tag(repository, tag).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn delete_tag(&self, repository: &str, tag: &str) -> Result<(), MetadataError> {
        self.driver.delete_tag(repository, tag).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn list_tags(
        &self,
        repository: &str,
        limit: Option<usize>,
        after: Option<&str>,
    ) -> Result<Vec<String>, MetadataError> {
        self.driver.list_tags(repository, limit, after).await
    }

    #[tracing::instrument(skip(self, descriptor), fields(driver = self.driver.name()))]
    pub async fn add_reference(
        &self,
        repository: &str,
        subject: &Digest,
        descriptor: Descriptor,
    ) -> Result<(), MetadataError> {
        self.driver.add_reference(repository, subject, descriptor).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn references(
        &self,
        repository: &str,
        subject: &Digest,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Descriptor>, MetadataError> {
        self.driver.references(repository, subject, artifact_type).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn add_blob(&self, repository: &str, digest: &Digest) -> Result<(), MetadataError> {
        self.driver.add_blob(repository, digest).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn delete_blob(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<(), MetadataError> {
        self.driver.delete_blob(repository, digest).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn blob_exists(
        &self,
        repository: &str,
        digest: &Digest,
    ) -> Result<bool, MetadataError> {
        self.driver.blob_exists(repository, digest).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn link_blob(&self, repository: &str, digest: &Digest) -> Result<(), MetadataError> {
        self.driver.link_blob(repository, digest).await
    }
}

/// Apply the shared tag-listing page rules: ascending order is assumed,
/// `after` is an exclusive cursor, `limit` caps the result.
pub(crate) fn page_tags(
    mut tags: Vec<String>,
    limit: Option<usize>,
    after: Option<&str>,
) -> Vec<String> {
    if let Some(after) = after {
        tags.retain(|tag| tag.as_str() > after);
    }
    if let Some(limit) = limit {
        tags.truncate(limit);
    }
    tags
}

/// Configuration selecting and parameterizing a metadata profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataStoreConfig {
    /// Embedded key-value database at `path`.
    EmbeddedKv { path: Utf8PathBuf },

    /// DynamoDB-compatible document store.
    RemoteDocumentStore(DocumentStoreConfig),
}

impl MetadataStoreConfig {
    /// Construct the configured backend.
    #[tracing::instrument]
    pub async fn build(self) -> Result<MetadataStore, MetadataError> {
        match self {
            MetadataStoreConfig::EmbeddedKv { path } => Ok(KvMetadata::open(path).await?.into()),
            MetadataStoreConfig::RemoteDocumentStore(config) => {
                Ok(DynamoMetadata::connect(config).await?.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn page_tags_applies_cursor_then_cap() {
        let all = tags(&["a", "b", "c", "d"]);
        assert_eq!(page_tags(all.clone(), None, None), tags(&["a", "b", "c", "d"]));
        assert_eq!(page_tags(all.clone(), Some(2), None), tags(&["a", "b"]));
        assert_eq!(page_tags(all.clone(), None, Some("b")), tags(&["c", "d"]));
        assert_eq!(page_tags(all.clone(), Some(1), Some("a")), tags(&["b"]));
        // A cursor past the end and an oversized cap are both harmless.
        assert_eq!(page_tags(all.clone(), Some(10), Some("z")), Vec::<String>::new());
    }
}
