//! # Blob storage backends
//!
//! Content-addressed byte storage for the registry: upload sessions,
//! verified commits, streamed reads, and cross-repository links, behind a
//! single capability trait with a filesystem profile and an S3-compatible
//! object-store profile.
//!
//! Handlers hold a cloneable [`BlobStore`] and never learn which profile is
//! behind it; the choice is made once, at startup, from a
//! [`BlobStoreConfig`].

use std::fmt;
use std::sync::Arc;

use camino::Utf8PathBuf;
use oci_digest::Digest;
use serde::Deserialize;
use tokio::io;

pub(crate) mod error;
pub(crate) mod filesystem;
pub(crate) mod object_store;

#[doc(inline)]
pub use error::BlobError;
#[doc(inline)]
pub use filesystem::FilesystemBlobs;
#[doc(inline)]
pub use object_store::{ObjectStoreBlobs, ObjectStoreConfig};

/// A reader stream of upload bytes.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + 'r;

/// A writer stream for blob contents.
pub type Writer<'w> = dyn io::AsyncWrite + Unpin + Send + 'w;

/// A blob storage backend.
///
/// Blobs are immutable and keyed by digest alone; which repositories expose
/// a blob is the metadata store's concern. Upload sessions are mutable,
/// append-only staging areas keyed by an opaque session id and destroyed on
/// commit.
#[async_trait::async_trait]
pub trait BlobDriver: fmt::Debug + Send + Sync {
    /// The name of the backend profile.
    fn name(&self) -> &'static str;

    /// Current byte length of an in-flight upload session.
    async fn upload_size(&self, session: &str) -> Result<u64, BlobError>;

    /// Append the reader's bytes to the session, creating it on first
    /// write, and return the new session size.
    async fn append_upload(&self, session: &str, reader: &mut Reader<'_>) -> Result<u64, BlobError>;

    /// Rehash the session's bytes against `expected` and promote them to an
    /// immutable blob, destroying the session. Succeeds without rewriting
    /// when the blob already exists.
    async fn commit_upload(
        &self,
        repository: &str,
        session: &str,
        expected: &Digest,
    ) -> Result<(), BlobError>;

    /// Store a fully-buffered blob (the manifest path).
    async fn save_blob(&self, digest: &Digest, data: &[u8]) -> Result<(), BlobError>;

    /// Read a full blob into memory.
    async fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>, BlobError>;

    /// Stream a blob into `writer`, teeing through a digest verifier;
    /// returns the number of bytes written.
    async fn read_blob_to(&self, digest: &Digest, writer: &mut Writer<'_>)
        -> Result<u64, BlobError>;

    /// Whether the blob's bytes are present.
    async fn exists(&self, digest: &Digest) -> Result<bool, BlobError>;

    /// Remove the blob's bytes.
    async fn delete(&self, digest: &Digest) -> Result<(), BlobError>;

    /// Make a blob available to another repository without re-uploading
    /// (mount-on-push). Idempotent.
    async fn link(&self, from: &str, to: &str, digest: &Digest) -> Result<(), BlobError>;
}

pub(crate) type ArcBlobDriver = Arc<dyn BlobDriver>;

/// Handle to the configured blob storage backend.
#[derive(Debug, Clone)]
pub struct BlobStore {
    driver: ArcBlobDriver,
}

impl<D> From<D> for BlobStore
where
    D: BlobDriver + 'static,
{
    fn from(value: D) -> Self {
        BlobStore::new(value)
    }
}

impl BlobStore {
    pub fn new<D: BlobDriver + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    pub fn name(&self) -> &'static str {
        self.driver.name()
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn upload_size(&self, session: &str) -> Result<u64, BlobError> {
        self.driver.upload_size(session).await
    }

    #[tracing::instrument(skip(self, reader), fields(driver = self.driver.name()))]
    pub async fn append_upload<'d, R>(
        &'d self,
        session: &str,
        reader: &mut R,
    ) -> Result<u64, BlobError>
    where
        R: io::AsyncBufRead + Unpin + Send + 'd,
    {
        self.driver.append_upload(session, reader).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn commit_upload(
        &self,
        repository: &str,
        session: &str,
        expected: &Digest,
    ) -> Result<(), BlobError> {
        self.driver.commit_upload(repository, session, expected).await
    }

    #[tracing::instrument(skip(self, data), fields(driver = self.driver.name(), size = data.len()))]
    pub async fn save_blob(&self, digest: &Digest, data: &[u8]) -> Result<(), BlobError> {
        self.driver.save_blob(digest, data).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>, BlobError> {
        self.driver.read_blob(digest).await
    }

    #[tracing::instrument(skip(self, writer), fields(driver = self.driver.name()))]
    pub async fn read_blob_to<'d, W>(
        &'d self,
        digest: &Digest,
        writer: &mut W,
    ) -> Result<u64, BlobError>
    where
        W: io::AsyncWrite + Unpin + Send + 'd,
    {
        self.driver.read_blob_to(digest, writer).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn exists(&self, digest: &Digest) -> Result<bool, BlobError> {
        self.driver.exists(digest).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn delete(&self, digest: &Digest) -> Result<(), BlobError> {
        self.driver.delete(digest).await
    }

    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn link(&self, from: &str, to: &str, digest: &Digest) -> Result<(), BlobError> {
        self.driver.link(from, to, digest).await
    }
}

/// Configuration selecting and parameterizing a blob storage profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobStoreConfig {
    /// Local filesystem profile rooted at `path`.
    Filesystem { path: Utf8PathBuf },

    /// S3-compatible object-store profile.
    ObjectStore(ObjectStoreConfig),
}

impl BlobStoreConfig {
    /// Construct the configured backend.
    #[tracing::instrument]
    pub async fn build(self) -> Result<BlobStore, BlobError> {
        match self {
            BlobStoreConfig::Filesystem { path } => {
                Ok(FilesystemBlobs::new(path).await?.into())
            }
            BlobStoreConfig::ObjectStore(config) => {
                Ok(ObjectStoreBlobs::connect(config).await?.into())
            }
        }
    }
}
