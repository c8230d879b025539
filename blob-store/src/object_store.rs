//! S3-compatible object storage for blobs.

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use oci_digest::Digest;
use secret::Secret;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::BlobError;
use crate::{BlobDriver, Reader, Writer};

/// Metadata lookups are bounded separately from blob transfers, which can
/// move gigabytes.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Connection settings for the S3-compatible profile.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    /// Custom endpoint for S3-compatible services; the SDK default when
    /// absent.
    #[serde(default)]
    pub endpoint: Option<String>,

    pub bucket: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<Secret>,

    /// Path-style addressing, required by most non-AWS endpoints.
    #[serde(default)]
    pub path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Blob storage in an S3-compatible bucket.
///
/// Sessions live at `uploads/<id>` and are appended by rewriting the whole
/// object; sessions are small next to blobs, clients push at most a few
/// chunks each. Committed blobs live at `blobs/<digest>`.
#[derive(Debug)]
pub struct ObjectStoreBlobs {
    client: Client,
    bucket: String,
}

impl ObjectStoreBlobs {
    /// Connect to the endpoint and make sure the bucket exists.
    pub async fn connect(config: ObjectStoreConfig) -> Result<Self, BlobError> {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region));
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key.revealed(),
                None,
                None,
                "registry-config",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .endpoint_url(endpoint)
                .force_path_style(config.path_style);
        }
        let client = Client::from_conf(builder.build());

        let store = Self {
            client,
            bucket: config.bucket,
        };
        store.ensure_bucket().await;
        Ok(store)
    }

    async fn ensure_bucket(&self) {
        let head = self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await;
        if head.is_err() {
            if let Err(error) = self
                .client
                .create_bucket()
                .bucket(&self.bucket)
                .send()
                .await
            {
                tracing::warn!(bucket = %self.bucket, %error, "failed to create bucket");
            }
        }
    }

    fn upload_key(&self, session: &str) -> String {
        format!("uploads/{session}")
    }

    fn blob_key(&self, digest: &Digest) -> String {
        format!("blobs/{digest}")
    }

    /// Size of the object at `key`, or `None` when it does not exist.
    async fn head_size(&self, key: &str) -> Result<Option<u64>, BlobError> {
        let head = timeout(
            LOOKUP_TIMEOUT,
            self.client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send(),
        )
        .await
        .map_err(BlobError::storage)?;

        match head {
            Ok(output) => Ok(Some(output.content_length().unwrap_or(0).max(0) as u64)),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(None),
            Err(err) => Err(BlobError::storage(err)),
        }
    }

    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        let output = timeout(
            TRANSFER_TIMEOUT,
            self.client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send(),
        )
        .await
        .map_err(BlobError::storage)?;

        let output = match output {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Ok(None)
            }
            Err(err) => return Err(BlobError::storage(err)),
        };

        let data = timeout(TRANSFER_TIMEOUT, output.body.collect())
            .await
            .map_err(BlobError::storage)?
            .map_err(BlobError::storage)?;
        Ok(Some(data.into_bytes().to_vec()))
    }

    async fn put_bytes(&self, key: &str, data: Vec<u8>) -> Result<(), BlobError> {
        timeout(
            TRANSFER_TIMEOUT,
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(data))
                .send(),
        )
        .await
        .map_err(BlobError::storage)?
        .map_err(BlobError::storage)?;
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<(), BlobError> {
        timeout(
            LOOKUP_TIMEOUT,
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send(),
        )
        .await
        .map_err(BlobError::storage)?
        .map_err(BlobError::storage)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlobDriver for ObjectStoreBlobs {
    fn name(&self) -> &'static str {
        "object-store"
    }

    async fn upload_size(&self, session: &str) -> Result<u64, BlobError> {
        self.head_size(&self.upload_key(session))
            .await?
            .ok_or(BlobError::NotFound)
    }

    async fn append_upload(&self, session: &str, reader: &mut Reader<'_>) -> Result<u64, BlobError> {
        let key = self.upload_key(session);

        // Append by rewriting the whole session object.
        let mut combined = self.get_bytes(&key).await?.unwrap_or_default();
        reader
            .read_to_end(&mut combined)
            .await
            .map_err(BlobError::storage)?;

        let size = combined.len() as u64;
        self.put_bytes(&key, combined).await?;
        Ok(size)
    }

    async fn commit_upload(
        &self,
        _repository: &str,
        session: &str,
        expected: &Digest,
    ) -> Result<(), BlobError> {
        let upload_key = self.upload_key(session);
        let blob_key = self.blob_key(expected);

        if self.head_size(&blob_key).await?.is_some() {
            // Already committed by an earlier push; drop the session bytes.
            self.delete_key(&upload_key).await?;
            return Ok(());
        }

        let data = self
            .get_bytes(&upload_key)
            .await?
            .ok_or(BlobError::NotFound)?;

        let mut verifier = expected.verifier();
        verifier.update(&data);
        if !verifier.finalize() {
            tracing::debug!(digest = %expected, "upload session failed verification");
            return Err(BlobError::NotVerified);
        }

        self.put_bytes(&blob_key, data).await?;
        self.delete_key(&upload_key).await?;
        Ok(())
    }

    async fn save_blob(&self, digest: &Digest, data: &[u8]) -> Result<(), BlobError> {
        let key = self.blob_key(digest);
        if self.head_size(&key).await?.is_some() {
            return Ok(());
        }
        self.put_bytes(&key, data.to_vec()).await
    }

    async fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>, BlobError> {
        self.get_bytes(&self.blob_key(digest))
            .await?
            .ok_or(BlobError::NotFound)
    }

    async fn read_blob_to(
        &self,
        digest: &Digest,
        writer: &mut Writer<'_>,
    ) -> Result<u64, BlobError> {
        let output = timeout(
            TRANSFER_TIMEOUT,
            self.client
                .get_object()
                .bucket(&self.bucket)
                .key(self.blob_key(digest))
                .send(),
        )
        .await
        .map_err(BlobError::storage)?;

        let mut output = match output {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(BlobError::NotFound)
            }
            Err(err) => return Err(BlobError::storage(err)),
        };

        let mut verifier = digest.verifier();
        let mut written = 0u64;
        while let Some(chunk) = timeout(TRANSFER_TIMEOUT, output.body.try_next())
            .await
            .map_err(BlobError::storage)?
            .map_err(BlobError::storage)?
        {
            verifier.update(&chunk);
            writer.write_all(&chunk).await.map_err(BlobError::storage)?;
            written += chunk.len() as u64;
        }
        writer.flush().await.map_err(BlobError::storage)?;

        if !verifier.finalize() {
            return Err(BlobError::NotVerified);
        }
        Ok(written)
    }

    async fn exists(&self, digest: &Digest) -> Result<bool, BlobError> {
        Ok(self.head_size(&self.blob_key(digest)).await?.is_some())
    }

    async fn delete(&self, digest: &Digest) -> Result<(), BlobError> {
        let key = self.blob_key(digest);
        if self.head_size(&key).await?.is_none() {
            return Err(BlobError::NotFound);
        }
        self.delete_key(&key).await
    }

    async fn link(&self, _from: &str, _to: &str, digest: &Digest) -> Result<(), BlobError> {
        // One shared copy per digest; see the filesystem profile.
        if self.head_size(&self.blob_key(digest)).await?.is_none() {
            return Err(BlobError::NotFound);
        }
        Ok(())
    }
}
