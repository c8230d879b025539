//! Local filesystem blob storage.

use camino::{Utf8Path, Utf8PathBuf};
use oci_digest::Digest;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::BlobError;
use crate::{BlobDriver, Reader, Writer};

const COPY_BUF: usize = 64 * 1024;

/// Blob storage rooted at a local directory.
///
/// Upload sessions accumulate in append-mode files under `uploads/`;
/// committed blobs live as a single content-addressed copy under `blobs/`.
/// A commit is a verify-then-rename, so a partially written session never
/// becomes visible as a blob.
#[derive(Debug)]
pub struct FilesystemBlobs {
    root: Utf8PathBuf,
}

impl FilesystemBlobs {
    /// Open the store, creating `uploads/` and `blobs/` as needed.
    pub async fn new(root: impl Into<Utf8PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        for dir in [root.join("uploads"), root.join("blobs")] {
            fs::create_dir_all(&dir).await.map_err(BlobError::storage)?;
        }
        Ok(Self { root })
    }

    fn upload_path(&self, session: &str) -> Utf8PathBuf {
        self.root.join("uploads").join(session)
    }

    fn blob_path(&self, digest: &Digest) -> Utf8PathBuf {
        self.root.join("blobs").join(digest.to_string())
    }
}

fn not_found(err: std::io::Error) -> BlobError {
    if err.kind() == std::io::ErrorKind::NotFound {
        BlobError::NotFound
    } else {
        BlobError::storage(err)
    }
}

async fn path_exists(path: &Utf8Path) -> Result<bool, BlobError> {
    match fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(BlobError::storage(err)),
    }
}

#[async_trait::async_trait]
impl BlobDriver for FilesystemBlobs {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn upload_size(&self, session: &str) -> Result<u64, BlobError> {
        let metadata = fs::metadata(self.upload_path(session))
            .await
            .map_err(not_found)?;
        Ok(metadata.len())
    }

    async fn append_upload(&self, session: &str, reader: &mut Reader<'_>) -> Result<u64, BlobError> {
        let path = self.upload_path(session);
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
            .map_err(BlobError::storage)?;

        tokio::io::copy_buf(reader, &mut file)
            .await
            .map_err(BlobError::storage)?;
        file.flush().await.map_err(BlobError::storage)?;

        let metadata = fs::metadata(&path).await.map_err(BlobError::storage)?;
        Ok(metadata.len())
    }

    async fn commit_upload(
        &self,
        _repository: &str,
        session: &str,
        expected: &Digest,
    ) -> Result<(), BlobError> {
        let path = self.upload_path(session);
        let mut file = fs::File::open(&path).await.map_err(not_found)?;

        let mut verifier = expected.verifier();
        let mut buf = vec![0u8; COPY_BUF];
        loop {
            let n = file.read(&mut buf).await.map_err(BlobError::storage)?;
            if n == 0 {
                break;
            }
            verifier.update(&buf[..n]);
        }
        if !verifier.finalize() {
            tracing::debug!(digest = %expected, "upload session failed verification");
            return Err(BlobError::NotVerified);
        }

        fs::rename(&path, self.blob_path(expected))
            .await
            .map_err(BlobError::storage)?;
        Ok(())
    }

    async fn save_blob(&self, digest: &Digest, data: &[u8]) -> Result<(), BlobError> {
        let path = self.blob_path(digest);
        let staging = path.with_extension("tmp");
        fs::write(&staging, data).await.map_err(BlobError::storage)?;
        fs::rename(&staging, &path).await.map_err(BlobError::storage)?;
        Ok(())
    }

    async fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>, BlobError> {
        fs::read(self.blob_path(digest)).await.map_err(not_found)
    }

    async fn read_blob_to(
        &self,
        digest: &Digest,
        writer: &mut Writer<'_>,
    ) -> Result<u64, BlobError> {
        let mut file = fs::File::open(self.blob_path(digest))
            .await
            .map_err(not_found)?;

        let mut verifier = digest.verifier();
        let mut buf = vec![0u8; COPY_BUF];
        let mut written = 0u64;
        loop {
            let n = file.read(&mut buf).await.map_err(BlobError::storage)?;
            if n == 0 {
                break;
            }
            verifier.update(&buf[..n]);
            writer
                .write_all(&buf[..n])
                .await
                .map_err(BlobError::storage)?;
            written += n as u64;
        }
        writer.flush().await.map_err(BlobError::storage)?;

        if !verifier.finalize() {
            return Err(BlobError::NotVerified);
        }
        Ok(written)
    }

    async fn exists(&self, digest: &Digest) -> Result<bool, BlobError> {
        path_exists(&self.blob_path(digest)).await
    }

    async fn delete(&self, digest: &Digest) -> Result<(), BlobError> {
        fs::remove_file(self.blob_path(digest))
            .await
            .map_err(not_found)
    }

    async fn link(&self, _from: &str, _to: &str, digest: &Digest) -> Result<(), BlobError> {
        // Blobs are stored as one content-addressed copy shared by every
        // repository, so the link only requires the bytes to be present;
        // the repository association itself lives in the metadata store.
        if path_exists(&self.blob_path(digest)).await? {
            Ok(())
        } else {
            Err(BlobError::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, FilesystemBlobs) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = FilesystemBlobs::new(root).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn append_grows_session() {
        let (_dir, store) = store().await;

        let size = store.append_upload("s1", &mut &b"hello"[..]).await.unwrap();
        assert_eq!(size, 5);

        let size = store
            .append_upload("s1", &mut &b" world"[..])
            .await
            .unwrap();
        assert_eq!(size, 11);
        assert_eq!(store.upload_size("s1").await.unwrap(), 11);
    }

    #[tokio::test]
    async fn upload_size_of_missing_session() {
        let (_dir, store) = store().await;
        assert!(matches!(
            store.upload_size("missing").await,
            Err(BlobError::NotFound)
        ));
    }

    #[tokio::test]
    async fn commit_promotes_verified_session() {
        let (_dir, store) = store().await;
        let digest = Digest::from_bytes(b"hello world");

        store.append_upload("s1", &mut &b"hello"[..]).await.unwrap();
        store
            .append_upload("s1", &mut &b" world"[..])
            .await
            .unwrap();
        store.commit_upload("app", "s1", &digest).await.unwrap();

        assert!(store.exists(&digest).await.unwrap());
        assert_eq!(store.read_blob(&digest).await.unwrap(), b"hello world");
        // The session is consumed by the commit.
        assert!(matches!(
            store.upload_size("s1").await,
            Err(BlobError::NotFound)
        ));
    }

    #[tokio::test]
    async fn commit_rejects_wrong_digest() {
        let (_dir, store) = store().await;
        let wrong = Digest::from_bytes(b"goodbye");

        store.append_upload("s1", &mut &b"hello"[..]).await.unwrap();
        assert!(matches!(
            store.commit_upload("app", "s1", &wrong).await,
            Err(BlobError::NotVerified)
        ));

        // The blob was not created and the session is still resumable.
        assert!(!store.exists(&wrong).await.unwrap());
        assert_eq!(store.upload_size("s1").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn read_blob_to_verifies_stream() {
        let (_dir, store) = store().await;
        let digest = Digest::from_bytes(b"streamed contents");
        store.save_blob(&digest, b"streamed contents").await.unwrap();

        let mut sink = Vec::new();
        let size = store.read_blob_to(&digest, &mut sink).await.unwrap();
        assert_eq!(size, 17);
        assert_eq!(sink, b"streamed contents");
    }

    #[tokio::test]
    async fn read_blob_to_rejects_corrupted_bytes() {
        let (_dir, store) = store().await;
        let digest = Digest::from_bytes(b"original");

        // Damage the stored copy behind the store's back.
        let path = store.blob_path(&digest);
        fs::write(&path, b"tampered").await.unwrap();

        let mut sink = Vec::new();
        assert!(matches!(
            store.read_blob_to(&digest, &mut sink).await,
            Err(BlobError::NotVerified)
        ));
    }

    #[tokio::test]
    async fn save_blob_round_trips() {
        let (_dir, store) = store().await;
        let digest = Digest::from_bytes(b"{\"schemaVersion\":2}");

        store
            .save_blob(&digest, b"{\"schemaVersion\":2}")
            .await
            .unwrap();
        assert_eq!(
            store.read_blob(&digest).await.unwrap(),
            b"{\"schemaVersion\":2}"
        );
    }

    #[tokio::test]
    async fn delete_removes_bytes() {
        let (_dir, store) = store().await;
        let digest = Digest::from_bytes(b"doomed");

        store.save_blob(&digest, b"doomed").await.unwrap();
        store.delete(&digest).await.unwrap();

        assert!(!store.exists(&digest).await.unwrap());
        assert!(matches!(
            store.delete(&digest).await,
            Err(BlobError::NotFound)
        ));
    }

    #[tokio::test]
    async fn link_requires_present_bytes() {
        let (_dir, store) = store().await;
        let digest = Digest::from_bytes(b"shared");

        assert!(matches!(
            store.link("old", "new", &digest).await,
            Err(BlobError::NotFound)
        ));

        store.save_blob(&digest, b"shared").await.unwrap();
        store.link("old", "new", &digest).await.unwrap();
        // Linking twice is fine.
        store.link("old", "new", &digest).await.unwrap();
    }
}
