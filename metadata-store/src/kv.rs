//! Embedded key-value metadata storage.

use std::sync::Arc;

use camino::Utf8PathBuf;
use oci_digest::Digest;
use oci_manifest::Descriptor;
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::MetadataError;
use crate::{page_tags, MetadataDriver};

const TAG_TABLE: TableDefinition<&str, &str> = TableDefinition::new("tag");
const REFERENCE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("reference");
// Reserved for upload-session bookkeeping; session state currently lives in
// the blob store.
const SESSION_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("session");
const REPOSITORY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("repository");

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Metadata in a single embedded database file.
///
/// Keys are composite strings: `"<repo>:<tag>"` in the tag table,
/// `"<repo>:<digest>"` in the reference table, and `"<repo>@<digest>"` in
/// the repository-association table. Reference lists are JSON arrays.
#[derive(Debug)]
pub struct KvMetadata {
    db: Arc<Database>,
}

impl KvMetadata {
    /// Open (or create) the database file and its tables.
    pub async fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, MetadataError> {
        let path = path.into();
        let db = tokio::task::spawn_blocking(move || -> Result<Database, redb::Error> {
            let db = Database::create(path.as_std_path())?;
            let txn = db.begin_write()?;
            txn.open_table(TAG_TABLE)?;
            txn.open_table(REFERENCE_TABLE)?;
            txn.open_table(SESSION_TABLE)?;
            txn.open_table(REPOSITORY_TABLE)?;
            txn.commit()?;
            Ok(db)
        })
        .await
        .map_err(MetadataError::storage)?
        .map_err(MetadataError::storage)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Run a database operation on the blocking pool; redb transactions are
    /// synchronous.
    async fn blocking<T, F>(&self, op: F) -> Result<T, MetadataError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, BoxError> + Send + 'static,
    {
        let db = self.db.clone();
        match tokio::task::spawn_blocking(move || op(&db)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(MetadataError::Storage(err)),
            Err(err) => Err(MetadataError::storage(err)),
        }
    }
}

fn tag_key(repository: &str, tag: &str) -> String {
    format!("{repository}:{tag}")
}

fn reference_key(repository: &str, digest: &Digest) -> String {
    format!("{repository}:{digest}")
}

fn association_key(repository: &str, digest: &Digest) -> String {
    format!("{repository}@{digest}")
}

#[async_trait::async_trait]
impl MetadataDriver for KvMetadata {
    fn name(&self) -> &'static str {
        "embedded-kv"
    }

    async fn save_tag(
        &self,
        repository: &str,
        digest: &Digest,
        tag: &str,
    ) -> Result<(), MetadataError> {
        let key = tag_key(repository, tag);
        let value = digest.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(TAG_TABLE)?;
                table.insert(key.as_str(), value.as_str())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn read_tag(&self, repository: &str, tag: &str) -> Result<Digest, MetadataError> {
        let key = tag_key(repository, tag);
        let value = self
            .blocking(move |db| {
                let txn = db.begin_read()?;
                let table = txn.open_table(TAG_TABLE)?;
                Ok(table.get(key.as_str())?.map(|guard| guard.value().to_string()))
            })
            .await?;

        match value {
            Some(value) => Digest::parse(&value).map_err(MetadataError::storage),
            None => Err(MetadataError::NotFound),
        }
    }

    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<(), MetadataError> {
        let key = tag_key(repository, tag);
        let removed = self
            .blocking(move |db| {
                let txn = db.begin_write()?;
                let removed = {
                    let mut table = txn.open_table(TAG_TABLE)?;
                    let existed = table.remove(key.as_str())?.is_some();
                    existed
                };
                txn.commit()?;
                Ok(removed)
            })
            .await?;

        if removed {
            Ok(())
        } else {
            Err(MetadataError::NotFound)
        }
    }

    async fn list_tags(
        &self,
        repository: &str,
        limit: Option<usize>,
        after: Option<&str>,
    ) -> Result<Vec<String>, MetadataError> {
        let prefix = format!("{repository}:");
        let tags = self
            .blocking(move |db| {
                let txn = db.begin_read()?;
                let table = txn.open_table(TAG_TABLE)?;

                // The range scan is already lexicographic.
                let mut tags = Vec::new();
                for entry in table.range(prefix.as_str()..)? {
                    let (key, _value) = entry?;
                    let Some(tag) = key.value().strip_prefix(prefix.as_str()) else {
                        break;
                    };
                    tags.push(tag.to_string());
                }
                Ok(tags)
            })
            .await?;

        Ok(page_tags(tags, limit, after))
    }

    async fn add_reference(
        &self,
        repository: &str,
        subject: &Digest,
        descriptor: Descriptor,
    ) -> Result<(), MetadataError> {
        let key = reference_key(repository, subject);
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(REFERENCE_TABLE)?;
                let mut list: Vec<Descriptor> = match table.get(key.as_str())? {
                    Some(guard) => serde_json::from_slice(guard.value())?,
                    None => Vec::new(),
                };
                list.push(descriptor);
                let data = serde_json::to_vec(&list)?;
                table.insert(key.as_str(), data.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn references(
        &self,
        repository: &str,
        subject: &Digest,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Descriptor>, MetadataError> {
        let key = reference_key(repository, subject);
        let list = self
            .blocking(move |db| {
                let txn = db.begin_read()?;
                let table = txn.open_table(REFERENCE_TABLE)?;
                let list = match table.get(key.as_str())? {
                    Some(guard) => Some(serde_json::from_slice::<Vec<Descriptor>>(guard.value())?),
                    None => None,
                };
                Ok(list)
            })
            .await?
            .ok_or(MetadataError::NotFound)?;

        Ok(match artifact_type {
            Some(filter) => list
                .into_iter()
                .filter(|descriptor| descriptor.artifact_type.as_deref() == Some(filter))
                .collect(),
            None => list,
        })
    }

    async fn add_blob(&self, repository: &str, digest: &Digest) -> Result<(), MetadataError> {
        let key = association_key(repository, digest);
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(REPOSITORY_TABLE)?;
                table.insert(key.as_str(), [1u8].as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_blob(&self, repository: &str, digest: &Digest) -> Result<(), MetadataError> {
        let key = association_key(repository, digest);
        let removed = self
            .blocking(move |db| {
                let txn = db.begin_write()?;
                let removed = {
                    let mut table = txn.open_table(REPOSITORY_TABLE)?;
                    let existed = table.remove(key.as_str())?.is_some();
                    existed
                };
                txn.commit()?;
                Ok(removed)
            })
            .await?;

        if removed {
            Ok(())
        } else {
            Err(MetadataError::NotFound)
        }
    }

    async fn blob_exists(&self, repository: &str, digest: &Digest) -> Result<bool, MetadataError> {
        let key = association_key(repository, digest);
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(REPOSITORY_TABLE)?;
            Ok(table.get(key.as_str())?.is_some())
        })
        .await
    }

    async fn link_blob(&self, repository: &str, digest: &Digest) -> Result<(), MetadataError> {
        self.add_blob(repository, digest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, KvMetadata) {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("registry.db")).unwrap();
        let store = KvMetadata::open(path).await.unwrap();
        (dir, store)
    }

    fn digest(data: &[u8]) -> Digest {
        Digest::from_bytes(data)
    }

    fn descriptor(artifact_type: &str, data: &[u8]) -> Descriptor {
        Descriptor {
            media_type: oci_manifest::MEDIA_TYPE_OCI_IMAGE_MANIFEST.to_string(),
            digest: digest(data),
            size: data.len() as u64,
            urls: None,
            annotations: None,
            data: None,
            artifact_type: Some(artifact_type.to_string()),
        }
    }

    #[tokio::test]
    async fn tag_round_trip() {
        let (_dir, store) = store().await;
        let d1 = digest(b"one");
        let d2 = digest(b"two");

        store.save_tag("app", &d1, "latest").await.unwrap();
        assert_eq!(store.read_tag("app", "latest").await.unwrap(), d1);

        // Saving again overwrites; the prior digest is forgotten.
        store.save_tag("app", &d2, "latest").await.unwrap();
        assert_eq!(store.read_tag("app", "latest").await.unwrap(), d2);

        store.delete_tag("app", "latest").await.unwrap();
        assert!(matches!(
            store.read_tag("app", "latest").await,
            Err(MetadataError::NotFound)
        ));
        assert!(matches!(
            store.delete_tag("app", "latest").await,
            Err(MetadataError::NotFound)
        ));
    }

    #[tokio::test]
    async fn tags_are_scoped_by_repository() {
        let (_dir, store) = store().await;
        let d = digest(b"blob");

        store.save_tag("app", &d, "latest").await.unwrap();
        assert!(matches!(
            store.read_tag("other", "latest").await,
            Err(MetadataError::NotFound)
        ));
    }

    #[tokio::test]
    async fn list_tags_sorted_with_cursor_and_cap() {
        let (_dir, store) = store().await;
        let d = digest(b"blob");

        for tag in ["v1.1", "latest", "v1.0"] {
            store.save_tag("app", &d, tag).await.unwrap();
        }
        // A neighbouring repository must not leak into the listing.
        store.save_tag("app2", &d, "other").await.unwrap();

        let all = store.list_tags("app", None, None).await.unwrap();
        assert_eq!(all, vec!["latest", "v1.0", "v1.1"]);

        let page = store.list_tags("app", Some(2), None).await.unwrap();
        assert_eq!(page, vec!["latest", "v1.0"]);

        let rest = store.list_tags("app", None, Some("v1.0")).await.unwrap();
        assert_eq!(rest, vec!["v1.1"]);

        let empty = store.list_tags("empty", None, None).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn references_accumulate_and_filter() {
        let (_dir, store) = store().await;
        let subject = digest(b"subject-manifest");

        assert!(matches!(
            store.references("app", &subject, None).await,
            Err(MetadataError::NotFound)
        ));

        store
            .add_reference("app", &subject, descriptor("application/spdx+json", b"sbom"))
            .await
            .unwrap();
        store
            .add_reference("app", &subject, descriptor("application/sig", b"signature"))
            .await
            .unwrap();

        let all = store.references("app", &subject, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let filtered = store
            .references("app", &subject, Some("application/spdx+json"))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].digest, digest(b"sbom"));

        let none = store
            .references("app", &subject, Some("application/unknown"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn blob_associations() {
        let (_dir, store) = store().await;
        let d = digest(b"layer");

        assert!(!store.blob_exists("app", &d).await.unwrap());
        store.add_blob("app", &d).await.unwrap();
        assert!(store.blob_exists("app", &d).await.unwrap());
        assert!(!store.blob_exists("other", &d).await.unwrap());

        store.link_blob("other", &d).await.unwrap();
        assert!(store.blob_exists("other", &d).await.unwrap());

        store.delete_blob("app", &d).await.unwrap();
        assert!(!store.blob_exists("app", &d).await.unwrap());
        // The link into the other repository is untouched.
        assert!(store.blob_exists("other", &d).await.unwrap());
        assert!(matches!(
            store.delete_blob("app", &d).await,
            Err(MetadataError::NotFound)
        ));
    }
}
