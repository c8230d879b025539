//! DynamoDB-compatible document metadata storage.

use std::collections::HashMap;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_dynamodb::config::Region;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType,
};
use aws_sdk_dynamodb::Client;
use oci_digest::Digest;
use oci_manifest::Descriptor;
use secret::Secret;
use serde::Deserialize;
use tokio::time::timeout;

use crate::error::MetadataError;
use crate::{page_tags, MetadataDriver};

const TAGS_TABLE: &str = "registry_tags";
const REFERENCES_TABLE: &str = "registry_references";
const BLOBS_TABLE: &str = "registry_blobs";

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the document-store profile.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentStoreConfig {
    /// Custom endpoint for DynamoDB-compatible services; the SDK default
    /// when absent.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub table_prefix: Option<String>,

    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<Secret>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Metadata in three document tables.
///
/// Items are partitioned by `REPO#<name>` with kind-prefixed sort keys
/// (`TAG#…`, `REF#…`, `BLOB#…`); referrer lists are JSON-encoded in a
/// single `descriptors` attribute.
#[derive(Debug)]
pub struct DynamoMetadata {
    client: Client,
    table_prefix: Option<String>,
}

impl DynamoMetadata {
    /// Connect to the endpoint and make sure the tables exist.
    pub async fn connect(config: DocumentStoreConfig) -> Result<Self, MetadataError> {
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

        let mut builder = aws_sdk_dynamodb::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        let client = Client::from_conf(builder.build());

        let store = Self {
            client,
            table_prefix: config.table_prefix,
        };
        store.ensure_tables().await;
        Ok(store)
    }

    fn table(&self, base: &str) -> String {
        match &self.table_prefix {
            Some(prefix) => format!("{prefix}_{base}"),
            None => base.to_string(),
        }
    }

    async fn ensure_tables(&self) {
        for base in [TAGS_TABLE, REFERENCES_TABLE, BLOBS_TABLE] {
            let table = self.table(base);
            let describe = self
                .client
                .describe_table()
                .table_name(&table)
                .send()
                .await;
            if describe.is_ok() {
                continue;
            }

            match self.create_table(&table).await {
                Ok(()) => tracing::info!(%table, "created metadata table"),
                Err(error) => tracing::warn!(%table, %error, "failed to create metadata table"),
            }
        }
    }

    async fn create_table(&self, table: &str) -> Result<(), MetadataError> {
        let partition = KeySchemaElement::builder()
            .attribute_name("pk")
            .key_type(KeyType::Hash)
            .build()
            .map_err(MetadataError::storage)?;
        let sort = KeySchemaElement::builder()
            .attribute_name("sk")
            .key_type(KeyType::Range)
            .build()
            .map_err(MetadataError::storage)?;
        let partition_attr = AttributeDefinition::builder()
            .attribute_name("pk")
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(MetadataError::storage)?;
        let sort_attr = AttributeDefinition::builder()
            .attribute_name("sk")
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(MetadataError::storage)?;

        self.client
            .create_table()
            .table_name(table)
            .key_schema(partition)
            .key_schema(sort)
            .attribute_definitions(partition_attr)
            .attribute_definitions(sort_attr)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .map_err(MetadataError::storage)?;
        Ok(())
    }

    async fn get_item(
        &self,
        table: String,
        pk: String,
        sk: String,
    ) -> Result<Option<HashMap<String, AttributeValue>>, MetadataError> {
        let output = timeout(
            CALL_TIMEOUT,
            self.client
                .get_item()
                .table_name(table)
                .key("pk", AttributeValue::S(pk))
                .key("sk", AttributeValue::S(sk))
                .send(),
        )
        .await
        .map_err(MetadataError::storage)?
        .map_err(MetadataError::storage)?;
        Ok(output.item)
    }

    async fn delete_item(&self, table: String, pk: String, sk: String) -> Result<(), MetadataError> {
        timeout(
            CALL_TIMEOUT,
            self.client
                .delete_item()
                .table_name(table)
                .key("pk", AttributeValue::S(pk))
                .key("sk", AttributeValue::S(sk))
                .send(),
        )
        .await
        .map_err(MetadataError::storage)?
        .map_err(MetadataError::storage)?;
        Ok(())
    }
}

fn repository_pk(repository: &str) -> String {
    format!("REPO#{repository}")
}

fn tag_sk(tag: &str) -> String {
    format!("TAG#{tag}")
}

fn reference_sk(digest: &Digest) -> String {
    format!("REF#{digest}")
}

fn blob_sk(digest: &Digest) -> String {
    format!("BLOB#{digest}")
}

#[async_trait::async_trait]
impl MetadataDriver for DynamoMetadata {
    fn name(&self) -> &'static str {
        "document-store"
    }

    async fn save_tag(
        &self,
        repository: &str,
        digest: &Digest,
        tag: &str,
    ) -> Result<(), MetadataError> {
        timeout(
            CALL_TIMEOUT,
            self.client
                .put_item()
                .table_name(self.table(TAGS_TABLE))
                .item("pk", AttributeValue::S(repository_pk(repository)))
                .item("sk", AttributeValue::S(tag_sk(tag)))
                .item("digest", AttributeValue::S(digest.to_string()))
                .send(),
        )
        .await
        .map_err(MetadataError::storage)?
        .map_err(MetadataError::storage)?;
        Ok(())
    }

    async fn read_tag(&self, repository: &str, tag: &str) -> Result<Digest, MetadataError> {
        let item = self
            .get_item(
                self.table(TAGS_TABLE),
                repository_pk(repository),
                tag_sk(tag),
            )
            .await?
            .ok_or(MetadataError::NotFound)?;

        let value = item
            .get("digest")
            .and_then(|value| value.as_s().ok())
            .ok_or_else(|| MetadataError::storage("tag item missing digest attribute"))?;
        Digest::parse(value).map_err(MetadataError::storage)
    }

    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<(), MetadataError> {
        // Read first so a missing tag is reported as such.
        self.read_tag(repository, tag).await?;
        self.delete_item(
            self.table(TAGS_TABLE),
            repository_pk(repository),
            tag_sk(tag),
        )
        .await
    }

    async fn list_tags(
        &self,
        repository: &str,
        limit: Option<usize>,
        after: Option<&str>,
    ) -> Result<Vec<String>, MetadataError> {
        let output = timeout(
            CALL_TIMEOUT,
            self.client
                .query()
                .table_name(self.table(TAGS_TABLE))
                .key_condition_expression("pk = :pk AND begins_with(sk, :prefix)")
                .expression_attribute_values(
                    ":pk",
                    AttributeValue::S(repository_pk(repository)),
                )
                .expression_attribute_values(":prefix", AttributeValue::S("TAG#".to_string()))
                .send(),
        )
        .await
        .map_err(MetadataError::storage)?
        .map_err(MetadataError::storage)?;

        let mut tags: Vec<String> = output
            .items()
            .iter()
            .filter_map(|item| item.get("sk").and_then(|value| value.as_s().ok()))
            .filter_map(|sk| sk.strip_prefix("TAG#").map(str::to_string))
            .collect();
        tags.sort();

        Ok(page_tags(tags, limit, after))
    }

    async fn add_reference(
        &self,
        repository: &str,
        subject: &Digest,
        descriptor: Descriptor,
    ) -> Result<(), MetadataError> {
        let mut list = match self.references(repository, subject, None).await {
            Ok(list) => list,
            Err(MetadataError::NotFound) => Vec::new(),
            Err(err) => return Err(err),
        };
        list.push(descriptor);

        let encoded = serde_json::to_string(&list).map_err(MetadataError::storage)?;
        timeout(
            CALL_TIMEOUT,
            self.client
                .put_item()
                .table_name(self.table(REFERENCES_TABLE))
                .item("pk", AttributeValue::S(repository_pk(repository)))
                .item("sk", AttributeValue::S(reference_sk(subject)))
                .item("descriptors", AttributeValue::S(encoded))
                .send(),
        )
        .await
        .map_err(MetadataError::storage)?
        .map_err(MetadataError::storage)?;
        Ok(())
    }

    async fn references(
        &self,
        repository: &str,
        subject: &Digest,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Descriptor>, MetadataError> {
        let item = self
            .get_item(
                self.table(REFERENCES_TABLE),
                repository_pk(repository),
                reference_sk(subject),
            )
            .await?
            .ok_or(MetadataError::NotFound)?;

        let encoded = item
            .get("descriptors")
            .and_then(|value| value.as_s().ok())
            .ok_or_else(|| MetadataError::storage("reference item missing descriptors attribute"))?;
        let list: Vec<Descriptor> =
            serde_json::from_str(encoded).map_err(MetadataError::storage)?;

        Ok(match artifact_type {
            Some(filter) => list
                .into_iter()
                .filter(|descriptor| descriptor.artifact_type.as_deref() == Some(filter))
                .collect(),
            None => list,
        })
    }

    async fn add_blob(&self, repository: &str, digest: &Digest) -> Result<(), MetadataError> {
        timeout(
            CALL_TIMEOUT,
            self.client
                .put_item()
                .table_name(self.table(BLOBS_TABLE))
                .item("pk", AttributeValue::S(repository_pk(repository)))
                .item("sk", AttributeValue::S(blob_sk(digest)))
                .send(),
        )
        .await
        .map_err(MetadataError::storage)?
        .map_err(MetadataError::storage)?;
        Ok(())
    }

    async fn delete_blob(&self, repository: &str, digest: &Digest) -> Result<(), MetadataError> {
        let existing = self
            .get_item(
                self.table(BLOBS_TABLE),
                repository_pk(repository),
                blob_sk(digest),
            )
            .await?;
        if existing.is_none() {
            return Err(MetadataError::NotFound);
        }

        self.delete_item(
            self.table(BLOBS_TABLE),
            repository_pk(repository),
            blob_sk(digest),
        )
        .await
    }

    async fn blob_exists(&self, repository: &str, digest: &Digest) -> Result<bool, MetadataError> {
        let item = self
            .get_item(
                self.table(BLOBS_TABLE),
                repository_pk(repository),
                blob_sk(digest),
            )
            .await?;
        Ok(item.is_some())
    }

    async fn link_blob(&self, repository: &str, digest: &Digest) -> Result<(), MetadataError> {
        self.add_blob(repository, digest).await
    }
}
