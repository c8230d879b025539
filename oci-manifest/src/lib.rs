//! Manifest and descriptor wire types.
//!
//! These mirror the OCI image-spec JSON shapes the distribution API accepts
//! and serves: image manifests (`config` + `layers`), image indexes
//! (`manifests`), and the `subject`/`artifactType` fields that drive the
//! referrers index.

use std::collections::BTreeMap;

use oci_digest::Digest;
use serde::{Deserialize, Serialize};

/// Media type of an OCI image index, also used for referrers responses.
pub const MEDIA_TYPE_OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Media type of an OCI image manifest.
pub const MEDIA_TYPE_OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// A descriptor names and references a blob without embedding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
}

/// A manifest document: an image manifest or an image index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: i32,

    #[serde(default)]
    pub media_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    // Image manifest fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Descriptor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub layers: Option<Vec<Descriptor>>,

    // Image index field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifests: Option<Vec<Descriptor>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_image_manifest() {
        let payload = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_IMAGE_MANIFEST,
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
                "size": 0
            },
            "layers": [
                {
                    "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                    "digest": "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
                    "size": 11
                }
            ],
            "annotations": { "org.opencontainers.image.created": "2024-01-01T00:00:00Z" }
        });

        let manifest: Manifest = serde_json::from_value(payload).unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.media_type, MEDIA_TYPE_OCI_IMAGE_MANIFEST);
        assert!(manifest.config.is_some());
        assert_eq!(manifest.layers.as_ref().unwrap().len(), 1);
        assert!(manifest.manifests.is_none());
        assert!(manifest.subject.is_none());
    }

    #[test]
    fn decode_image_index_with_subject() {
        let payload = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_IMAGE_INDEX,
            "manifests": [],
            "subject": {
                "mediaType": MEDIA_TYPE_OCI_IMAGE_MANIFEST,
                "digest": "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
                "size": 2
            }
        });

        let manifest: Manifest = serde_json::from_value(payload).unwrap();
        assert!(manifest.manifests.as_ref().unwrap().is_empty());
        assert!(manifest.subject.is_some());
    }

    #[test]
    fn descriptor_omits_absent_optionals() {
        let descriptor = Descriptor {
            media_type: MEDIA_TYPE_OCI_IMAGE_MANIFEST.to_string(),
            digest: oci_digest::Digest::from_bytes(b"manifest"),
            size: 8,
            urls: None,
            annotations: None,
            data: None,
            artifact_type: None,
        };

        let json = serde_json::to_value(&descriptor).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert!(object.contains_key("mediaType"));
        assert!(object.contains_key("digest"));
        assert!(object.contains_key("size"));
    }

    #[test]
    fn manifest_rejects_malformed_descriptor_digest() {
        let payload = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_IMAGE_MANIFEST,
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": "sha256:nope",
                "size": 4
            },
            "layers": []
        });

        assert!(serde_json::from_value::<Manifest>(payload).is_err());
    }
}
