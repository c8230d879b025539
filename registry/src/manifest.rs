//! Manifest operations and the referrer index

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;

use blob_store::BlobError;
use metadata_store::MetadataError;
use oci_digest::Digest;
use oci_manifest::{Descriptor, Manifest, MEDIA_TYPE_OCI_IMAGE_INDEX};

use crate::api::{
    validate_repository, RegistryState, DOCKER_CONTENT_DIGEST, OCI_FILTERS_APPLIED, OCI_SUBJECT,
};
use crate::error::{RegistryError, RegistryResult};

/// Router for manifest operations
pub(crate) fn router(max_manifest_bytes: usize) -> Router<RegistryState> {
    Router::new()
        .route(
            "/v2/:name/manifests/:reference",
            get(get_manifest)
                .head(head_manifest)
                .put(put_manifest)
                .delete(delete_manifest),
        )
        .layer(DefaultBodyLimit::max(max_manifest_bytes))
        .route("/v2/:name/referrers/:digest", get(get_referrers))
}

/// Store a manifest under a tag or digest reference
async fn put_manifest(
    State(state): State<RegistryState>,
    Path((name, reference)): Path<(String, String)>,
    payload: Bytes,
) -> RegistryResult<Response> {
    validate_repository(&name)?;

    let manifest: Manifest = serde_json::from_slice(&payload)
        .map_err(|err| RegistryError::InvalidManifest(err.to_string()))?;

    // Every blob a config+layers manifest names must already belong to
    // this repository. Image indexes (`manifests`) skip the check.
    if let (Some(config), Some(layers)) = (&manifest.config, &manifest.layers) {
        for descriptor in layers.iter().chain([config]) {
            if !state
                .metadata
                .blob_exists(&name, &descriptor.digest)
                .await?
            {
                return Err(RegistryError::UnknownBlob(descriptor.digest.to_string()));
            }
        }
    }

    // The manifest is itself a blob of the repository.
    let digest = Digest::from_bytes(&payload);
    state.blobs.save_blob(&digest, &payload).await?;
    state.metadata.add_blob(&name, &digest).await?;

    if Digest::parse(&reference).is_err() {
        state.metadata.save_tag(&name, &digest, &reference).await?;
    }

    let mut headers = vec![
        (
            header::LOCATION,
            format!("/v2/{name}/manifests/{digest}/"),
        ),
        (DOCKER_CONTENT_DIGEST, digest.to_string()),
    ];

    if let Some(subject) = &manifest.subject {
        // Referrer edges carry the child's artifact type, falling back to
        // its config media type, else empty.
        let artifact_type = manifest
            .artifact_type
            .clone()
            .or_else(|| manifest.config.as_ref().map(|c| c.media_type.clone()))
            .unwrap_or_default();

        let descriptor = Descriptor {
            media_type: manifest.media_type.clone(),
            digest: digest.clone(),
            size: payload.len() as u64,
            urls: None,
            annotations: manifest.annotations.clone(),
            data: None,
            artifact_type: Some(artifact_type),
        };

        state
            .metadata
            .add_reference(&name, &subject.digest, descriptor)
            .await?;
        headers.push((OCI_SUBJECT, subject.digest.to_string()));
    }

    Ok((StatusCode::CREATED, AppendHeaders(headers)).into_response())
}

/// Fetch a manifest by tag or digest
async fn get_manifest(
    State(state): State<RegistryState>,
    Path((name, reference)): Path<(String, String)>,
) -> RegistryResult<Response> {
    validate_repository(&name)?;

    let (digest, payload, manifest) = load_manifest(&state, &name, &reference).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, manifest.media_type),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
        payload,
    )
        .into_response())
}

/// Check a manifest without transferring it
async fn head_manifest(
    State(state): State<RegistryState>,
    Path((name, reference)): Path<(String, String)>,
) -> RegistryResult<Response> {
    validate_repository(&name)?;

    let (digest, payload, manifest) = load_manifest(&state, &name, &reference).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, manifest.media_type),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
            (header::CONTENT_LENGTH, payload.len().to_string()),
        ],
    )
        .into_response())
}

/// Resolve a reference, enforce repository scoping, and read the stored
/// payload
async fn load_manifest(
    state: &RegistryState,
    name: &str,
    reference: &str,
) -> Result<(Digest, Vec<u8>, Manifest), RegistryError> {
    let missing = || RegistryError::ManifestNotFound(format!("{name}/{reference}"));

    let digest = match Digest::parse(reference) {
        Ok(digest) => digest,
        Err(_) => state
            .metadata
            .read_tag(name, reference)
            .await
            .map_err(|err| match err {
                MetadataError::NotFound => missing(),
                other => other.into(),
            })?,
    };

    if !state.metadata.blob_exists(name, &digest).await? {
        return Err(missing());
    }

    let payload = state
        .blobs
        .read_blob(&digest)
        .await
        .map_err(|err| match err {
            BlobError::NotFound => missing(),
            other => other.into(),
        })?;

    // Parsed only to learn the media type; the stored bytes are returned
    // verbatim.
    let manifest: Manifest = serde_json::from_slice(&payload)
        .map_err(|err| RegistryError::Storage(Box::new(err)))?;

    Ok((digest, payload, manifest))
}

/// Delete a tag, or a repository's association with a manifest digest
async fn delete_manifest(
    State(state): State<RegistryState>,
    Path((name, reference)): Path<(String, String)>,
) -> RegistryResult<StatusCode> {
    validate_repository(&name)?;

    if let Ok(digest) = Digest::parse(&reference) {
        // Only the association goes; the blob may back other repositories.
        state
            .metadata
            .delete_blob(&name, &digest)
            .await
            .map_err(|err| match err {
                MetadataError::NotFound => {
                    RegistryError::ManifestNotFound(format!("{name}/{reference}"))
                }
                other => other.into(),
            })?;
    } else {
        state
            .metadata
            .delete_tag(&name, &reference)
            .await
            .map_err(|err| match err {
                MetadataError::NotFound => RegistryError::TagNotFound(reference.clone()),
                other => other.into(),
            })?;
    }

    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
struct ReferrersQuery {
    #[serde(rename = "artifactType")]
    artifact_type: Option<String>,
}

/// List the manifests that declare a subject, as an image index
async fn get_referrers(
    State(state): State<RegistryState>,
    Path((name, digest)): Path<(String, String)>,
    Query(query): Query<ReferrersQuery>,
) -> RegistryResult<Response> {
    validate_repository(&name)?;
    let digest = Digest::parse(&digest)?;

    let descriptors = match state
        .metadata
        .references(&name, &digest, query.artifact_type.as_deref())
        .await
    {
        Ok(descriptors) => descriptors,
        Err(MetadataError::NotFound) => Vec::new(),
        Err(err) => return Err(err.into()),
    };

    let index = Manifest {
        schema_version: 2,
        media_type: MEDIA_TYPE_OCI_IMAGE_INDEX.to_string(),
        manifests: Some(descriptors),
        ..Manifest::default()
    };

    let mut response = (StatusCode::OK, Json(index)).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(MEDIA_TYPE_OCI_IMAGE_INDEX),
    );
    if query.artifact_type.is_some() {
        response
            .headers_mut()
            .insert(OCI_FILTERS_APPLIED, HeaderValue::from_static("artifactType"));
    }

    Ok(response)
}
