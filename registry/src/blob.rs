//! Blob serving for the registry

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio_util::io::ReaderStream;

use metadata_store::MetadataError;
use oci_digest::Digest;

use crate::api::{validate_repository, RegistryState, DOCKER_CONTENT_DIGEST};
use crate::error::{RegistryError, RegistryResult};

/// Router for blob operations
pub(crate) fn router() -> Router<RegistryState> {
    Router::new().route(
        "/v2/:name/blobs/:digest",
        get(get_blob).head(head_blob).delete(delete_blob),
    )
}

/// Stream a blob, scoped to the repository's association set
async fn get_blob(
    State(state): State<RegistryState>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<Response> {
    validate_repository(&name)?;
    let digest = Digest::parse(&digest)?;

    if !state.metadata.blob_exists(&name, &digest).await? {
        return Err(RegistryError::BlobNotFound(digest.to_string()));
    }
    if !state.blobs.exists(&digest).await? {
        return Err(RegistryError::BlobNotFound(digest.to_string()));
    }

    // Stream through the digest-verifying read without buffering the blob.
    // A verification failure after the status line can only truncate the
    // body.
    let (mut writer, reader) = tokio::io::duplex(64 * 1024);
    let blobs = state.blobs.clone();
    let target = digest.clone();
    tokio::spawn(async move {
        if let Err(error) = blobs.read_blob_to(&target, &mut writer).await {
            tracing::error!(digest = %target, %error, "streaming blob failed");
        }
    });

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response())
}

/// Check if a blob exists in the repository
async fn head_blob(
    State(state): State<RegistryState>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<Response> {
    validate_repository(&name)?;
    let digest = Digest::parse(&digest)?;

    if !state.metadata.blob_exists(&name, &digest).await?
        || !state.blobs.exists(&digest).await?
    {
        return Err(RegistryError::BlobNotFound(digest.to_string()));
    }

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
    )
        .into_response())
}

/// Drop the repository's association with a blob
///
/// The stored bytes stay behind: other repositories may still expose the
/// blob, and orphan collection is an offline concern.
async fn delete_blob(
    State(state): State<RegistryState>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<StatusCode> {
    validate_repository(&name)?;
    let digest = Digest::parse(&digest)?;

    state
        .metadata
        .delete_blob(&name, &digest)
        .await
        .map_err(|err| match err {
            MetadataError::NotFound => RegistryError::BlobNotFound(digest.to_string()),
            other => other.into(),
        })?;

    Ok(StatusCode::ACCEPTED)
}
