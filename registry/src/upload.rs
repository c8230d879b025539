//! Blob upload sessions and the chunked upload state machine

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::TryStreamExt;
use serde::Deserialize;
use tokio_util::io::StreamReader;
use uuid::Uuid;

use blob_store::BlobError;
use oci_digest::Digest;

use crate::api::{validate_repository, RegistryState, DOCKER_CONTENT_DIGEST, DOCKER_UPLOAD_UUID};
use crate::error::{RegistryError, RegistryResult};

/// Router for blob upload operations
pub(crate) fn router() -> Router<RegistryState> {
    Router::new()
        .route("/v2/:name/blobs/uploads/", post(start_upload))
        .route(
            "/v2/:name/blobs/uploads/:session",
            get(upload_status).patch(patch_upload).put(put_upload),
        )
}

#[derive(Debug, Deserialize)]
struct StartUploadQuery {
    digest: Option<String>,
    mount: Option<String>,
    from: Option<String>,
}

/// Start an upload session, complete a monolithic upload, or mount a blob
/// from another repository
async fn start_upload(
    State(state): State<RegistryState>,
    Path(name): Path<String>,
    Query(query): Query<StartUploadQuery>,
    body: Body,
) -> RegistryResult<Response> {
    validate_repository(&name)?;

    // Time-ordered ids keep the session directory naturally sorted by
    // creation.
    let session = Uuid::now_v7().to_string();

    if let Some(digest) = &query.digest {
        // Monolithic upload: the body is the complete blob.
        let digest = Digest::parse(digest)?;
        append_body(&state, &session, body).await?;
        commit(&state, &name, &session, &digest).await?;

        return Ok((
            StatusCode::CREATED,
            [
                (header::LOCATION, format!("/v2/{name}/blobs/{digest}")),
                (DOCKER_UPLOAD_UUID, session),
            ],
        )
            .into_response());
    }

    if let (Some(mount), Some(from)) = (&query.mount, &query.from) {
        let digest = Digest::parse(mount)?;

        // Only the metadata store knows whether the source repository
        // exposes the blob; the blob store holds one shared copy.
        if state.metadata.blob_exists(from, &digest).await? {
            match state.blobs.link(from, &name, &digest).await {
                Ok(()) => {
                    state.metadata.link_blob(&name, &digest).await?;
                    return Ok((
                        StatusCode::CREATED,
                        [
                            (header::LOCATION, format!("/v2/{name}/blobs/{digest}")),
                            (DOCKER_UPLOAD_UUID, session),
                        ],
                    )
                        .into_response());
                }
                Err(BlobError::NotFound) => {}
                Err(err) => return Err(err.into()),
            }
        }

        // The source does not expose the blob: fall back to a regular
        // upload session.
        return Ok((
            StatusCode::ACCEPTED,
            [
                (header::LOCATION, upload_location(&name, &session)),
                (DOCKER_UPLOAD_UUID, session),
            ],
        )
            .into_response());
    }

    Ok((
        StatusCode::ACCEPTED,
        [
            (header::LOCATION, upload_location(&name, &session)),
            (DOCKER_UPLOAD_UUID, session),
        ],
    )
        .into_response())
}

/// Report the current size of an upload session
async fn upload_status(
    State(state): State<RegistryState>,
    Path((name, session)): Path<(String, String)>,
) -> RegistryResult<Response> {
    validate_repository(&name)?;

    let size = match state.blobs.upload_size(&session).await {
        Ok(size) => size,
        Err(BlobError::NotFound) => 0,
        Err(err) => return Err(err.into()),
    };

    Ok((
        StatusCode::NO_CONTENT,
        [
            (header::RANGE, range_header(size)),
            (header::LOCATION, upload_location(&name, &session)),
        ],
    )
        .into_response())
}

/// Append a chunk to an upload session
///
/// With both `Content-Range` and `Content-Length` present the chunk must
/// describe itself consistently and start exactly at the session's current
/// size; without `Content-Range` the append is unconditional (streaming
/// push).
async fn patch_upload(
    State(state): State<RegistryState>,
    Path((name, session)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> RegistryResult<Response> {
    validate_repository(&name)?;

    let content_range = headers.get(header::CONTENT_RANGE);
    let content_length = headers.get(header::CONTENT_LENGTH);
    if let (Some(range), Some(length)) = (content_range, content_length) {
        let range = range
            .to_str()
            .map_err(|_| RegistryError::UploadInvalid("unreadable Content-Range".to_string()))?;
        let (start, end) = parse_content_range(range)?;
        if start > end {
            return Err(RegistryError::InvalidRange);
        }

        let length: u64 = length
            .to_str()
            .ok()
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| {
                RegistryError::UploadInvalid("unreadable Content-Length".to_string())
            })?;
        if length != end - start + 1 {
            return Err(RegistryError::InvalidRange);
        }

        let current = match state.blobs.upload_size(&session).await {
            Ok(size) => size,
            Err(BlobError::NotFound) => 0,
            Err(err) => return Err(err.into()),
        };
        if current != start {
            return Err(RegistryError::InvalidRange);
        }
    }

    let size = append_body(&state, &session, body).await?;

    Ok((
        StatusCode::ACCEPTED,
        [
            (header::LOCATION, upload_location(&name, &session)),
            (header::RANGE, range_header(size)),
        ],
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct FinishUploadQuery {
    digest: Option<String>,
}

/// Finalize an upload session, verifying against the client's digest
async fn put_upload(
    State(state): State<RegistryState>,
    Path((name, session)): Path<(String, String)>,
    Query(query): Query<FinishUploadQuery>,
    body: Body,
) -> RegistryResult<Response> {
    validate_repository(&name)?;

    let digest = query.digest.ok_or_else(|| {
        RegistryError::UploadInvalid("digest query parameter is required".to_string())
    })?;
    let digest = Digest::parse(&digest)?;

    // Clients may send the final chunk with the PUT.
    append_body(&state, &session, body).await?;
    commit(&state, &name, &session, &digest).await?;

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, format!("/v2/{name}/blobs/{digest}")),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
    )
        .into_response())
}

/// Append the request body to the session
async fn append_body(
    state: &RegistryState,
    session: &str,
    body: Body,
) -> Result<u64, RegistryError> {
    let stream = body
        .into_data_stream()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err));
    let mut reader = StreamReader::new(stream);
    Ok(state.blobs.append_upload(session, &mut reader).await?)
}

/// Commit the session and record the repository association
async fn commit(
    state: &RegistryState,
    name: &str,
    session: &str,
    digest: &Digest,
) -> Result<(), RegistryError> {
    state
        .blobs
        .commit_upload(name, session, digest)
        .await
        .map_err(|err| match err {
            BlobError::NotFound => RegistryError::UploadNotFound(session.to_string()),
            other => other.into(),
        })?;
    state.metadata.add_blob(name, digest).await?;
    Ok(())
}

fn upload_location(name: &str, session: &str) -> String {
    format!("/v2/{name}/blobs/uploads/{session}")
}

/// `Range: 0-<size-1>`; a zero-size session reports the literal `0--1`
/// that clients of this wire format expect.
fn range_header(size: u64) -> String {
    format!("0-{}", size as i64 - 1)
}

/// Parse `Content-Range: <start>-<end>` (no unit prefix, per the
/// distribution spec's chunked upload protocol)
fn parse_content_range(value: &str) -> Result<(u64, u64), RegistryError> {
    let (start, end) = value.split_once('-').ok_or_else(|| {
        RegistryError::UploadInvalid(format!("malformed Content-Range: {value}"))
    })?;
    let start = start.trim().parse().map_err(|_| {
        RegistryError::UploadInvalid(format!("malformed Content-Range start: {value}"))
    })?;
    let end = end.trim().parse().map_err(|_| {
        RegistryError::UploadInvalid(format!("malformed Content-Range end: {value}"))
    })?;
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_parsing() {
        assert_eq!(parse_content_range("0-4").unwrap(), (0, 4));
        assert_eq!(parse_content_range("5-10").unwrap(), (5, 10));
        assert!(parse_content_range("5").is_err());
        assert!(parse_content_range("a-b").is_err());
        assert!(parse_content_range("-5").is_err());
    }

    #[test]
    fn range_header_formatting() {
        assert_eq!(range_header(0), "0--1");
        assert_eq!(range_header(5), "0-4");
        assert_eq!(range_header(11), "0-10");
    }
}
