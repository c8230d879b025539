//! Tag listing and deletion

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Deserialize;

use metadata_store::MetadataError;

use crate::api::{validate_repository, RegistryState};
use crate::error::{RegistryError, RegistryResult};

/// Router for tag operations
pub(crate) fn router() -> Router<RegistryState> {
    Router::new()
        .route("/v2/:name/tags/list", get(list_tags))
        .route("/v2/:name/tags/:tag", delete(delete_tag))
}

#[derive(Debug, Deserialize)]
struct TagListQuery {
    n: Option<i64>,
    last: Option<String>,
}

/// Tag list response
#[derive(Debug, serde::Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

/// List tags for a repository, paginated by `n` and `last`
async fn list_tags(
    State(state): State<RegistryState>,
    Path(name): Path<String>,
    Query(query): Query<TagListQuery>,
) -> RegistryResult<Json<TagList>> {
    validate_repository(&name)?;

    // n <= 0 (or absent) means no cap.
    let limit = query
        .n
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0);

    let tags = state
        .metadata
        .list_tags(&name, limit, query.last.as_deref())
        .await?;

    Ok(Json(TagList { name, tags }))
}

/// Remove a tag from a repository
async fn delete_tag(
    State(state): State<RegistryState>,
    Path((name, tag)): Path<(String, String)>,
) -> RegistryResult<StatusCode> {
    validate_repository(&name)?;

    state
        .metadata
        .delete_tag(&name, &tag)
        .await
        .map_err(|err| match err {
            MetadataError::NotFound => RegistryError::TagNotFound(tag.clone()),
            other => other.into(),
        })?;

    Ok(StatusCode::ACCEPTED)
}
