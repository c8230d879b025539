//! Error types for the registry API

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use blob_store::BlobError;
use metadata_store::MetadataError;
use oci_digest::DigestError;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations.
///
/// Each variant maps to exactly one HTTP status and one OCI error code;
/// the taxonomy is flat at the HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Blob not found in this repository
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Manifest not found
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    /// Tag not found
    #[error("tag not found: {0}")]
    TagNotFound(String),

    /// Upload session not found
    #[error("upload session not found: {0}")]
    UploadNotFound(String),

    /// Generic missing resource
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid digest format
    #[error("invalid digest: {0}")]
    InvalidDigest(#[from] DigestError),

    /// Body is not a well-formed manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Manifest references a blob the repository does not expose
    #[error("unknown blob: {0}")]
    UnknownBlob(String),

    /// Uploaded bytes do not hash to the expected digest
    #[error("uploaded bytes do not match the expected digest")]
    NotVerified,

    /// Upload offset or length inconsistency
    #[error("range not satisfiable")]
    InvalidRange,

    /// Malformed upload request
    #[error("blob upload invalid: {0}")]
    UploadInvalid(String),

    /// Invalid repository name
    #[error("invalid repository name: {0}")]
    InvalidRepository(String),

    /// Backend storage failure
    #[error("storage failure: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RegistryError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::BlobNotFound(_)
            | RegistryError::ManifestNotFound(_)
            | RegistryError::TagNotFound(_)
            | RegistryError::UploadNotFound(_)
            | RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::InvalidDigest(_)
            | RegistryError::InvalidManifest(_)
            | RegistryError::UnknownBlob(_)
            | RegistryError::NotVerified
            | RegistryError::UploadInvalid(_)
            | RegistryError::InvalidRepository(_) => StatusCode::BAD_REQUEST,
            RegistryError::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for OCI error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::BlobNotFound(_) | RegistryError::UnknownBlob(_) => "BLOB_UNKNOWN",
            RegistryError::ManifestNotFound(_) | RegistryError::TagNotFound(_) => {
                "MANIFEST_UNKNOWN"
            }
            RegistryError::UploadNotFound(_) => "BLOB_UPLOAD_UNKNOWN",
            RegistryError::NotFound(_) => "NAME_UNKNOWN",
            RegistryError::InvalidDigest(_) | RegistryError::NotVerified => "DIGEST_INVALID",
            RegistryError::InvalidManifest(_) => "MANIFEST_INVALID",
            RegistryError::InvalidRange | RegistryError::UploadInvalid(_) => "BLOB_UPLOAD_INVALID",
            RegistryError::InvalidRepository(_) => "NAME_INVALID",
            RegistryError::Storage(_) => "UNKNOWN",
        }
    }
}

impl From<BlobError> for RegistryError {
    fn from(error: BlobError) -> Self {
        match error {
            BlobError::NotFound => RegistryError::NotFound("blob".to_string()),
            BlobError::NotVerified => RegistryError::NotVerified,
            BlobError::InvalidRange => RegistryError::InvalidRange,
            BlobError::Storage(source) => RegistryError::Storage(source),
        }
    }
}

impl From<MetadataError> for RegistryError {
    fn from(error: MetadataError) -> Self {
        match error {
            MetadataError::NotFound => RegistryError::NotFound("metadata entry".to_string()),
            MetadataError::Storage(source) => RegistryError::Storage(source),
        }
    }
}

/// OCI error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            errors: vec![ErrorDetail {
                code,
                message: self.to_string(),
            }],
        };

        (status, axum::Json(body)).into_response()
    }
}
