use std::error::Error as StdError;

/// Errors surfaced by blob storage backends.
///
/// Backends collapse every failure into these kinds; nothing
/// backend-specific crosses the [`BlobDriver`](crate::BlobDriver)
/// boundary.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// The blob or upload session does not exist.
    #[error("blob storage: not found")]
    NotFound,

    /// Stored or uploaded bytes do not hash to the expected digest.
    #[error("blob storage: digest not verified")]
    NotVerified,

    /// Append offset or length inconsistency.
    #[error("blob storage: invalid range")]
    InvalidRange,

    /// Any lower-level I/O failure.
    #[error("blob storage failure: {0}")]
    Storage(#[source] Box<dyn StdError + Send + Sync>),
}

impl BlobError {
    /// Wrap a backend failure as a generic storage error.
    pub fn storage<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        BlobError::Storage(error.into())
    }
}
