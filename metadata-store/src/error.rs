use std::error::Error as StdError;

/// Errors surfaced by metadata backends.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// The tag, reference list, or association does not exist.
    #[error("metadata: not found")]
    NotFound,

    /// Any lower-level storage failure.
    #[error("metadata storage failure: {0}")]
    Storage(#[source] Box<dyn StdError + Send + Sync>),
}

impl MetadataError {
    /// Wrap a backend failure as a generic storage error.
    pub fn storage<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        MetadataError::Storage(error.into())
    }
}
