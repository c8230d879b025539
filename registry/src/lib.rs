//! # OCI Container Registry
//!
//! This crate implements an OCI-compliant container registry server
//! following the
//! [OCI Distribution Specification](https://github.com/opencontainers/distribution-spec).
//!
//! ## Features
//!
//! - Chunked, resumable blob uploads with streaming digest verification
//! - Manifest storage with tag, referrer, and repository-association
//!   indexes
//! - Cross-repository blob mounting
//! - Pluggable blob and metadata backends via the `blob-store` and
//!   `metadata-store` crates
//! - Builder pattern for configuration
//!
//! ## Example
//!
//! ```no_run
//! use registry::RegistryBuilder;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let blobs = blob_store::FilesystemBlobs::new("/var/lib/registry").await?;
//! let metadata = metadata_store::KvMetadata::open("/var/lib/registry/registry.db").await?;
//!
//! let registry = RegistryBuilder::new()
//!     .blobs(blobs.into())
//!     .metadata(metadata.into())
//!     .build();
//!
//! // Serve the registry with axum or any tower-compatible server
//! # Ok(())
//! # }
//! ```

mod api;
mod blob;
mod config;
mod error;
mod manifest;
mod tag;
mod upload;

pub use api::RegistryBuilder;
pub use config::{ConfigError, MetadataBackend, RegistryConfig, StorageBackend};
pub use error::{RegistryError, RegistryResult};
