//! Basic registry server example
//!
//! Run with: cargo run -p registry --example basic_server
//!
//! `STORAGE_PATH` roots the filesystem blob store and the embedded
//! metadata database (default: `./registry-data`).

use camino::Utf8PathBuf;

use blob_store::FilesystemBlobs;
use metadata_store::KvMetadata;
use registry::RegistryBuilder;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let root = Utf8PathBuf::from(
        std::env::var("STORAGE_PATH").unwrap_or_else(|_| "./registry-data".to_string()),
    );

    let blobs = FilesystemBlobs::new(root.clone()).await?;
    let metadata = KvMetadata::open(root.join("registry.db")).await?;

    let app = RegistryBuilder::new()
        .blobs(blobs.into())
        .metadata(metadata.into())
        .build();

    let addr = "0.0.0.0:8080";
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("registry listening on http://{addr}");
    tracing::info!("try: curl http://{addr}/v2/");

    axum::serve(listener, app).await?;

    Ok(())
}
