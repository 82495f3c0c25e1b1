//! Bundle extraction
//!
//! The downloaded bundle is a gzip-compressed tar archive containing the
//! runnable artifacts for one version. Extraction is blocking work and runs
//! on the blocking pool.

use std::path::Path;

use flate2::read::GzDecoder;
use tracing::debug;

/// Errors raised while unpacking a bundle
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to unpack bundle: {0}")]
    Unpack(#[from] std::io::Error),

    #[error("extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Extract the gzipped tar bundle at `archive` into `dest`
pub async fn extract_bundle(archive: &Path, dest: &Path) -> Result<(), ExtractError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    debug!(archive = %archive.display(), dest = %dest.display(), "extracting bundle");

    tokio::task::spawn_blocking(move || -> Result<(), ExtractError> {
        let file = std::fs::File::open(&archive)?;
        let decoder = GzDecoder::new(file);
        let mut tarball = tar::Archive::new(decoder);
        tarball.unpack(&dest)?;
        Ok(())
    })
    .await?
}
