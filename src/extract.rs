use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::FetchError;

/// A downloaded archive and the directory it unpacks into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveBundle {
    pub archive_path: PathBuf,
    pub extraction_dir: PathBuf,
}

impl ArchiveBundle {
    pub fn new(archive_path: &Path, extraction_dir: &Path) -> Self {
        Self {
            archive_path: archive_path.to_path_buf(),
            extraction_dir: extraction_dir.to_path_buf(),
        }
    }

    pub async fn unpack(self) -> bool {
        unpack(&self.archive_path, &self.extraction_dir).await
    }
}

/// Extract a gzip'd tar into `destination_dir`, creating it if needed.
pub fn unpack_archive(archive_path: &Path, destination_dir: &Path) -> Result<(), FetchError> {
    let extraction_error = |message: String| FetchError::Extraction {
        archive: archive_path.to_path_buf(),
        message,
    };

    fs::create_dir_all(destination_dir)?;
    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive
        .unpack(destination_dir)
        .map_err(|e| extraction_error(e.to_string()))?;
    Ok(())
}

/// Unpack the archive, then delete it. Returns `false` on any failure, in which case
/// the archive is kept and the partly filled destination is removed.
pub async fn unpack(archive_path: &Path, destination_dir: &Path) -> bool {
    if !archive_path.exists() {
        warn!(archive = %archive_path.display(), "Archive to unpack does not exist");
        return false;
    }

    let archive = archive_path.to_path_buf();
    let destination = destination_dir.to_path_buf();
    let result =
        tokio::task::spawn_blocking(move || unpack_archive(&archive, &destination)).await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => Err(FetchError::Extraction {
            archive: archive_path.to_path_buf(),
            message: e.to_string(),
        }),
    };

    match outcome {
        Ok(()) => {
            if let Err(e) = tokio::fs::remove_file(archive_path).await {
                warn!(archive = %archive_path.display(), error = %e, "Unable to remove unpacked archive");
            }
            info!(
                archive = %archive_path.display(),
                destination = %destination_dir.display(),
                "Unpacked archive"
            );
            true
        }
        Err(e) => {
            warn!(error = %e, "Extraction failed");
            if destination_dir.exists() {
                if let Err(e) = tokio::fs::remove_dir_all(destination_dir).await {
                    warn!(
                        path = %destination_dir.display(),
                        error = %e,
                        "Unable to remove partly extracted directory, it will be taken as unpacked"
                    );
                }
            }
            false
        }
    }
}
