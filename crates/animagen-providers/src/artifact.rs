//! Artifact download and checksum helpers.
//!
//! Hashing and file writes are CPU/disk work and run on the blocking pool so
//! they never stall the dispatch loops.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// A downloaded generation artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArtifact {
    pub path: PathBuf,
    pub checksum: String,
    pub bytes: u64,
}

/// Blake3 checksum of a local file.
pub async fn checksum_file(path: &Path) -> ProviderResult<String> {
    let path = path.to_owned();
    let hash = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let bytes = std::fs::read(&path)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    })
    .await
    .map_err(|e| ProviderError::Internal(format!("checksum task failed: {e}")))??;
    Ok(hash)
}

/// Download `url` to `dest`, returning the written path with its checksum.
pub async fn download(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> ProviderResult<DownloadedArtifact> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(ProviderError::Http {
            status: resp.status().as_u16(),
            message: format!("download of {url} failed"),
        });
    }
    let body = resp.bytes().await?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let dest = dest.to_owned();
    let artifact = tokio::task::spawn_blocking(move || -> std::io::Result<DownloadedArtifact> {
        let checksum = blake3::hash(&body).to_hex().to_string();
        std::fs::write(&dest, &body)?;
        Ok(DownloadedArtifact {
            path: dest,
            checksum,
            bytes: body.len() as u64,
        })
    })
    .await
    .map_err(|e| ProviderError::Internal(format!("write task failed: {e}")))??;

    debug!(path = %artifact.path.display(), bytes = artifact.bytes, "artifact downloaded");
    Ok(artifact)
}
