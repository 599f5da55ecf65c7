//! Artifact storage
//!
//! Artifacts are opaque byte blobs at stable paths. Existence of the file is
//! the only record of "already computed". Writes go to a temporary file in
//! the destination directory and are renamed into place, so a reader never
//! observes a partial artifact and an empty artifact is a valid one.

use crate::error::{Result, ToolchainError};
use facebench_common::config::ensure_directory_exists;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

/// True when `path` holds a complete artifact
pub async fn exists(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    }
}

/// Read an artifact; a missing input is a data error
pub async fn read(path: &Path) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ToolchainError::Data(format!(
            "missing artifact {}",
            path.display()
        ))),
        Err(e) => Err(ToolchainError::Io(e)),
    }
}

/// Delete an artifact; an absent artifact is fine
pub async fn remove(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed artifact");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ToolchainError::Io(e)),
    }
}

/// Write an artifact atomically (temp file in the same directory + rename)
pub async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        ensure_directory_exists(&parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| ToolchainError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| ToolchainError::Transient(format!("write task failed: {}", e)))?
}

/// SHA-256 signature of an ordered list of training file ids
pub fn training_signature<'a, I>(ids: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Path of the signature written next to a trainer artifact
pub fn signature_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_os_string();
    name.push(".signature");
    PathBuf::from(name)
}
