//! Submission backends
//!
//! A backend accepts one [`JobRequest`] at a time and answers with the id
//! later requests use to depend on it.

use crate::error::{Result, ToolchainError};
use chrono::{DateTime, Utc};
use facebench_common::config::ensure_directory_exists;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Scheduler-assigned job id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One job (or array job) to submit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,
    /// Full command line the task runs
    pub command: Vec<String>,
    /// Number of array tasks; `None` for a single task
    pub array_size: Option<usize>,
    pub queue: String,
    pub memory: Option<String>,
    pub dependencies: Vec<JobId>,
}

pub trait SubmissionBackend {
    fn submit(&mut self, request: &JobRequest) -> Result<JobId>;
}

/// Records requests without submitting anything
#[derive(Debug, Default)]
pub struct DryRunBackend {
    pub submitted: Vec<(JobId, JobRequest)>,
}

impl DryRunBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubmissionBackend for DryRunBackend {
    fn submit(&mut self, request: &JobRequest) -> Result<JobId> {
        let id = JobId(format!("dry-{}", self.submitted.len() + 1));
        tracing::info!(
            job = %request.name,
            id = %id,
            array_size = ?request.array_size,
            dependencies = ?request.dependencies,
            "Dry-run submission"
        );
        self.submitted.push((id.clone(), request.clone()));
        Ok(id)
    }
}

/// Manifest entry for one submitted job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: JobId,
    pub submitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub request: JobRequest,
}

/// Appends requests to a JSON manifest an external scheduler consumes
///
/// The manifest is rewritten atomically after every submission, so a
/// reader never sees a truncated file.
pub struct ManifestBackend {
    path: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl ManifestBackend {
    /// Open a manifest, keeping entries already in it
    pub fn open(path: &Path) -> Result<Self> {
        let entries = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(ToolchainError::Io(e)),
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    fn persist(&self) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        ensure_directory_exists(&parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(&serde_json::to_vec_pretty(&self.entries)?)?;
        tmp.persist(&self.path)
            .map_err(|e| ToolchainError::Io(e.error))?;
        Ok(())
    }
}

impl SubmissionBackend for ManifestBackend {
    fn submit(&mut self, request: &JobRequest) -> Result<JobId> {
        if let Some(missing) = request
            .dependencies
            .iter()
            .find(|dep| !self.entries.iter().any(|e| &e.id == *dep))
        {
            return Err(ToolchainError::Config(format!(
                "job '{}' depends on unknown job {}",
                request.name, missing
            )));
        }
        let id = JobId(Uuid::new_v4().to_string());
        self.entries.push(ManifestEntry {
            id: id.clone(),
            submitted_at: Utc::now(),
            request: request.clone(),
        });
        self.persist()?;
        tracing::info!(job = %request.name, id = %id, path = %self.path.display(), "Job recorded");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, dependencies: Vec<JobId>) -> JobRequest {
        JobRequest {
            name: name.to_string(),
            command: vec!["facebench-verify".into(), "--execute-job".into(), name.into()],
            array_size: Some(3),
            queue: "all.q".into(),
            memory: None,
            dependencies,
        }
    }

    #[test]
    fn test_dry_run_ids_sequential() {
        let mut backend = DryRunBackend::new();
        let a = backend.submit(&request("preprocess", vec![])).unwrap();
        let b = backend.submit(&request("extract", vec![a.clone()])).unwrap();
        assert_eq!(a.0, "dry-1");
        assert_eq!(b.0, "dry-2");
        assert_eq!(backend.submitted[1].1.dependencies, vec![a]);
    }

    #[test]
    fn test_manifest_persists_and_reopens() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("exp/submitted_jobs.json");

        let mut backend = ManifestBackend::open(&path).unwrap();
        let first = backend.submit(&request("preprocess", vec![])).unwrap();
        backend
            .submit(&request("extract", vec![first.clone()]))
            .unwrap();

        let reopened = ManifestBackend::open(&path).unwrap();
        assert_eq!(reopened.entries().len(), 2);
        assert_eq!(reopened.entries()[1].request.dependencies, vec![first]);
    }

    #[test]
    fn test_manifest_rejects_unknown_dependency() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut backend = ManifestBackend::open(&dir.path().join("jobs.json")).unwrap();
        let err = backend
            .submit(&request("extract", vec![JobId("nope".into())]))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
