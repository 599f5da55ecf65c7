//! File-list database
//!
//! Reads every identity and file of an experiment from one TOML manifest:
//!
//! ```toml
//! original_directory = "raw"
//! original_extension = ".json"
//!
//! [[models]]
//! id = "m1"
//! client = "c1"
//! group = "dev"
//! cohort = "models"        # or "t_models"
//!
//! [[files]]
//! id = "f1"
//! path = "c1/f1"
//! client = "c1"
//! purpose = "enroll"       # world | enroll | probe | tprobe | znorm
//! group = "dev"
//! models = ["m1"]          # enroll/tprobe: owning model; probe: target models (empty = all)
//! ```
//!
//! Entries without a `protocol` key belong to every protocol. Raw data is
//! located at `<manifest dir>/<original_directory>/<path><original_extension>`.

use super::Database;
use crate::error::{Result, ToolchainError};
use crate::registry::{param_str, Params};
use crate::types::{Annotations, ClientId, File, FileId, Group, ModelId, Purpose};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const DEFAULT_PROTOCOL: &str = "default";

/// Cohort a manifest model belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestCohort {
    Models,
    TModels,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestModel {
    pub id: ModelId,
    pub client: ClientId,
    pub group: Group,
    pub cohort: ManifestCohort,
    #[serde(default)]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestFile {
    pub id: FileId,
    pub path: String,
    pub client: ClientId,
    pub purpose: Purpose,
    pub group: Group,
    #[serde(default)]
    pub models: Vec<ModelId>,
    #[serde(default)]
    pub claimed_client: Option<ClientId>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub annotations: Option<Annotations>,
}

/// Parsed manifest
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub original_directory: Option<PathBuf>,
    #[serde(default)]
    pub original_extension: String,
    #[serde(default)]
    pub models: Vec<ManifestModel>,
    #[serde(default)]
    pub files: Vec<ManifestFile>,
}

fn in_protocol(entry: &Option<String>, protocol: &str) -> bool {
    entry.as_deref().map_or(true, |p| p == protocol)
}

/// Database backed by a TOML manifest
pub struct FileListDatabase {
    manifest: Manifest,
    original_root: PathBuf,
    clients: BTreeMap<ModelId, ClientId>,
}

impl FileListDatabase {
    /// Build from a parsed manifest; `base_dir` anchors relative raw paths
    pub fn from_manifest(manifest: Manifest, base_dir: &Path) -> Result<Self> {
        let mut clients = BTreeMap::new();
        for model in &manifest.models {
            if let Some(previous) = clients.insert(model.id.clone(), model.client.clone()) {
                if previous != model.client {
                    return Err(ToolchainError::Config(format!(
                        "model '{}' is declared with two clients ({} and {})",
                        model.id, previous, model.client
                    )));
                }
            }
        }

        let original_root = match &manifest.original_directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base_dir.join(dir),
            None => base_dir.to_path_buf(),
        };

        Ok(Self {
            manifest,
            original_root,
            clients,
        })
    }

    /// Load a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ToolchainError::Config(format!("Read manifest {} failed: {}", path.display(), e))
        })?;
        let manifest: Manifest = toml::from_str(&content).map_err(|e| {
            ToolchainError::Config(format!("Parse manifest {} failed: {}", path.display(), e))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_manifest(manifest, base_dir)
    }

    /// Registry constructor: `file-list(manifest = "path/to/db.toml")`
    pub fn from_params(params: &Params) -> Result<Self> {
        let manifest = param_str(params, "manifest")?.ok_or_else(|| {
            ToolchainError::Config("file-list database needs a 'manifest' parameter".to_string())
        })?;
        Self::load(Path::new(&manifest))
    }

    fn check_protocol(&self, protocol: &str) -> Result<()> {
        if self.protocols().iter().any(|p| p == protocol) {
            Ok(())
        } else {
            Err(ToolchainError::Config(format!(
                "file-list database has no protocol '{}'",
                protocol
            )))
        }
    }

    fn model_ids(&self, protocol: &str, group: Group, cohort: ManifestCohort) -> Result<Vec<ModelId>> {
        self.check_protocol(protocol)?;
        let mut ids: Vec<ModelId> = self
            .manifest
            .models
            .iter()
            .filter(|m| m.cohort == cohort && m.group == group && in_protocol(&m.protocol, protocol))
            .map(|m| m.id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn to_file(entry: &ManifestFile) -> File {
        File {
            id: entry.id.clone(),
            path: entry.path.clone(),
            client_id: entry.client.clone(),
            claimed_client_id: entry.claimed_client.clone(),
            purpose: entry.purpose,
        }
    }
}

impl Database for FileListDatabase {
    fn name(&self) -> &str {
        "file-list"
    }

    fn protocols(&self) -> Vec<String> {
        if !self.manifest.protocols.is_empty() {
            return self.manifest.protocols.clone();
        }
        let mut found: Vec<String> = self
            .manifest
            .models
            .iter()
            .filter_map(|m| m.protocol.clone())
            .chain(self.manifest.files.iter().filter_map(|f| f.protocol.clone()))
            .collect();
        found.sort();
        found.dedup();
        if found.is_empty() {
            found.push(DEFAULT_PROTOCOL.to_string());
        }
        found
    }

    fn models(&self, protocol: &str, group: Group) -> Result<Vec<ModelId>> {
        self.model_ids(protocol, group, ManifestCohort::Models)
    }

    fn t_models(&self, protocol: &str, group: Group) -> Result<Vec<ModelId>> {
        self.model_ids(protocol, group, ManifestCohort::TModels)
    }

    fn client_id_of(&self, model: &ModelId) -> Result<ClientId> {
        self.clients
            .get(model)
            .cloned()
            .ok_or_else(|| ToolchainError::Data(format!("unknown model '{}'", model)))
    }

    fn files(
        &self,
        protocol: &str,
        group: Group,
        purpose: Purpose,
        model: Option<&ModelId>,
    ) -> Result<Vec<File>> {
        self.check_protocol(protocol)?;
        Ok(self
            .manifest
            .files
            .iter()
            .filter(|f| f.purpose == purpose && f.group == group && in_protocol(&f.protocol, protocol))
            .filter(|f| match (model, purpose) {
                (None, _) => true,
                (Some(m), Purpose::Probe) => f.models.is_empty() || f.models.contains(m),
                (Some(m), _) => f.models.contains(m),
            })
            .map(Self::to_file)
            .collect())
    }

    fn z_files(&self, protocol: &str, group: Group) -> Result<Vec<File>> {
        self.files(protocol, group, Purpose::ZNorm, None)
    }

    fn original_path(&self, file: &File) -> PathBuf {
        self.original_root
            .join(format!("{}{}", file.path, self.manifest.original_extension))
    }

    fn annotations(&self, file: &File) -> Option<Annotations> {
        self.manifest
            .files
            .iter()
            .find(|f| f.id == file.id)
            .and_then(|f| f.annotations.clone())
    }
}
