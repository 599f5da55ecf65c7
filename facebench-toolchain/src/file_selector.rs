//! File selection
//!
//! Pure translation from (database, protocol, layout) to ordered file lists
//! and artifact paths. Every list is sorted by id and deduplicated, so two
//! processes with the same configuration agree on every index. Nothing here
//! touches the filesystem.

use crate::capabilities::FeatureSource;
use crate::components::Database;
use crate::config::DirectoryLayout;
use crate::error::{Result, ToolchainError};
use crate::scoring::fragments::fragment_file;
use crate::types::{
    ClientId, Cohort, File, Group, ModelId, Normalization, ProbeObject, Purpose, ScoreType, Stage,
    TrainingSet,
};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn sorted_files(mut files: Vec<File>) -> Vec<File> {
    files.sort_by(|a, b| a.id.cmp(&b.id));
    files.dedup_by(|a, b| a.id == b.id);
    files
}

fn sorted_objects(mut objects: Vec<ProbeObject>) -> Vec<ProbeObject> {
    objects.sort_by(|a, b| a.id.cmp(&b.id));
    objects.dedup_by(|a, b| a.id == b.id);
    objects
}

fn sorted_ids(mut ids: Vec<ModelId>) -> Vec<ModelId> {
    ids.sort();
    ids.dedup();
    ids
}

/// Deterministic view of one database protocol
pub struct FileSelector<'a> {
    database: &'a dyn Database,
    protocol: String,
    layout: &'a DirectoryLayout,
}

impl<'a> FileSelector<'a> {
    /// Select a protocol; `None` takes the database's first one
    pub fn new(
        database: &'a dyn Database,
        protocol: Option<&str>,
        layout: &'a DirectoryLayout,
    ) -> Result<Self> {
        let protocols = database.protocols();
        let protocol = match protocol {
            Some(p) if protocols.iter().any(|known| known == p) => p.to_string(),
            Some(p) => {
                return Err(ToolchainError::Config(format!(
                    "database '{}' has no protocol '{}' (known: {})",
                    database.name(),
                    p,
                    protocols.join(", ")
                )))
            }
            None => protocols.first().cloned().ok_or_else(|| {
                ToolchainError::Config(format!(
                    "database '{}' declares no protocol",
                    database.name()
                ))
            })?,
        };
        Ok(Self {
            database,
            protocol,
            layout,
        })
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn database(&self) -> &dyn Database {
        self.database
    }

    pub fn layout(&self) -> &DirectoryLayout {
        self.layout
    }

    // ------------------------------------------------------------------------
    // File lists
    // ------------------------------------------------------------------------

    /// Files of a group and purpose, sorted by id
    pub fn inputs(&self, group: Group, purpose: Purpose) -> Result<Vec<File>> {
        let files = match purpose {
            Purpose::ZNorm => self.database.z_files(&self.protocol, group)?,
            _ => self.database.files(&self.protocol, group, purpose, None)?,
        };
        Ok(sorted_files(files))
    }

    /// Every file the per-file stages process
    ///
    /// World training files, plus enrollment and probe files of each group,
    /// plus T-model enrollment and Z-files when ZT normalization is on.
    pub fn all_files(&self, groups: &[Group], zt_norm: bool) -> Result<Vec<File>> {
        let mut files = self.inputs(Group::World, Purpose::World)?;
        for &group in groups {
            files.extend(self.inputs(group, Purpose::Enroll)?);
            for object in self.probe_objects(group)? {
                files.extend(object.files);
            }
            if zt_norm {
                files.extend(self.inputs(group, Purpose::TProbe)?);
                files.extend(self.inputs(group, Purpose::ZNorm)?);
            }
        }
        Ok(sorted_files(files))
    }

    /// World training files, optionally grouped by client
    ///
    /// Groups are ordered by client id and contain only non-empty runs.
    pub fn training_files(&self, split_by_client: bool) -> Result<TrainingSet<File>> {
        let files = self.inputs(Group::World, Purpose::World)?;
        if !split_by_client {
            return Ok(TrainingSet::Flat(files));
        }
        let mut by_client: BTreeMap<ClientId, Vec<File>> = BTreeMap::new();
        for file in files {
            by_client.entry(file.client_id.clone()).or_default().push(file);
        }
        Ok(TrainingSet::ByClient(by_client.into_values().collect()))
    }

    pub fn models(&self, group: Group) -> Result<Vec<ModelId>> {
        Ok(sorted_ids(self.database.models(&self.protocol, group)?))
    }

    pub fn t_models(&self, group: Group) -> Result<Vec<ModelId>> {
        Ok(sorted_ids(self.database.t_models(&self.protocol, group)?))
    }

    /// Rows of a cohort
    pub fn cohort_models(&self, cohort: Cohort, group: Group) -> Result<Vec<ModelId>> {
        match cohort {
            Cohort::Models => self.models(group),
            Cohort::TModels => self.t_models(group),
        }
    }

    pub fn client_of(&self, cohort: Cohort, model: &ModelId) -> Result<ClientId> {
        match cohort {
            Cohort::Models => self.database.client_id_of(model),
            Cohort::TModels => self.database.t_client_id_of(model),
        }
    }

    /// Enrollment files of a model; empty is a data error
    pub fn model_files(&self, model: &ModelId, group: Group) -> Result<Vec<File>> {
        self.enrollment_files(Cohort::Models, model, group)
    }

    /// Enrollment files of a T-norm cohort model
    pub fn t_model_files(&self, t_model: &ModelId, group: Group) -> Result<Vec<File>> {
        self.enrollment_files(Cohort::TModels, t_model, group)
    }

    pub fn enrollment_files(&self, cohort: Cohort, model: &ModelId, group: Group) -> Result<Vec<File>> {
        let purpose = match cohort {
            Cohort::Models => Purpose::Enroll,
            Cohort::TModels => Purpose::TProbe,
        };
        let files = sorted_files(
            self.database
                .files(&self.protocol, group, purpose, Some(model))?,
        );
        if files.is_empty() {
            return Err(ToolchainError::Data(format!(
                "model '{}' has no enrollment files in group {}",
                model, group
            )));
        }
        Ok(files)
    }

    fn objects(&self, group: Group, model: Option<&ModelId>) -> Result<Vec<ProbeObject>> {
        let objects = match self.database.probe_sets(&self.protocol, group, model)? {
            Some(sets) => sets,
            None => self
                .database
                .files(&self.protocol, group, Purpose::Probe, model)?
                .into_iter()
                .map(ProbeObject::single)
                .collect(),
        };
        Ok(sorted_objects(objects))
    }

    /// Probe columns scored against a model
    pub fn probes_for(&self, model: &ModelId, group: Group) -> Result<Vec<ProbeObject>> {
        self.objects(group, Some(model))
    }

    /// Every probe column of a group (the columns of C)
    pub fn probe_objects(&self, group: Group) -> Result<Vec<ProbeObject>> {
        self.objects(group, None)
    }

    /// Z-norm columns of a group (the columns of B and D)
    pub fn z_objects(&self, group: Group) -> Result<Vec<ProbeObject>> {
        Ok(sorted_objects(
            self.inputs(group, Purpose::ZNorm)?
                .into_iter()
                .map(ProbeObject::single)
                .collect(),
        ))
    }

    /// Rows of a score matrix
    pub fn score_rows(&self, score_type: ScoreType, group: Group) -> Result<Vec<ModelId>> {
        if score_type.uses_t_models() {
            self.t_models(group)
        } else {
            self.models(group)
        }
    }

    /// Columns of one row of a score matrix
    pub fn score_columns(
        &self,
        score_type: ScoreType,
        group: Group,
        row: &ModelId,
    ) -> Result<Vec<ProbeObject>> {
        match score_type {
            ScoreType::A => self.probes_for(row, group),
            ScoreType::C => self.probe_objects(group),
            ScoreType::B | ScoreType::D => self.z_objects(group),
        }
    }

    // ------------------------------------------------------------------------
    // Artifact paths
    // ------------------------------------------------------------------------

    /// Per-file artifact of preprocess, extract or project
    pub fn file_artifact(&self, stage: Stage, file: &File) -> Result<PathBuf> {
        let dir = match stage {
            Stage::Preprocess => self.layout.preprocessed_dir(),
            Stage::Extract => self.layout.features_dir(),
            Stage::Project => self.layout.projected_dir(),
            other => {
                return Err(ToolchainError::Config(format!(
                    "stage {} has no per-file artifacts",
                    other
                )))
            }
        };
        Ok(dir.join(&file.path))
    }

    /// Feature artifact read by a consumer
    pub fn feature_artifact(&self, source: FeatureSource, file: &File) -> PathBuf {
        let dir = match source {
            FeatureSource::Extracted => self.layout.features_dir(),
            FeatureSource::Projected => self.layout.projected_dir(),
        };
        dir.join(&file.path)
    }

    /// Parameter blob of a trainer stage
    pub fn trainer_artifact(&self, stage: Stage) -> Result<PathBuf> {
        match stage {
            Stage::ExtractTrain => Ok(self.layout.extractor_file()),
            Stage::ProjectTrain => Ok(self.layout.projector_file()),
            Stage::EnrollTrain => Ok(self.layout.enroller_file()),
            other => Err(ToolchainError::Config(format!(
                "stage {} is not a trainer",
                other
            ))),
        }
    }

    pub fn model_artifact(&self, cohort: Cohort, model: &ModelId) -> PathBuf {
        self.layout
            .models_dir(&self.protocol, cohort)
            .join(model.as_str())
    }

    pub fn fragment_path(
        &self,
        score_type: ScoreType,
        group: Group,
        row: &ModelId,
        block: usize,
    ) -> PathBuf {
        fragment_file(
            &self.layout.fragment_dir(&self.protocol, score_type, group),
            row.as_str(),
            block,
        )
    }

    pub fn d_same_path(&self, group: Group, row: &ModelId, block: usize) -> PathBuf {
        fragment_file(&self.layout.d_same_dir(&self.protocol, group), row.as_str(), block)
    }

    pub fn merged_path(&self, norm: Normalization, group: Group, model: &ModelId) -> PathBuf {
        self.layout
            .merged_dir(&self.protocol, norm, group)
            .join(model.as_str())
    }

    pub fn result_path(&self, norm: Normalization, group: Group) -> PathBuf {
        self.layout.result_file(&self.protocol, norm, group)
    }
}
