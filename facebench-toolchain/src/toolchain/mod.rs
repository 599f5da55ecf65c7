//! ToolChain driver
//!
//! Executes the experiment stage by stage:
//!
//! PREPROCESS → EXTRACT_TRAIN → EXTRACT → PROJECT_TRAIN → PROJECT →
//! ENROLL_TRAIN → ENROLL → SCORE → ZNORM_MERGE → CONCATENATE
//!
//! # Architecture
//! Every stage is split into work units addressed by their output
//! artifacts. A unit runs iff `force` is set or one of its outputs is
//! missing; `force` deletes the outputs first. Units of a stage are
//! independent, so a job of the grid runs exactly the slice of units its
//! shard index selects, with the same code as the in-process run.
//!
//! Stages live in `stage_*` modules:
//! - `stage_preprocess`: raw data → preprocessed samples
//! - `stage_extract`: extractor training and feature extraction
//! - `stage_project`: projector training and projection
//! - `stage_enroll`: enroller training and model enrollment (N and T cohorts)
//! - `stage_score`: A/B/C/D score fragments
//! - `stage_finalize`: per-model merge with ZT normalization, concatenation

use crate::artifacts;
use crate::capabilities::{ExecutionPlan, FeatureSource, StageDecision};
use crate::components::{Database, FeatureExtractor, Preprocessor, Tool};
use crate::config::ExperimentConfig;
use crate::error::{ErrorKind, Result, ToolchainError};
use crate::file_selector::FileSelector;
use crate::grid::backend::{JobId, SubmissionBackend};
use crate::grid::graph::{JobGraph, JobNode};
use crate::grid::submitter::submit_graph;
use crate::grid::GridProfile;
use crate::retry::{retry_delay, retry_transient};
use crate::sharder::{shard_slice, ShardSelection};
use crate::types::{Array, File, Group, Stage, TrainingSet};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

mod stage_enroll;
mod stage_extract;
mod stage_finalize;
mod stage_preprocess;
mod stage_project;
mod stage_score;

pub use stage_score::ScoreUnit;

// ============================================================================
// Stage report
// ============================================================================

/// Outcome of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub job: String,
    pub decision: StageDecision,
    pub attempted: usize,
    pub produced: usize,
    pub reused: usize,
    /// Artifact keys of failed units
    pub failed: Vec<String>,
}

impl StageReport {
    fn new(node: JobNode) -> Self {
        Self {
            job: node.name(),
            decision: StageDecision::Run,
            attempted: 0,
            produced: 0,
            reused: 0,
            failed: Vec::new(),
        }
    }

    fn not_run(node: JobNode, decision: StageDecision) -> Self {
        Self {
            decision,
            ..Self::new(node)
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn failed units into a data error naming every failed key
    pub fn check(&self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }
        Err(ToolchainError::Data(format!(
            "{}: {} of {} work units failed: {}",
            self.job,
            self.failed.len(),
            self.attempted,
            self.failed.join(", ")
        )))
    }

    fn log(&self) {
        if self.decision != StageDecision::Run {
            info!(job = %self.job, decision = %self.decision, "Job not run");
        } else if self.is_success() {
            info!(
                job = %self.job,
                attempted = self.attempted,
                produced = self.produced,
                reused = self.reused,
                "Job complete"
            );
        } else {
            error!(
                job = %self.job,
                attempted = self.attempted,
                produced = self.produced,
                reused = self.reused,
                failed = self.failed.len(),
                "Job finished with failed units"
            );
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

/// The experiment driver
///
/// Holds the resolved components for the lifetime of the run. Trained
/// parameters are loaded into the component instances by the stage that
/// needs them; nothing is shared across processes except artifacts.
pub struct ToolChain {
    config: ExperimentConfig,
    database: Box<dyn Database>,
    protocol: String,
    plan: ExecutionPlan,
    grid: Option<GridProfile>,
    preprocessor: Box<dyn Preprocessor>,
    extractor: Box<dyn FeatureExtractor>,
    tool: Box<dyn Tool>,
}

impl ToolChain {
    /// Probe the components and bind the experiment to a protocol
    pub fn new(
        config: ExperimentConfig,
        database: Box<dyn Database>,
        preprocessor: Box<dyn Preprocessor>,
        extractor: Box<dyn FeatureExtractor>,
        tool: Box<dyn Tool>,
    ) -> Result<Self> {
        if config.groups.is_empty() {
            return Err(ToolchainError::Config("no groups selected".to_string()));
        }
        if config.groups.contains(&Group::World) {
            return Err(ToolchainError::Config(
                "the world group holds training data only and cannot be scored".to_string(),
            ));
        }

        let plan = ExecutionPlan::probe(
            &preprocessor.capabilities(),
            &extractor.capabilities(),
            &tool.capabilities(),
            &config.skip,
            config.zt_norm,
        )?;
        let protocol = FileSelector::new(database.as_ref(), config.protocol.as_deref(), &config.layout)?
            .protocol()
            .to_string();

        info!(
            database = database.name(),
            protocol = %protocol,
            preprocessor = preprocessor.name(),
            extractor = extractor.name(),
            tool = tool.name(),
            "ToolChain ready"
        );
        plan.log();

        Ok(Self {
            config,
            database,
            protocol,
            plan,
            grid: None,
            preprocessor,
            extractor,
            tool,
        })
    }

    /// Use a grid profile's chunk sizes for sharded jobs
    pub fn with_grid(mut self, profile: GridProfile) -> Self {
        self.grid = Some(profile);
        self
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// File selector bound to this experiment
    pub fn selector(&self) -> Result<FileSelector<'_>> {
        FileSelector::new(self.database.as_ref(), Some(&self.protocol), &self.config.layout)
    }

    /// Job graph of this experiment
    pub fn job_graph(&self) -> Result<JobGraph> {
        JobGraph::build(&self.plan, &self.config.groups)
    }

    /// Run every job in dependency order, all shards in-process
    ///
    /// Stops after the first job with failed units and returns its summary
    /// as a data error.
    pub async fn run_all(&mut self) -> Result<Vec<StageReport>> {
        let graph = self.job_graph()?;
        let mut reports = Vec::new();
        for &node in graph.nodes() {
            let report = self.run_job(node, self.config.shard).await?;
            report.check()?;
            reports.push(report);
        }
        info!(jobs = reports.len(), "Experiment complete");
        Ok(reports)
    }

    /// Run one job for one shard (or all shards)
    pub async fn run_job(&mut self, node: JobNode, shard: ShardSelection) -> Result<StageReport> {
        let decision = self.plan.decision(node.stage());
        if decision != StageDecision::Run {
            let report = StageReport::not_run(node, decision);
            report.log();
            return Ok(report);
        }
        if node.needs_zt() && !self.plan.zt_norm {
            let report = StageReport::not_run(node, StageDecision::NotRequired);
            report.log();
            return Ok(report);
        }
        if let Some(group) = node_group(node) {
            if !self.config.groups.contains(&group) {
                return Err(ToolchainError::Config(format!(
                    "job {} targets group {} which is not selected",
                    node, group
                )));
            }
        }

        info!(job = %node, shard = ?shard, "Starting job");
        let report = match node {
            JobNode::Preprocess => self.stage_preprocess(shard).await?,
            JobNode::ExtractTrain => self.stage_extract_train().await?,
            JobNode::Extract => self.stage_extract(shard).await?,
            JobNode::ProjectTrain => self.stage_project_train().await?,
            JobNode::Project => self.stage_project(shard).await?,
            JobNode::EnrollTrain => self.stage_enroll_train().await?,
            JobNode::Enroll { cohort, group } => self.stage_enroll(cohort, group, shard).await?,
            JobNode::Score { score_type, group } => {
                self.stage_score(score_type, group, shard).await?
            }
            JobNode::ZNormMerge { group } => self.stage_znorm_merge(group, shard).await?,
            JobNode::Concatenate { group } => self.stage_concatenate(group).await?,
        };
        report.log();
        Ok(report)
    }

    /// Number of work units of a job
    pub fn unit_count(&self, node: JobNode) -> Result<usize> {
        let selector = self.selector()?;
        Ok(match node {
            JobNode::Preprocess | JobNode::Extract | JobNode::Project => selector
                .all_files(&self.config.groups, self.plan.zt_norm)?
                .len(),
            JobNode::ExtractTrain
            | JobNode::ProjectTrain
            | JobNode::EnrollTrain
            | JobNode::Concatenate { .. } => 1,
            JobNode::Enroll { cohort, group } => selector.cohort_models(cohort, group)?.len(),
            JobNode::Score { score_type, group } => self.score_units(score_type, group)?.len(),
            JobNode::ZNormMerge { group } => selector.models(group)?.len(),
        })
    }

    /// Submit the whole job graph through a backend
    pub fn submit(
        &self,
        backend: &mut dyn SubmissionBackend,
        base_command: &[String],
    ) -> Result<BTreeMap<JobNode, JobId>> {
        let profile = self.grid.as_ref().ok_or_else(|| {
            ToolchainError::Config("grid submission needs a grid profile".to_string())
        })?;
        let graph = self.job_graph()?;
        let mut counts = BTreeMap::new();
        for &node in graph.nodes() {
            counts.insert(node, self.unit_count(node)?);
        }
        submit_graph(&graph, &counts, profile, base_command, backend)
    }

    // ------------------------------------------------------------------------
    // Unit execution
    // ------------------------------------------------------------------------

    /// Units per array task of a stage
    fn units_per_job(&self, stage: Stage) -> usize {
        self.grid
            .as_ref()
            .map_or(usize::MAX, |g| g.units_per_job(stage))
    }

    /// The slice of `units` this process handles
    fn my_units<'u, T>(&self, units: &'u [T], stage: Stage, shard: ShardSelection) -> Result<&'u [T]> {
        shard_slice(units, self.units_per_job(stage), shard)
    }

    /// Decide whether a unit must be computed
    ///
    /// With `force` the outputs are deleted and the unit runs; otherwise it
    /// runs iff any output is missing.
    async fn unit_pending(&self, outputs: &[PathBuf]) -> Result<bool> {
        if self.config.force {
            for output in outputs {
                artifacts::remove(output).await?;
            }
            return Ok(true);
        }
        for output in outputs {
            if !artifacts::exists(output).await {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run one unit: reuse, or compute with transient retry, then record
    async fn run_unit<F, Fut>(
        &self,
        report: &mut StageReport,
        key: &str,
        outputs: &[PathBuf],
        compute: F,
    ) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        report.attempted += 1;
        if !self.unit_pending(outputs).await? {
            debug!(job = %report.job, key, "Artifact present, reusing");
            report.reused += 1;
            return Ok(());
        }
        let result = retry_transient(key, self.config.retry.backoff_ms, compute).await;
        self.record(report, key, result)
    }

    /// Book the outcome of a computed unit
    ///
    /// Configuration errors end the job. Other failures are logged with the
    /// unit key; the job continues unless `abort_on_unit_failure` is set.
    fn record(&self, report: &mut StageReport, key: &str, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                report.produced += 1;
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::Config => Err(err),
            Err(err) => {
                error!(job = %report.job, key, kind = ?err.kind(), error = %err, "Work unit failed");
                report.failed.push(key.to_string());
                if self.config.retry.abort_on_unit_failure {
                    return Err(ToolchainError::Data(format!(
                        "{} aborted at unit '{}': {}",
                        report.job, key, err
                    )));
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Artifact helpers shared by stages
    // ------------------------------------------------------------------------

    /// Read a feature of a file from the extracted or projected artifacts
    async fn read_feature(&self, source: FeatureSource, file: &File) -> Result<Array> {
        let path = self.selector()?.feature_artifact(source, file);
        let bytes = artifacts::read(&path).await?;
        match source {
            FeatureSource::Extracted => self.extractor.read_feature(&bytes),
            FeatureSource::Projected => self.tool.read_feature(&bytes),
        }
    }

    /// Read the features of several files, each with transient retry
    async fn read_features(&self, source: FeatureSource, files: &[File]) -> Result<Vec<Array>> {
        let mut features = Vec::with_capacity(files.len());
        for file in files {
            let feature = retry_transient(file.id.as_str(), self.config.retry.backoff_ms, || {
                self.read_feature(source, file)
            })
            .await?;
            features.push(feature);
        }
        Ok(features)
    }

    /// Read a training set of features, keeping its grouping
    async fn read_training_features(
        &self,
        source: FeatureSource,
        files: &TrainingSet<File>,
    ) -> Result<TrainingSet<Array>> {
        Ok(match files {
            TrainingSet::Flat(files) => TrainingSet::Flat(self.read_features(source, files).await?),
            TrainingSet::ByClient(groups) => {
                let mut loaded = Vec::with_capacity(groups.len());
                for group in groups {
                    loaded.push(self.read_features(source, group).await?);
                }
                TrainingSet::ByClient(loaded)
            }
        })
    }

    /// Read a trained parameter blob with transient retry
    async fn read_blob(&self, path: &Path) -> Result<Vec<u8>> {
        let key = path.display().to_string();
        retry_transient(&key, self.config.retry.backoff_ms, || artifacts::read(path)).await
    }

    /// Decide whether a trainer must run
    ///
    /// Besides a missing blob, a missing signature or one that no longer
    /// matches the current training set makes the trained parameters stale.
    async fn trainer_pending(&self, artifact: &Path, training: &TrainingSet<File>) -> Result<bool> {
        let signature_file = artifacts::signature_path(artifact);
        if self
            .unit_pending(&[artifact.to_path_buf(), signature_file.clone()])
            .await?
        {
            return Ok(true);
        }
        let stored = self.read_blob(&signature_file).await?;
        let stored = String::from_utf8_lossy(&stored);
        let current = training_signature_of(training);
        if stored.trim() != current {
            warn!(
                path = %artifact.display(),
                stored = %stored.trim(),
                current = %current,
                "Training set changed, retraining"
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Run a trainer unit: reuse, or train with transient retry, then record
    ///
    /// Training borrows the components mutably, so the retry loop is spelled
    /// out here rather than going through `retry_transient`.
    async fn run_trainer(
        &mut self,
        report: &mut StageReport,
        stage: Stage,
        artifact: &Path,
        training: &TrainingSet<File>,
    ) -> Result<()> {
        report.attempted += 1;
        if !self.trainer_pending(artifact, training).await? {
            debug!(job = %report.job, "Trained parameters present, reusing");
            report.reused += 1;
            return Ok(());
        }

        let key = artifact.display().to_string();
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            let outcome = match stage {
                Stage::ExtractTrain => self.train_extractor(artifact, training).await,
                Stage::ProjectTrain => self.train_projector(artifact, training).await,
                Stage::EnrollTrain => self.train_enroller(artifact, training).await,
                other => Err(ToolchainError::Config(format!("{:?} is not a trainer stage", other))),
            };
            match outcome {
                Ok(()) => break Ok(()),
                Err(err) => match retry_delay(&err, attempt, self.config.retry.backoff_ms) {
                    Some(delay) => {
                        warn!(
                            key = %key,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Transient failure, retraining"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => break Err(err.escalate()),
                },
            }
        };
        self.record(report, &key, result)
    }

    /// Write a trainer artifact and the signature of its training set
    ///
    /// The signature goes last, so an interrupted write leaves the trainer
    /// pending.
    async fn write_trained(&self, path: &Path, blob: Vec<u8>, training: &TrainingSet<File>) -> Result<()> {
        let signature = training_signature_of(training);
        artifacts::write_atomic(path, blob).await?;
        artifacts::write_atomic(&artifacts::signature_path(path), signature.clone().into_bytes())
            .await?;
        info!(
            path = %path.display(),
            files = training.total_len(),
            signature = %signature,
            "Wrote trained parameters"
        );
        Ok(())
    }

    async fn load_extractor(&mut self) -> Result<()> {
        if self.plan.extractor_trained {
            let blob = self.read_blob(&self.config.layout.extractor_file()).await?;
            self.extractor.load(&blob)?;
            debug!("Extractor loaded");
        }
        Ok(())
    }

    async fn load_projector(&mut self) -> Result<()> {
        if self.plan.projector_trained {
            let blob = self.read_blob(&self.config.layout.projector_file()).await?;
            self.tool.load_projector(&blob)?;
            debug!("Projector loaded");
        }
        Ok(())
    }

    async fn load_enroller(&mut self) -> Result<()> {
        if self.plan.enroller_trained {
            let blob = self.read_blob(&self.config.layout.enroller_file()).await?;
            self.tool.load_enroller(&blob)?;
            debug!("Enroller loaded");
        }
        Ok(())
    }
}

fn node_group(node: JobNode) -> Option<Group> {
    match node {
        JobNode::Enroll { group, .. }
        | JobNode::Score { group, .. }
        | JobNode::ZNormMerge { group }
        | JobNode::Concatenate { group } => Some(group),
        _ => None,
    }
}

/// Reject an empty training set before handing it to a trainer
fn require_training<T>(set: &TrainingSet<T>, what: &str) -> Result<()> {
    if set.is_empty() {
        warn!(what, "Empty training set");
        return Err(ToolchainError::Data(format!("{} training set is empty", what)));
    }
    Ok(())
}

fn training_signature_of(training: &TrainingSet<File>) -> String {
    artifacts::training_signature(training.iter_flat().map(|f| f.id.as_str()))
}
