//! Experiment configuration
//!
//! [`ExperimentConfig`] is the single immutable value the driver consumes.
//! The binary builds it from CLI arguments, environment and the TOML file;
//! tests build it directly.

use crate::sharder::ShardSelection;
use crate::types::{Cohort, Group, Normalization, ScoreType};
use facebench_common::config::{CompiledDefaults, TomlConfig};
use std::path::PathBuf;

/// Default number of score columns per work unit
pub const DEFAULT_SCORE_BLOCK_SIZE: usize = 1000;

// ============================================================================
// Directory layout
// ============================================================================

/// Where every artifact of an experiment lives
///
/// ```text
/// <temp>/<sub_dir>/preprocessed/<file path>
/// <temp>/<sub_dir>/features/<file path>
/// <temp>/<sub_dir>/projected/<file path>
/// <temp>/<sub_dir>/{Extractor,Projector,Enroller}
/// <temp>/<sub_dir>/<protocol>/{models,tmodels}/<model id>
/// <temp>/<sub_dir>/<protocol>/<score_sub_dir>/zt_norm_{A,B,C,D,D_sameValue}/<group>/<row>_<block>
/// <temp>/<sub_dir>/<protocol>/<score_sub_dir>/{nonorm,ztnorm}/<group>/<model id>
/// <user>/<sub_dir>/<protocol>/<score_sub_dir>/{nonorm,ztnorm}/scores-<group>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLayout {
    pub temp_root: PathBuf,
    pub user_root: PathBuf,
    pub sub_dir: String,
    pub score_sub_dir: String,
}

impl DirectoryLayout {
    pub fn new(temp_root: impl Into<PathBuf>, user_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
            user_root: user_root.into(),
            sub_dir: "default".to_string(),
            score_sub_dir: "scores".to_string(),
        }
    }

    pub fn with_sub_dir(mut self, sub_dir: impl Into<String>) -> Self {
        self.sub_dir = sub_dir.into();
        self
    }

    pub fn with_score_sub_dir(mut self, score_sub_dir: impl Into<String>) -> Self {
        self.score_sub_dir = score_sub_dir.into();
        self
    }

    /// Root of all intermediate artifacts of this experiment
    pub fn experiment_temp(&self) -> PathBuf {
        self.temp_root.join(&self.sub_dir)
    }

    /// Root of the final score files of this experiment
    pub fn experiment_user(&self) -> PathBuf {
        self.user_root.join(&self.sub_dir)
    }

    pub fn preprocessed_dir(&self) -> PathBuf {
        self.experiment_temp().join("preprocessed")
    }

    pub fn features_dir(&self) -> PathBuf {
        self.experiment_temp().join("features")
    }

    pub fn projected_dir(&self) -> PathBuf {
        self.experiment_temp().join("projected")
    }

    pub fn extractor_file(&self) -> PathBuf {
        self.experiment_temp().join("Extractor")
    }

    pub fn projector_file(&self) -> PathBuf {
        self.experiment_temp().join("Projector")
    }

    pub fn enroller_file(&self) -> PathBuf {
        self.experiment_temp().join("Enroller")
    }

    pub fn models_dir(&self, protocol: &str, cohort: Cohort) -> PathBuf {
        let dir = match cohort {
            Cohort::Models => "models",
            Cohort::TModels => "tmodels",
        };
        self.experiment_temp().join(protocol).join(dir)
    }

    pub fn score_dir(&self, protocol: &str) -> PathBuf {
        self.experiment_temp().join(protocol).join(&self.score_sub_dir)
    }

    pub fn fragment_dir(&self, protocol: &str, score_type: ScoreType, group: Group) -> PathBuf {
        self.score_dir(protocol)
            .join(format!("zt_norm_{}", score_type.letter()))
            .join(group.label())
    }

    /// Inspection copy of the same-client mask; never read back
    pub fn d_same_dir(&self, protocol: &str, group: Group) -> PathBuf {
        self.score_dir(protocol)
            .join("zt_norm_D_sameValue")
            .join(group.label())
    }

    /// Per-model score text files produced by znorm_merge
    pub fn merged_dir(&self, protocol: &str, norm: Normalization, group: Group) -> PathBuf {
        self.score_dir(protocol).join(norm.dir_name()).join(group.label())
    }

    /// Final concatenated score file of a group
    pub fn result_file(&self, protocol: &str, norm: Normalization, group: Group) -> PathBuf {
        self.experiment_user()
            .join(protocol)
            .join(&self.score_sub_dir)
            .join(norm.dir_name())
            .join(format!("scores-{}", group.label()))
    }

    /// JSON manifest of submitted grid jobs
    pub fn job_manifest(&self) -> PathBuf {
        self.experiment_temp().join("submitted_jobs.json")
    }
}

// ============================================================================
// Policies and flags
// ============================================================================

/// Per-stage skip flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipFlags {
    pub preprocessing: bool,
    pub extractor_training: bool,
    pub extraction: bool,
    pub projection_training: bool,
    pub projection: bool,
    pub enroller_training: bool,
    pub enrollment: bool,
    /// Skips score and znorm_merge
    pub score_computation: bool,
    pub concatenation: bool,
}

/// ZT-normalization options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZtPolicy {
    /// Exclude B columns of the model's own client from its Z statistics
    pub exclude_same_client_in_b: bool,
}

/// Failure handling of work units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Linear backoff base: attempt `n` waits `n * backoff_ms`
    pub backoff_ms: u64,
    /// Stop a stage at its first failed unit
    pub abort_on_unit_failure: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_ms: CompiledDefaults::RETRY_BACKOFF_MS,
            abort_on_unit_failure: false,
        }
    }
}

// ============================================================================
// Experiment configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentConfig {
    pub layout: DirectoryLayout,
    /// `None` selects the database's first protocol
    pub protocol: Option<String>,
    pub groups: Vec<Group>,
    pub skip: SkipFlags,
    pub force: bool,
    pub preload_probes: bool,
    pub zt_norm: bool,
    pub zt_policy: ZtPolicy,
    pub retry: RetryPolicy,
    pub score_block_size: usize,
    pub shard: ShardSelection,
}

impl ExperimentConfig {
    /// Defaults: dev group, ZT on, nothing skipped, all shards
    pub fn new(layout: DirectoryLayout) -> Self {
        Self {
            layout,
            protocol: None,
            groups: vec![Group::Dev],
            skip: SkipFlags::default(),
            force: false,
            preload_probes: false,
            zt_norm: true,
            zt_policy: ZtPolicy::default(),
            retry: RetryPolicy::default(),
            score_block_size: DEFAULT_SCORE_BLOCK_SIZE,
            shard: ShardSelection::All,
        }
    }

    /// Apply the TOML options that are not directories
    pub fn apply_toml(mut self, toml: &TomlConfig) -> Self {
        if let Some(ms) = toml.retry_backoff_ms {
            self.retry.backoff_ms = ms;
        }
        if let Some(abort) = toml.abort_on_unit_failure {
            self.retry.abort_on_unit_failure = abort;
        }
        if let Some(exclude) = toml.zt.exclude_same_client_in_b {
            self.zt_policy.exclude_same_client_in_b = exclude;
        }
        self
    }

    /// Normalizations whose output files this experiment writes
    pub fn normalizations(&self) -> Vec<Normalization> {
        if self.zt_norm {
            vec![Normalization::NoNorm, Normalization::ZtNorm]
        } else {
            vec![Normalization::NoNorm]
        }
    }
}
