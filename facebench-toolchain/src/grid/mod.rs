//! Grid execution
//!
//! - [`GridProfile`]: per-stage chunk sizes, queues and memory of a batch
//!   environment
//! - [`graph`]: the job dependency graph
//! - [`backend`]: where job requests go
//! - [`submitter`]: turns the graph into array-job requests

pub mod backend;
pub mod graph;
pub mod submitter;

use crate::error::{Result, ToolchainError};
use crate::registry::{param_str, Params};
use crate::types::Stage;
use std::collections::BTreeMap;

const DEFAULT_QUEUE: &str = "all.q";

/// Batch environment description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridProfile {
    pub name: String,
    /// Work units per array task, by stage
    pub units_per_job: BTreeMap<Stage, usize>,
    /// Queue, by stage
    pub queue: BTreeMap<Stage, String>,
    /// Memory request passed through to the scheduler
    pub memory: Option<String>,
}

impl GridProfile {
    pub const BUILTIN_NAMES: [&'static str; 3] = ["grid", "demanding", "local-parallel"];

    fn standard(name: &str) -> Self {
        let units_per_job = BTreeMap::from([
            (Stage::Preprocess, 1000),
            (Stage::Extract, 1000),
            (Stage::Project, 1000),
            (Stage::Enroll, 20),
            (Stage::Score, 5),
            (Stage::ZNormMerge, 20),
        ]);
        let queue = Stage::ALL
            .into_iter()
            .map(|s| (s, DEFAULT_QUEUE.to_string()))
            .collect();
        Self {
            name: name.to_string(),
            units_per_job,
            queue,
            memory: None,
        }
    }

    /// A built-in profile, with optional overrides
    ///
    /// Overrides: `units_per_job = { score = 2, ... }`,
    /// `queue = { score = "long", ... }`, `memory = "8G"`.
    pub fn builtin(name: &str, params: &Params) -> Result<Self> {
        let mut profile = match name {
            "grid" => Self::standard(name),
            "demanding" => {
                let mut p = Self::standard(name);
                p.units_per_job.values_mut().for_each(|k| *k = (*k / 2).max(1));
                p.queue.values_mut().for_each(|q| *q = "long".to_string());
                p.memory = Some("8G".to_string());
                p
            }
            "local-parallel" => {
                let mut p = Self::standard(name);
                p.queue.values_mut().for_each(|q| *q = "local".to_string());
                p
            }
            other => {
                return Err(ToolchainError::Config(format!(
                    "unknown grid profile '{}'",
                    other
                )))
            }
        };
        profile.apply(params)?;
        Ok(profile)
    }

    fn apply(&mut self, params: &Params) -> Result<()> {
        for (key, value) in params {
            match key.as_str() {
                "units_per_job" => {
                    for (stage, k) in stage_table(key, value)? {
                        let k = k.as_integer().filter(|k| *k > 0).ok_or_else(|| {
                            ToolchainError::Config(format!(
                                "units_per_job.{} must be a positive integer",
                                stage
                            ))
                        })?;
                        self.units_per_job.insert(stage, k as usize);
                    }
                }
                "queue" => {
                    for (stage, q) in stage_table(key, value)? {
                        let q = q.as_str().ok_or_else(|| {
                            ToolchainError::Config(format!("queue.{} must be a string", stage))
                        })?;
                        self.queue.insert(stage, q.to_string());
                    }
                }
                "memory" => self.memory = param_str(params, "memory")?,
                other => {
                    return Err(ToolchainError::Config(format!(
                        "unknown grid parameter '{}'",
                        other
                    )))
                }
            }
        }
        Ok(())
    }

    /// Units per array task; trainers and unset stages take everything in one task
    pub fn units_per_job(&self, stage: Stage) -> usize {
        self.units_per_job.get(&stage).copied().unwrap_or(usize::MAX)
    }

    pub fn queue(&self, stage: Stage) -> &str {
        self.queue
            .get(&stage)
            .map(String::as_str)
            .unwrap_or(DEFAULT_QUEUE)
    }
}

fn stage_table<'a>(key: &str, value: &'a toml::Value) -> Result<Vec<(Stage, &'a toml::Value)>> {
    let table = value
        .as_table()
        .ok_or_else(|| ToolchainError::Config(format!("grid parameter '{}' must be a table", key)))?;
    table
        .iter()
        .map(|(name, v)| {
            Stage::from_label(name)
                .map(|s| (s, v))
                .ok_or_else(|| ToolchainError::Config(format!("unknown stage '{}' in {}", name, key)))
        })
        .collect()
}
