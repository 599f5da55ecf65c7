//! Scoring and score normalization
//!
//! - [`fusion`]: reductions across multi-part models and multi-file probes
//! - [`matrix`]: dense score and mask matrices
//! - [`zt_norm`]: the ZT-normalization algebra
//! - [`fragments`]: per-unit score fragments written by the score stage
//! - [`combiner`]: fragment reassembly into per-model rows and cohort matrices
//! - [`score_file`]: the text score line format

pub mod combiner;
pub mod fragments;
pub mod fusion;
pub mod matrix;
pub mod score_file;
pub mod zt_norm;

use crate::components::Tool;
use crate::error::{Result, ToolchainError};
use crate::types::{Array, Model};

/// Score one model against one probe feature
///
/// Single-part models go straight to `score`. Multi-part models use the
/// tool's native multi-model scorer when it has one, otherwise the per-part
/// scores are fused by the declared `multiple_model_scoring`.
pub fn score_model(tool: &dyn Tool, model: &Model, probe: &Array) -> Result<f64> {
    match model.parts.as_slice() {
        [] => Err(ToolchainError::Data("model has no parts".to_string())),
        [single] => tool.score(single, probe),
        parts => {
            if let Some(score) = tool.score_for_multiple_models(parts, probe)? {
                return Ok(score);
            }
            let strategy = tool.capabilities().multiple_model_scoring.ok_or_else(|| {
                ToolchainError::Config(format!(
                    "{} enrolls multi-part models but declares no multiple_model_scoring",
                    tool.name()
                ))
            })?;
            let scores = parts
                .iter()
                .map(|part| tool.score(part, probe))
                .collect::<Result<Vec<_>>>()?;
            strategy.reduce(&scores)
        }
    }
}

/// Score one model against one probe object (one or more files)
pub fn score_object(tool: &dyn Tool, model: &Model, probes: &[Array]) -> Result<f64> {
    match probes {
        [] => Err(ToolchainError::Data("probe object has no files".to_string())),
        [single] => score_model(tool, model, single),
        many => {
            if let Some(score) = tool.score_for_multiple_probes(model, many)? {
                return Ok(score);
            }
            let strategy = tool.capabilities().multiple_probe_scoring.ok_or_else(|| {
                ToolchainError::Config(format!(
                    "{} declares no multiple_probe_scoring for multi-file probes",
                    tool.name()
                ))
            })?;
            let scores = many
                .iter()
                .map(|probe| score_model(tool, model, probe))
                .collect::<Result<Vec<_>>>()?;
            strategy.reduce(&scores)
        }
    }
}
