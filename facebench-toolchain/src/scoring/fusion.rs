//! Score fusion across multi-part models and multi-file probes

use crate::error::{Result, ToolchainError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reduction applied to a list of scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionStrategy {
    Average,
    Min,
    Max,
    Median,
    First,
}

impl FusionStrategy {
    pub fn label(self) -> &'static str {
        match self {
            FusionStrategy::Average => "average",
            FusionStrategy::Min => "min",
            FusionStrategy::Max => "max",
            FusionStrategy::Median => "median",
            FusionStrategy::First => "first",
        }
    }

    /// Reduce a non-empty list of scores
    ///
    /// The result does not depend on the order the scores were produced in,
    /// except for `First`, which takes the first item of the canonical order.
    pub fn reduce(self, scores: &[f64]) -> Result<f64> {
        if scores.is_empty() {
            return Err(ToolchainError::Data(format!(
                "cannot fuse an empty score list ({})",
                self
            )));
        }

        let value = match self {
            FusionStrategy::Average => scores.iter().sum::<f64>() / scores.len() as f64,
            FusionStrategy::Min => scores.iter().copied().fold(f64::INFINITY, f64::min),
            FusionStrategy::Max => scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            FusionStrategy::Median => {
                let mut sorted = scores.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            FusionStrategy::First => scores[0],
        };
        Ok(value)
    }
}

impl fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FusionStrategy {
    type Err = ToolchainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "average" | "mean" => Ok(FusionStrategy::Average),
            "min" => Ok(FusionStrategy::Min),
            "max" => Ok(FusionStrategy::Max),
            "median" => Ok(FusionStrategy::Median),
            "first" => Ok(FusionStrategy::First),
            other => Err(ToolchainError::Config(format!(
                "unknown fusion strategy '{}'",
                other
            ))),
        }
    }
}
