//! Built-in recognition tools
//!
//! Small, fully deterministic tools that exercise every capability path of
//! the driver:
//!
//! | Tool           | Projection      | Enroller training | Model           |
//! |----------------|-----------------|-------------------|-----------------|
//! | `euclidean`    | no              | no                | all features    |
//! | `whiten`       | trained         | no                | projected mean  |
//! | `within-class` | no              | split by client   | feature mean    |

use super::extractors::feature_statistics;
use super::{Capabilities, Tool};
use crate::error::{Result, ToolchainError};
use crate::registry::{param_bool, param_str, Params};
use crate::scoring::fusion::FusionStrategy;
use crate::types::{Array, Model, TrainingSet};
use serde::{Deserialize, Serialize};

fn squared_distance(a: &[f64], b: &[f64]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(ToolchainError::Data(format!(
            "feature length mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum())
}

fn mean_of(features: &[Array]) -> Result<Array> {
    let (mean, _) = feature_statistics(features.iter().map(Array::as_slice))?;
    Ok(Array::vector(mean))
}

fn fusion_param(params: &Params, key: &str) -> Result<FusionStrategy> {
    param_str(params, key)?
        .map(|s| s.parse())
        .transpose()
        .map(|s| s.unwrap_or(FusionStrategy::Average))
}

// ============================================================================
// euclidean
// ============================================================================

/// Negative Euclidean distance; the model keeps every enrollment feature
pub struct EuclideanTool {
    model_fusion: FusionStrategy,
    probe_fusion: FusionStrategy,
}

impl EuclideanTool {
    pub fn new() -> Self {
        Self {
            model_fusion: FusionStrategy::Average,
            probe_fusion: FusionStrategy::Average,
        }
    }

    pub fn from_params(params: &Params) -> Result<Self> {
        Ok(Self {
            model_fusion: fusion_param(params, "multiple_model_scoring")?,
            probe_fusion: fusion_param(params, "multiple_probe_scoring")?,
        })
    }
}

impl Default for EuclideanTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for EuclideanTool {
    fn name(&self) -> &str {
        "euclidean"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            multiple_model_scoring: Some(self.model_fusion),
            multiple_probe_scoring: Some(self.probe_fusion),
            ..Default::default()
        }
    }

    fn enroll(&self, features: &[Array]) -> Result<Model> {
        if features.is_empty() {
            return Err(ToolchainError::Data("no enrollment features".to_string()));
        }
        Ok(Model {
            parts: features.to_vec(),
        })
    }

    fn score(&self, model_part: &Array, probe: &Array) -> Result<f64> {
        Ok(-squared_distance(model_part.as_slice(), probe.as_slice())?.sqrt())
    }
}

// ============================================================================
// whiten
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WhiteningProjector {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

/// Diagonal whitening projection learned from the world set
pub struct WhitenTool {
    split_by_client: bool,
    projector: Option<WhiteningProjector>,
}

impl WhitenTool {
    pub fn from_params(params: &Params) -> Result<Self> {
        Ok(Self {
            split_by_client: param_bool(params, "split_training_by_client", false)?,
            projector: None,
        })
    }
}

impl Tool for WhitenTool {
    fn name(&self) -> &str {
        "whiten"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            performs_projection: true,
            requires_projection_training: true,
            split_training_by_client: self.split_by_client,
            use_projected_features_for_enrollment: true,
            multiple_probe_scoring: Some(FusionStrategy::Average),
            ..Default::default()
        }
    }

    fn train_projector(&mut self, training: &TrainingSet<Array>) -> Result<Vec<u8>> {
        let (mean, scale) = feature_statistics(training.iter_flat().map(Array::as_slice))?;
        let projector = WhiteningProjector { mean, scale };
        let bytes = serde_json::to_vec(&projector)?;
        self.projector = Some(projector);
        Ok(bytes)
    }

    fn load_projector(&mut self, params: &[u8]) -> Result<()> {
        self.projector = Some(serde_json::from_slice(params)?);
        Ok(())
    }

    fn project(&self, feature: &Array) -> Result<Array> {
        let projector = self.projector.as_ref().ok_or_else(|| {
            ToolchainError::Config("whiten projector not loaded".to_string())
        })?;
        if feature.len() != projector.mean.len() {
            return Err(ToolchainError::Data(format!(
                "feature has {} values, projector expects {}",
                feature.len(),
                projector.mean.len()
            )));
        }
        let values = feature
            .data
            .iter()
            .zip(projector.mean.iter().zip(projector.scale.iter()))
            .map(|(v, (m, s))| (v - m) / s)
            .collect();
        Ok(Array::vector(values))
    }

    fn enroll(&self, features: &[Array]) -> Result<Model> {
        Ok(Model::single(mean_of(features)?))
    }

    fn score(&self, model_part: &Array, probe: &Array) -> Result<f64> {
        Ok(-squared_distance(model_part.as_slice(), probe.as_slice())?.sqrt())
    }
}

// ============================================================================
// within-class
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WithinClassEnroller {
    variance: Vec<f64>,
}

/// Distance weighted by the pooled within-client variance of the world set
pub struct WithinClassTool {
    enroller: Option<WithinClassEnroller>,
}

impl WithinClassTool {
    pub fn new() -> Self {
        Self { enroller: None }
    }
}

impl Default for WithinClassTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for WithinClassTool {
    fn name(&self) -> &str {
        "within-class"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            split_training_by_client: true,
            requires_enroller_training: true,
            multiple_probe_scoring: Some(FusionStrategy::Average),
            ..Default::default()
        }
    }

    fn train_enroller(&mut self, training: &[Vec<Array>]) -> Result<Vec<u8>> {
        let mut dim = None;
        let mut sums: Vec<f64> = Vec::new();
        let mut count = 0usize;
        let mut clients = 0usize;

        for client in training.iter().filter(|c| !c.is_empty()) {
            let mean = mean_of(client)?;
            let d = *dim.get_or_insert(mean.len());
            if sums.is_empty() {
                sums = vec![0.0; d];
            }
            for feature in client {
                if feature.len() != d {
                    return Err(ToolchainError::Data(format!(
                        "feature length mismatch: {} vs {}",
                        feature.len(),
                        d
                    )));
                }
                for ((s, v), m) in sums.iter_mut().zip(feature.as_slice()).zip(mean.as_slice()) {
                    *s += (v - m) * (v - m);
                }
            }
            count += client.len();
            clients += 1;
        }

        if clients == 0 {
            return Err(ToolchainError::Data(
                "enroller training needs at least one client".to_string(),
            ));
        }

        let dof = count.saturating_sub(clients).max(1) as f64;
        let variance = sums
            .into_iter()
            .map(|s| {
                let v = s / dof;
                if v < 1e-12 {
                    1.0
                } else {
                    v
                }
            })
            .collect();
        let enroller = WithinClassEnroller { variance };
        let bytes = serde_json::to_vec(&enroller)?;
        self.enroller = Some(enroller);
        Ok(bytes)
    }

    fn load_enroller(&mut self, params: &[u8]) -> Result<()> {
        self.enroller = Some(serde_json::from_slice(params)?);
        Ok(())
    }

    fn enroll(&self, features: &[Array]) -> Result<Model> {
        Ok(Model::single(mean_of(features)?))
    }

    fn score(&self, model_part: &Array, probe: &Array) -> Result<f64> {
        let enroller = self.enroller.as_ref().ok_or_else(|| {
            ToolchainError::Config("within-class enroller not loaded".to_string())
        })?;
        let (m, p) = (model_part.as_slice(), probe.as_slice());
        if m.len() != p.len() || m.len() != enroller.variance.len() {
            return Err(ToolchainError::Data(format!(
                "feature length mismatch: model {}, probe {}, enroller {}",
                m.len(),
                p.len(),
                enroller.variance.len()
            )));
        }
        let distance: f64 = m
            .iter()
            .zip(p)
            .zip(&enroller.variance)
            .map(|((a, b), v)| (a - b) * (a - b) / v)
            .sum();
        Ok(-distance)
    }
}
