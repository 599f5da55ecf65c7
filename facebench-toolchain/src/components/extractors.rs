//! Built-in feature extractors

use super::{Capabilities, FeatureExtractor};
use crate::error::{Result, ToolchainError};
use crate::registry::{param_bool, Params};
use crate::types::{Array, TrainingSet};
use serde::{Deserialize, Serialize};

/// Per-dimension mean and sample standard deviation of equally sized vectors
///
/// Standard deviations below `1e-12` are replaced by 1 so that constant
/// dimensions pass through centered but unscaled.
pub(crate) fn feature_statistics<'a, I>(rows: I) -> Result<(Vec<f64>, Vec<f64>)>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let rows: Vec<&[f64]> = rows.into_iter().collect();
    let Some(first) = rows.first() else {
        return Err(ToolchainError::Data("training set is empty".to_string()));
    };
    let dim = first.len();
    if let Some(bad) = rows.iter().find(|r| r.len() != dim) {
        return Err(ToolchainError::Data(format!(
            "inconsistent feature length: expected {}, got {}",
            dim,
            bad.len()
        )));
    }

    let n = rows.len() as f64;
    let mut mean = vec![0.0; dim];
    for row in &rows {
        for (m, v) in mean.iter_mut().zip(row.iter()) {
            *m += v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n);

    let mut std = vec![0.0; dim];
    if rows.len() > 1 {
        for row in &rows {
            for ((s, v), m) in std.iter_mut().zip(row.iter()).zip(mean.iter()) {
                *s += (v - m) * (v - m);
            }
        }
        std.iter_mut().for_each(|s| *s = (*s / (n - 1.0)).sqrt());
    }
    std.iter_mut().for_each(|s| {
        if *s < 1e-12 {
            *s = 1.0
        }
    });

    Ok((mean, std))
}

/// Flattens a sample of any shape into a vector
pub struct FlattenExtractor;

impl FeatureExtractor for FlattenExtractor {
    fn name(&self) -> &str {
        "flatten"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn extract(&self, data: &Array) -> Result<Array> {
        Ok(Array::vector(data.data.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StandardizeParams {
    mean: Vec<f64>,
    std: Vec<f64>,
}

/// Flattens and standardizes each dimension with statistics learned from
/// the world set
pub struct StandardizeExtractor {
    split_by_client: bool,
    params: Option<StandardizeParams>,
}

impl StandardizeExtractor {
    pub fn from_params(params: &Params) -> Result<Self> {
        Ok(Self {
            split_by_client: param_bool(params, "split_training_by_client", false)?,
            params: None,
        })
    }
}

impl FeatureExtractor for StandardizeExtractor {
    fn name(&self) -> &str {
        "standardize"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            requires_training: true,
            split_training_by_client: self.split_by_client,
            ..Default::default()
        }
    }

    fn train(&mut self, training: &TrainingSet<Array>) -> Result<Vec<u8>> {
        let (mean, std) = feature_statistics(training.iter_flat().map(Array::as_slice))?;
        let params = StandardizeParams { mean, std };
        let bytes = serde_json::to_vec(&params)?;
        self.params = Some(params);
        Ok(bytes)
    }

    fn load(&mut self, params: &[u8]) -> Result<()> {
        self.params = Some(serde_json::from_slice(params)?);
        Ok(())
    }

    fn extract(&self, data: &Array) -> Result<Array> {
        let params = self.params.as_ref().ok_or_else(|| {
            ToolchainError::Config("standardize extractor used before training".to_string())
        })?;
        if data.len() != params.mean.len() {
            return Err(ToolchainError::Data(format!(
                "sample has {} values, extractor was trained on {}",
                data.len(),
                params.mean.len()
            )));
        }
        let values = data
            .data
            .iter()
            .zip(params.mean.iter().zip(params.std.iter()))
            .map(|(v, (m, s))| (v - m) / s)
            .collect();
        Ok(Array::vector(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_statistics() {
        let rows: Vec<Vec<f64>> = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let (mean, std) = feature_statistics(rows.iter().map(|r| r.as_slice())).unwrap();
        assert_eq!(mean, vec![2.0, 5.0]);
        assert!((std[0] - 2.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(std[1], 1.0, "constant dimension keeps unit scale");
    }

    #[test]
    fn test_feature_statistics_rejects_ragged() {
        let rows: Vec<Vec<f64>> = vec![vec![1.0, 5.0], vec![3.0]];
        assert!(feature_statistics(rows.iter().map(|r| r.as_slice())).is_err());
    }

    #[test]
    fn test_standardize_train_then_reload() {
        let mut trained = StandardizeExtractor::from_params(&Params::new()).unwrap();
        let training = TrainingSet::Flat(vec![
            Array::vector(vec![0.0, 10.0]),
            Array::vector(vec![2.0, 14.0]),
        ]);
        let blob = trained.train(&training).unwrap();

        let mut loaded = StandardizeExtractor::from_params(&Params::new()).unwrap();
        loaded.load(&blob).unwrap();

        let sample = Array::vector(vec![1.0, 12.0]);
        assert_eq!(loaded.extract(&sample).unwrap(), Array::vector(vec![0.0, 0.0]));
        assert_eq!(
            loaded.extract(&sample).unwrap(),
            trained.extract(&sample).unwrap()
        );
    }

    #[test]
    fn test_standardize_untrained_is_config_error() {
        let extractor = StandardizeExtractor::from_params(&Params::new()).unwrap();
        let err = extractor.extract(&Array::vector(vec![1.0])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
