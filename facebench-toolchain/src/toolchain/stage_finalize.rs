//! Stages: ZNORM_MERGE, CONCATENATE
//!
//! Merge reassembles each model's A row (and B row when ZT is on), writes
//! the raw scores as text and, with ZT, the normalized ones. The T cohort
//! (C, D and the recomputed D_same) is loaded once per job. Concatenate
//! joins the per-model texts of a group in sorted model order.

use super::{StageReport, ToolChain};
use crate::artifacts;
use crate::error::{Result, ToolchainError};
use crate::grid::graph::JobNode;
use crate::scoring::combiner::{load_checked_row, object_ids, ZtCohort};
use crate::scoring::score_file::{format_lines, ScoreLine};
use crate::sharder::ShardSelection;
use crate::types::{Cohort, Group, ModelId, Normalization, ScoreType, Stage};
use std::path::PathBuf;
use tracing::info;

impl ToolChain {
    /// Merge fragments into per-model score texts (this shard's slice)
    pub(super) async fn stage_znorm_merge(&self, group: Group, shard: ShardSelection) -> Result<StageReport> {
        let selector = self.selector()?;
        let models = selector.models(group)?;
        let mine = self.my_units(&models, Stage::ZNormMerge, shard)?;
        let normalizations = self.config.normalizations();
        info!(
            group = %group,
            total = models.len(),
            shard_units = mine.len(),
            zt_norm = self.plan.zt_norm,
            "Merging scores"
        );

        let outputs_of = |model: &ModelId| -> Vec<PathBuf> {
            normalizations
                .iter()
                .map(|&norm| selector.merged_path(norm, group, model))
                .collect()
        };

        // The cohort is only loaded when some unit has work to do
        let mut any_pending = self.config.force;
        for model in mine {
            if any_pending {
                break;
            }
            for path in outputs_of(model) {
                if !artifacts::exists(&path).await {
                    any_pending = true;
                    break;
                }
            }
        }
        let cohort = if self.plan.zt_norm && any_pending {
            Some(ZtCohort::load(&selector, group).await?)
        } else {
            None
        };

        let mut report = StageReport::new(JobNode::ZNormMerge { group });
        for model in mine {
            let outputs = outputs_of(model);
            self.run_unit(&mut report, model.as_str(), &outputs, || {
                self.merge_model(group, model, cohort.as_ref())
            })
            .await?;
        }
        Ok(report)
    }

    async fn merge_model(&self, group: Group, model: &ModelId, cohort: Option<&ZtCohort>) -> Result<()> {
        let selector = self.selector()?;
        let layout = selector.layout();
        let protocol = selector.protocol();

        let probes = selector.probes_for(model, group)?;
        let probe_ids = object_ids(&probes);
        let a = load_checked_row(
            &layout.fragment_dir(protocol, ScoreType::A, group),
            model,
            &probe_ids,
        )
        .await?;
        let client = selector.client_of(Cohort::Models, model)?;

        let lines = |scores: &[f64]| -> Vec<ScoreLine> {
            probes
                .iter()
                .zip(scores)
                .map(|(probe, &score)| ScoreLine {
                    claimed_client_id: client.clone(),
                    true_client_id: probe.client_id.clone(),
                    probe_path: probe.path.clone(),
                    probe_id: probe.id.clone(),
                    score,
                })
                .collect()
        };

        artifacts::write_atomic(
            &selector.merged_path(Normalization::NoNorm, group, model),
            format_lines(&lines(&a)).into_bytes(),
        )
        .await?;

        if let Some(cohort) = cohort {
            let b = load_checked_row(
                &layout.fragment_dir(protocol, ScoreType::B, group),
                model,
                &cohort.z_ids,
            )
            .await?;
            let normalized = cohort.normalize(&client, &a, &probe_ids, &b, &self.config.zt_policy)?;
            artifacts::write_atomic(
                &selector.merged_path(Normalization::ZtNorm, group, model),
                format_lines(&lines(&normalized)).into_bytes(),
            )
            .await?;
        }
        Ok(())
    }

    /// Concatenate per-model texts into one result file per normalization
    pub(super) async fn stage_concatenate(&self, group: Group) -> Result<StageReport> {
        let selector = self.selector()?;
        let models = selector.models(group)?;
        let outputs: Vec<PathBuf> = self
            .config
            .normalizations()
            .into_iter()
            .map(|norm| selector.result_path(norm, group))
            .collect();
        info!(group = %group, models = models.len(), "Concatenating scores");

        let mut report = StageReport::new(JobNode::Concatenate { group });
        let key = format!("scores-{}", group);
        self.run_unit(&mut report, &key, &outputs, || self.concatenate_group(group, &models))
            .await?;
        Ok(report)
    }

    async fn concatenate_group(&self, group: Group, models: &[ModelId]) -> Result<()> {
        let selector = self.selector()?;
        for norm in self.config.normalizations() {
            let mut text = String::new();
            for model in models {
                let part = artifacts::read(&selector.merged_path(norm, group, model)).await?;
                let part = String::from_utf8(part).map_err(|e| {
                    ToolchainError::Data(format!("score text of model '{}' is not UTF-8: {}", model, e))
                })?;
                text.push_str(&part);
            }
            let path = selector.result_path(norm, group);
            artifacts::write_atomic(&path, text.into_bytes()).await?;
            info!(path = %path.display(), models = models.len(), "Wrote score file");
        }
        Ok(())
    }
}
