//! Stage: SCORE
//!
//! One job per score type and group. A work unit is one (row, column block)
//! pair: row = enrollment model (A, B) or T-model (C, D); columns = probe
//! objects (A, C) or Z-files (B, D), cut into blocks of
//! `score_block_size`. Units are ordered row-major, so a shard covers a run
//! of consecutive blocks.

use super::{StageReport, ToolChain};
use crate::artifacts;
use crate::error::Result;
use crate::grid::graph::JobNode;
use crate::scoring::combiner::object_ids;
use crate::scoring::fragments::{remove_blocks_from, MaskFragment, ScoreFragment};
use crate::scoring::score_object;
use crate::sharder::ShardSelection;
use crate::types::{Array, Cohort, FileId, Group, ModelId, ProbeObject, ScoreType, Stage};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// One (row, column block) pair of a score matrix
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreUnit {
    pub row: ModelId,
    pub block: usize,
    /// Number of blocks in this unit's row
    pub row_blocks: usize,
    pub columns: Vec<ProbeObject>,
}

type ProbeCache = HashMap<FileId, Array>;

impl ToolChain {
    /// Work units of one score matrix in row-major order
    ///
    /// A row without columns still gets block 0 (an empty fragment), so the
    /// combiner can tell "no probes" from "never scored".
    pub fn score_units(&self, score_type: ScoreType, group: Group) -> Result<Vec<ScoreUnit>> {
        let selector = self.selector()?;
        let block_size = self.config.score_block_size.max(1);
        let mut units = Vec::new();
        for row in selector.score_rows(score_type, group)? {
            let columns = selector.score_columns(score_type, group, &row)?;
            if columns.is_empty() {
                units.push(ScoreUnit {
                    row,
                    block: 0,
                    row_blocks: 1,
                    columns,
                });
                continue;
            }
            let row_blocks = columns.len().div_ceil(block_size);
            for (block, chunk) in columns.chunks(block_size).enumerate() {
                units.push(ScoreUnit {
                    row: row.clone(),
                    block,
                    row_blocks,
                    columns: chunk.to_vec(),
                });
            }
        }
        Ok(units)
    }

    /// Compute the fragments of one score matrix (this shard's slice)
    pub(super) async fn stage_score(
        &mut self,
        score_type: ScoreType,
        group: Group,
        shard: ShardSelection,
    ) -> Result<StageReport> {
        self.load_feature_readers(self.plan.probe_source).await?;
        if self.plan.performs_projection {
            self.load_projector().await?;
        }
        self.load_enroller().await?;

        let units = self.score_units(score_type, group)?;
        let mine = self.my_units(&units, Stage::Score, shard)?;
        info!(
            score_type = score_type.letter(),
            group = %group,
            total = units.len(),
            shard_units = mine.len(),
            "Computing scores"
        );

        let cache = if self.config.preload_probes {
            self.preload_probes(mine).await?
        } else {
            ProbeCache::new()
        };

        let selector = self.selector()?;
        let mut report = StageReport::new(JobNode::Score { score_type, group });
        for unit in mine {
            let mut outputs = vec![selector.fragment_path(score_type, group, &unit.row, unit.block)];
            if score_type == ScoreType::D {
                outputs.push(selector.d_same_path(group, &unit.row, unit.block));
            }
            let key = format!("{}/{}_{}", score_type.letter(), unit.row, unit.block);
            self.run_unit(&mut report, &key, &outputs, || {
                self.score_unit(score_type, group, unit, &cache, &outputs)
            })
            .await?;
        }
        Ok(report)
    }

    /// Read every probe feature of a work list once
    async fn preload_probes(&self, units: &[ScoreUnit]) -> Result<ProbeCache> {
        let mut cache = ProbeCache::new();
        for file in units.iter().flat_map(|u| u.columns.iter()).flat_map(|o| o.files.iter()) {
            if cache.contains_key(&file.id) {
                continue;
            }
            let feature = self.read_features(self.plan.probe_source, std::slice::from_ref(file)).await?;
            cache.extend(feature.into_iter().map(|f| (file.id.clone(), f)));
        }
        info!(probes = cache.len(), "Preloaded probe features");
        Ok(cache)
    }

    async fn score_unit(
        &self,
        score_type: ScoreType,
        group: Group,
        unit: &ScoreUnit,
        cache: &ProbeCache,
        outputs: &[PathBuf],
    ) -> Result<()> {
        let cohort = if score_type.uses_t_models() {
            Cohort::TModels
        } else {
            Cohort::Models
        };
        let selector = self.selector()?;
        let model_bytes = artifacts::read(&selector.model_artifact(cohort, &unit.row)).await?;
        let model = self.tool.read_model(&model_bytes)?;

        let mut scores = Vec::with_capacity(unit.columns.len());
        for object in &unit.columns {
            let mut probes = Vec::with_capacity(object.files.len());
            for file in &object.files {
                match cache.get(&file.id) {
                    Some(feature) => probes.push(feature.clone()),
                    None => probes.push(self.read_feature(self.plan.probe_source, file).await?),
                }
            }
            scores.push(score_object(self.tool.as_ref(), &model, &probes)?);
        }

        if unit.block == 0 {
            self.remove_stale_blocks(score_type, group, unit).await?;
        }

        let column_ids = object_ids(&unit.columns);
        let fragment = ScoreFragment::new(unit.row.as_str(), unit.block, column_ids.clone(), scores)?;
        artifacts::write_atomic(&outputs[0], fragment.encode()?).await?;

        if let Some(mask_path) = outputs.get(1) {
            let client = selector.client_of(cohort, &unit.row)?;
            let mask = MaskFragment {
                row_key: unit.row.to_string(),
                block: unit.block,
                column_ids,
                same_client: unit.columns.iter().map(|o| o.client_id == client).collect(),
            };
            artifacts::write_atomic(mask_path, serde_json::to_vec(&mask)?).await?;
        }
        debug!(row = %unit.row, block = unit.block, columns = unit.columns.len(), "Scored block");
        Ok(())
    }

    /// Drop fragments past the end of a row that is being rescored
    ///
    /// A previous run with a smaller block size leaves higher-numbered
    /// blocks behind, which would otherwise be joined onto the new row.
    async fn remove_stale_blocks(&self, score_type: ScoreType, group: Group, unit: &ScoreUnit) -> Result<()> {
        let layout = &self.config.layout;
        let protocol = self.selector()?.protocol().to_string();
        let mut dirs = vec![layout.fragment_dir(&protocol, score_type, group)];
        if score_type == ScoreType::D {
            dirs.push(layout.d_same_dir(&protocol, group));
        }
        for dir in dirs {
            let removed = remove_blocks_from(&dir, unit.row.as_str(), unit.row_blocks).await?;
            if removed > 0 {
                debug!(row = %unit.row, removed, dir = %dir.display(), "Removed stale score blocks");
            }
        }
        Ok(())
    }
}
