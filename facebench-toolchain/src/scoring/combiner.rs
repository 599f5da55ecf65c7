//! Score combiner
//!
//! Rebuilds dense rows and cohort matrices from the fragments of the score
//! stage and applies ZT normalization. Rows are looked up by model id and
//! their columns are checked against the canonical (sorted) column ids, so
//! the result does not depend on how the score stage was sharded.

use super::fragments::load_row;
use super::matrix::{BoolMatrix, ScoreMatrix};
use super::zt_norm;
use crate::config::ZtPolicy;
use crate::error::{Result, ToolchainError};
use crate::file_selector::FileSelector;
use crate::types::{ClientId, Cohort, FileId, Group, ModelId, ProbeObject, ScoreType};
use std::collections::HashMap;
use std::path::Path;

/// Load one row and check its columns against the expected ids
pub async fn load_checked_row(dir: &Path, row: &ModelId, expected: &[FileId]) -> Result<Vec<f64>> {
    let (columns, scores) = load_row(dir, row.as_str(), expected.len()).await?;
    if columns != expected {
        return Err(ToolchainError::Data(format!(
            "row '{}' in {} has {} columns that do not match the {} expected ids",
            row,
            dir.display(),
            columns.len(),
            expected.len()
        )));
    }
    Ok(scores)
}

/// Stack rows into a matrix with `expected.len()` columns
pub async fn load_matrix(dir: &Path, rows: &[ModelId], expected: &[FileId]) -> Result<ScoreMatrix> {
    if rows.is_empty() {
        return Ok(ScoreMatrix::empty(expected.len()));
    }
    let mut loaded = Vec::with_capacity(rows.len());
    for row in rows {
        loaded.push(load_checked_row(dir, row, expected).await?);
    }
    ScoreMatrix::from_rows(loaded)
}

/// `mask[i][j] = rows[i] == cols[j]`
pub fn same_client_mask(rows: &[ClientId], cols: &[ClientId]) -> BoolMatrix {
    BoolMatrix::from_fn(rows.len(), cols.len(), |i, j| rows[i] == cols[j])
}

/// Positions of `subset` inside `all`
pub fn column_indices(all: &[FileId], subset: &[FileId]) -> Result<Vec<usize>> {
    let positions: HashMap<&FileId, usize> = all.iter().enumerate().map(|(i, id)| (id, i)).collect();
    subset
        .iter()
        .map(|id| {
            positions.get(id).copied().ok_or_else(|| {
                ToolchainError::Data(format!("probe '{}' is not a column of C", id))
            })
        })
        .collect()
}

pub fn object_ids(objects: &[ProbeObject]) -> Vec<FileId> {
    objects.iter().map(|o| o.id.clone()).collect()
}

/// Z-normalized T cohort of one group, shared by every model of the group
pub struct ZtCohort {
    pub t_models: Vec<ModelId>,
    pub probe_ids: Vec<FileId>,
    pub z_ids: Vec<FileId>,
    pub d_same: BoolMatrix,
    pub zc: ScoreMatrix,
    /// Clients of the Z columns, for the B same-client mask
    pub z_clients: Vec<ClientId>,
}

impl ZtCohort {
    /// Load C and D, recompute D_same from the cohort identities, Z-norm C
    pub async fn load(selector: &FileSelector<'_>, group: Group) -> Result<Self> {
        let t_models = selector.t_models(group)?;
        let probe_ids = object_ids(&selector.probe_objects(group)?);
        let z_objects = selector.z_objects(group)?;
        let z_ids = object_ids(&z_objects);
        let z_clients: Vec<ClientId> = z_objects.iter().map(|o| o.client_id.clone()).collect();

        let protocol = selector.protocol();
        let layout = selector.layout();
        let c = load_matrix(
            &layout.fragment_dir(protocol, ScoreType::C, group),
            &t_models,
            &probe_ids,
        )
        .await?;
        let d = load_matrix(
            &layout.fragment_dir(protocol, ScoreType::D, group),
            &t_models,
            &z_ids,
        )
        .await?;

        let t_clients = t_models
            .iter()
            .map(|t| selector.client_of(Cohort::TModels, t))
            .collect::<Result<Vec<_>>>()?;
        let d_same = same_client_mask(&t_clients, &z_clients);
        let zc = zt_norm::znorm_cohort(&c, &d, &d_same)?;

        tracing::debug!(
            group = %group,
            t_models = t_models.len(),
            probes = probe_ids.len(),
            z_files = z_ids.len(),
            "Loaded ZT cohort"
        );

        Ok(Self {
            t_models,
            probe_ids,
            z_ids,
            d_same,
            zc,
            z_clients,
        })
    }

    /// ZT-normalize one model's A row
    pub fn normalize(
        &self,
        model_client: &ClientId,
        a: &[f64],
        a_ids: &[FileId],
        b: &[f64],
        policy: &ZtPolicy,
    ) -> Result<Vec<f64>> {
        let view = self.zc.select_columns(&column_indices(&self.probe_ids, a_ids)?)?;
        let b_same: Vec<bool> = self.z_clients.iter().map(|c| c == model_client).collect();
        zt_norm::zt_normalize(a, b, &b_same, &view, policy)
    }
}
