//! Score fragments
//!
//! The score stage writes one fragment per (row, column block) work unit.
//! A fragment records the column ids it covers so the combiner can check
//! that the reassembled row lines up with the canonical column order.

use crate::artifacts;
use crate::error::{Result, ToolchainError};
use crate::types::FileId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreFragment {
    pub row_key: String,
    pub block: usize,
    pub column_ids: Vec<FileId>,
    pub scores: Vec<f64>,
}

impl ScoreFragment {
    pub fn new(row_key: impl Into<String>, block: usize, column_ids: Vec<FileId>, scores: Vec<f64>) -> Result<Self> {
        if column_ids.len() != scores.len() {
            return Err(ToolchainError::Data(format!(
                "fragment has {} column ids but {} scores",
                column_ids.len(),
                scores.len()
            )));
        }
        Ok(Self {
            row_key: row_key.into(),
            block,
            column_ids,
            scores,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Same-client mask of one D fragment; written for inspection only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskFragment {
    pub row_key: String,
    pub block: usize,
    pub column_ids: Vec<FileId>,
    pub same_client: Vec<bool>,
}

/// Path of block `block` of a row inside a fragment directory
pub fn fragment_file(dir: &Path, row_key: &str, block: usize) -> PathBuf {
    dir.join(format!("{}_{}", row_key, block))
}

/// Reassemble one row of `expected` columns from blocks 0, 1, 2, ...
///
/// Reading stops once the row is complete or a block is missing. A missing
/// block 0 is a data error: the row was never scored.
pub async fn load_row(dir: &Path, row_key: &str, expected: usize) -> Result<(Vec<FileId>, Vec<f64>)> {
    let mut column_ids = Vec::new();
    let mut scores = Vec::new();
    let mut block = 0;
    while block == 0 || column_ids.len() < expected {
        let path = fragment_file(dir, row_key, block);
        if !artifacts::exists(&path).await {
            break;
        }
        let fragment = ScoreFragment::decode(&artifacts::read(&path).await?)?;
        if fragment.row_key != row_key || fragment.block != block {
            return Err(ToolchainError::Data(format!(
                "fragment {} holds row '{}' block {}",
                path.display(),
                fragment.row_key,
                fragment.block
            )));
        }
        column_ids.extend(fragment.column_ids);
        scores.extend(fragment.scores);
        block += 1;
    }
    if block == 0 {
        return Err(ToolchainError::Data(format!(
            "no score fragments for row '{}' in {}",
            row_key,
            dir.display()
        )));
    }
    Ok((column_ids, scores))
}

/// Delete blocks `first`, `first + 1`, ... of a row until one is absent
///
/// Returns the number of blocks removed.
pub async fn remove_blocks_from(dir: &Path, row_key: &str, first: usize) -> Result<usize> {
    let mut block = first;
    loop {
        let path = fragment_file(dir, row_key, block);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(block - first);
        }
        artifacts::remove(&path).await?;
        block += 1;
    }
}
