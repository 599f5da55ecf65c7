//! Deterministic work sharding
//!
//! Job index `i` (1-based) of a list of `n` units with chunk size `k` owns
//! the half-open range `[(i-1)*k, min(i*k, n))`. There are `ceil(n/k)`
//! shards; the ranges are disjoint and cover `[0, n)`.

use crate::error::{Result, ToolchainError};
use std::ops::Range;

/// Environment variable the batch scheduler uses for the array task index
pub const SHARD_INDEX_ENV: &str = "SGE_TASK_ID";

/// Which part of a work list this process handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardSelection {
    /// Every shard, sequentially in-process
    All,
    /// One 1-based shard index
    Index(usize),
}

/// Number of shards for `n` units in chunks of `k` (`k = 0` counts as 1)
pub fn shard_count(n: usize, k: usize) -> usize {
    n.div_ceil(k.max(1))
}

/// Range of shard `index` (1-based)
///
/// Index 0 is invalid. Indices past the last shard get an empty range so an
/// over-sized array job does nothing instead of failing.
pub fn shard_range(n: usize, k: usize, index: usize) -> Result<Range<usize>> {
    if index == 0 {
        return Err(ToolchainError::Config(
            "shard indices are 1-based; got 0".to_string(),
        ));
    }
    let k = k.max(1);
    let start = (index - 1).saturating_mul(k).min(n);
    let end = index.saturating_mul(k).min(n);
    Ok(start..end)
}

/// All shard ranges in index order
pub fn shards(n: usize, k: usize) -> Vec<Range<usize>> {
    let k = k.max(1);
    (0..shard_count(n, k))
        .map(|i| i * k..((i + 1) * k).min(n))
        .collect()
}

/// The units this process handles
pub fn shard_slice<T>(items: &[T], k: usize, selection: ShardSelection) -> Result<&[T]> {
    match selection {
        ShardSelection::All => Ok(items),
        ShardSelection::Index(index) => Ok(&items[shard_range(items.len(), k, index)?]),
    }
}

/// Read the shard index from an environment variable
///
/// Absent, empty or `undefined` (what SGE sets for non-array jobs) means
/// "all shards".
pub fn shard_index_from_env(var: &str) -> Result<ShardSelection> {
    let Ok(raw) = std::env::var(var) else {
        return Ok(ShardSelection::All);
    };
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("undefined") {
        return Ok(ShardSelection::All);
    }
    match raw.parse::<usize>() {
        Ok(0) | Err(_) => Err(ToolchainError::Config(format!(
            "{} must be a positive integer, got '{}'",
            var, raw
        ))),
        Ok(index) => Ok(ShardSelection::Index(index)),
    }
}
