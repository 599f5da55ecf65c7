//! ZT-normalization algebra
//!
//! For one enrollment model with raw scores `a` (against its probes) and `b`
//! (against the Z-files), and the cohort matrices `C` (T-models × probes),
//! `D` (T-models × Z-files) and the same-client mask `D_same`:
//!
//! ```text
//! zA[j]    = (a[j] - mean(b')) / std(b')
//! zC[t, j] = (C[t, j] - mean(D[t, !D_same[t]])) / std(D[t, !D_same[t]])
//! out[j]   = (zA[j] - mean_t zC[t, j]) / std_t zC[t, j]
//! ```
//!
//! That is `out = Tnorm(Znorm(a; b'); Znorm(C; D, D_same))`. The Z step
//! runs first and the T step works on Z-normalized values on both sides.
//! This deliberately differs from the literal reverse composition
//! `Znorm(Tnorm(a; Znorm(C; D, D_same)); b)`, which would T-normalize raw A
//! scores against Z-normalized cohort scores.
//!
//! `b'` is `b`, or `b` without the model's own client when the policy says
//! so. Standard deviations are sample deviations; below `1e-10` (including
//! fewer than two values) they are replaced by 1. An excluded slice that
//! ends up empty falls back to the full slice.

use super::matrix::{BoolMatrix, ScoreMatrix};
use crate::config::ZtPolicy;
use crate::error::{Result, ToolchainError};

/// Smallest standard deviation used as a divisor
pub const STD_FLOOR: f64 = 1e-10;

/// Mean and floored sample standard deviation
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 1.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() < 2 {
        0.0
    } else {
        (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0)).sqrt()
    };
    (mean, if std < STD_FLOOR { 1.0 } else { std })
}

/// Values whose mask entry is false; the full slice if none remain
fn excluding(values: &[f64], same: &[bool]) -> Vec<f64> {
    let kept: Vec<f64> = values
        .iter()
        .zip(same)
        .filter(|(_, same)| !**same)
        .map(|(v, _)| *v)
        .collect();
    if kept.is_empty() {
        values.to_vec()
    } else {
        kept
    }
}

/// Z-normalize the A row of one model by its B row
///
/// `b_same` marks B columns sharing the model's client; it is only used
/// when the policy excludes them.
pub fn znorm_a(a: &[f64], b: &[f64], b_same: &[bool], policy: &ZtPolicy) -> Result<Vec<f64>> {
    if b.len() != b_same.len() {
        return Err(ToolchainError::Data(format!(
            "B row has {} columns but its client mask has {}",
            b.len(),
            b_same.len()
        )));
    }
    let cohort = if policy.exclude_same_client_in_b {
        excluding(b, b_same)
    } else {
        b.to_vec()
    };
    let (mean, std) = mean_std(&cohort);
    Ok(a.iter().map(|v| (v - mean) / std).collect())
}

/// Z-normalize every row of C by the different-client part of the D row
pub fn znorm_cohort(c: &ScoreMatrix, d: &ScoreMatrix, d_same: &BoolMatrix) -> Result<ScoreMatrix> {
    if c.rows() != d.rows() || d.rows() != d_same.rows() || d.cols() != d_same.cols() {
        return Err(ToolchainError::Data(format!(
            "cohort shapes disagree: C {}x{}, D {}x{}, D_same {}x{}",
            c.rows(),
            c.cols(),
            d.rows(),
            d.cols(),
            d_same.rows(),
            d_same.cols()
        )));
    }
    let stats: Vec<(f64, f64)> = (0..d.rows())
        .map(|t| mean_std(&excluding(d.row(t), d_same.row(t))))
        .collect();
    Ok(ScoreMatrix::from_fn(c.rows(), c.cols(), |t, j| {
        let (mean, std) = stats[t];
        (c.get(t, j) - mean) / std
    }))
}

/// T-normalize a Z-normalized A row by the matching columns of zC
pub fn tnorm(za: &[f64], zc: &ScoreMatrix) -> Result<Vec<f64>> {
    if za.len() != zc.cols() {
        return Err(ToolchainError::Data(format!(
            "A row has {} columns, T cohort view has {}",
            za.len(),
            zc.cols()
        )));
    }
    Ok(za
        .iter()
        .enumerate()
        .map(|(j, v)| {
            let (mean, std) = mean_std(&zc.column(j));
            (v - mean) / std
        })
        .collect())
}

/// Full ZT normalization of one model row
///
/// `zc_view` is the Z-normalized C restricted to this model's probe columns.
pub fn zt_normalize(
    a: &[f64],
    b: &[f64],
    b_same: &[bool],
    zc_view: &ScoreMatrix,
    policy: &ZtPolicy,
) -> Result<Vec<f64>> {
    let za = znorm_a(a, b, b_same, policy)?;
    tnorm(&za, zc_view)
}
