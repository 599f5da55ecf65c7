//! Dense row-major matrices for scores and same-client masks

use crate::error::{Result, ToolchainError};

/// Row-major matrix of `T`
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

/// Raw or normalized scores
pub type ScoreMatrix = Matrix<f64>;

/// Same-client mask
pub type BoolMatrix = Matrix<bool>;

impl<T: Clone> Matrix<T> {
    /// Build from rows of equal length
    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if let Some((i, bad)) = rows.iter().enumerate().find(|(_, r)| r.len() != cols) {
            return Err(ToolchainError::Data(format!(
                "row {} has {} columns, expected {}",
                i,
                bad.len(),
                cols
            )));
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data: rows.into_iter().flatten().collect(),
        })
    }

    /// Matrix with no rows and a fixed column count
    pub fn empty(cols: usize) -> Self {
        Self {
            rows: 0,
            cols,
            data: Vec::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> &T {
        &self.data[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[T] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn column(&self, col: usize) -> Vec<T> {
        (0..self.rows).map(|r| self.get(r, col).clone()).collect()
    }

    /// Keep the listed columns, in the listed order
    pub fn select_columns(&self, columns: &[usize]) -> Result<Self> {
        if let Some(bad) = columns.iter().find(|c| **c >= self.cols) {
            return Err(ToolchainError::Data(format!(
                "column {} out of range ({} columns)",
                bad, self.cols
            )));
        }
        let data = (0..self.rows)
            .flat_map(|r| columns.iter().map(move |c| (r, *c)))
            .map(|(r, c)| self.get(r, c).clone())
            .collect();
        Ok(Self {
            rows: self.rows,
            cols: columns.len(),
            data,
        })
    }
}

impl<T> Matrix<T> {
    /// Build by evaluating `f(row, col)` for every cell
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }
}
