#[cfg(test)]
#[path = "../tests/unit/tensor_test.rs"]
mod tests;

use anyhow::Result;
use rayon::prelude::*;

/// Dense row-major matrix of `f32` values.
///
/// **Shape**: `[rows, cols]`, element `(r, c)` lives at `data[r * cols + c]`.
/// Activations use one row per sequence position, weights follow the
/// row-vector convention (`y = x · W`).
#[derive(Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![0.0; rows * cols] }
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            anyhow::bail!("Matrix data size mismatch: expected {rows}x{cols}={}, got {}", rows * cols, data.len());
        }
        Ok(Self { rows, cols, data })
    }

    /// Builds a matrix from equally sized rows.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or_default();
        if let Some(bad) = rows.iter().position(|row| row.len() != cols) {
            anyhow::bail!("Row {bad} has {} columns, expected {cols}", rows[bad].len());
        }
        Self::from_vec(rows.len(), cols, rows.concat())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, idx: usize) -> &[f32] {
        &self.data[idx * self.cols..(idx + 1) * self.cols]
    }

    pub fn row_mut(&mut self, idx: usize) -> &mut [f32] {
        &mut self.data[idx * self.cols..(idx + 1) * self.cols]
    }

    pub fn last_row(&self) -> Option<&[f32]> {
        self.rows.checked_sub(1).map(|idx| self.row(idx))
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.cols.max(1)).take(self.rows)
    }

    pub fn iter_rows_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        let rows = self.rows;
        self.data.chunks_exact_mut(self.cols.max(1)).take(rows)
    }

    /// Element-wise `self += other` (residual connection).
    pub fn add_assign(&mut self, other: &Matrix) {
        assert_eq!(self.shape(), other.shape(), "Residual shape mismatch");
        self.data.iter_mut().zip(&other.data).for_each(|(x, &delta)| *x += delta);
    }

    /// Adds `bias` to every row.
    pub fn add_row_vector(&mut self, bias: &[f32]) {
        assert_eq!(self.cols, bias.len(), "Bias length must match column count");
        self.iter_rows_mut().for_each(|row| row.iter_mut().zip(bias).for_each(|(x, &b)| *x += b));
    }
}

impl std::fmt::Debug for Matrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matrix").field("rows", &self.rows).field("cols", &self.cols).finish()
    }
}

/// `x · w` for `x: [n, k]` and `w: [k, m]`, parallel over output rows.
pub fn matmul(x: &Matrix, w: &Matrix) -> Matrix {
    assert_eq!(x.cols, w.rows, "Inner dimensions must agree: {:?} x {:?}", x.shape(), w.shape());

    let mut out = Matrix::zeros(x.rows, w.cols);
    out.data.par_chunks_mut(w.cols.max(1)).zip(x.data.par_chunks(x.cols.max(1))).for_each(|(out_row, x_row)| {
        for (x_val, w_row) in x_row.iter().zip(w.data.chunks_exact(w.cols.max(1))) {
            out_row.iter_mut().zip(w_row).for_each(|(out_val, &w_val)| *out_val += x_val * w_val);
        }
    });
    out
}

/// `x · wᵗ` for `x: [n, k]` and `w: [m, k]`; used for the tied output projection.
pub fn matmul_transposed(x: &Matrix, w: &Matrix) -> Matrix {
    assert_eq!(x.cols, w.cols, "Inner dimensions must agree: {:?} x {:?}ᵗ", x.shape(), w.shape());

    let mut out = Matrix::zeros(x.rows, w.rows);
    out.data.par_chunks_mut(w.rows.max(1)).zip(x.data.par_chunks(x.cols.max(1))).for_each(|(out_row, x_row)| {
        out_row.iter_mut().zip(w.iter_rows()).for_each(|(out_val, w_row)| {
            *out_val = dot(x_row, w_row);
        });
    });
    out
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(&x, &y)| x * y).sum()
}
