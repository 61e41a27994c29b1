//! # Masked matrices and pairwise extraction
//!
//! The input to every run is a matrix of variables (rows) by samples (columns) with a
//! same-shape missing-value mask. A masked entry may hold any value, including NaN;
//! an unmasked NaN is a data-integrity violation and is rejected before any pair is
//! computed.
//!
//! [`extract`] produces the two aligned sub-vectors of a row pair restricted to the
//! columns present in both rows.

use crate::artifact::{self, ArtifactError, ElementKind, HEADER_LEN, MATRIX_MAGIC};
use ndarray::{Array2, ArrayView1, Axis, Zip};
use std::fmt;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error(
        "{count} unmasked NaN value(s) found in matrix (first at row {first_row}, column {first_col}); every NaN must be masked"
    )]
    DataIntegrity {
        count: usize,
        first_row: usize,
        first_col: usize,
    },
    #[error("value matrix is {values_rows}x{values_cols} but mask is {mask_rows}x{mask_cols}")]
    ShapeMismatch {
        values_rows: usize,
        values_cols: usize,
        mask_rows: usize,
        mask_cols: usize,
    },
    #[error("rows of a pair differ in length: {left} vs {right} columns")]
    RowLengthMismatch { left: usize, right: usize },
    #[error("row {row} is out of bounds for a matrix with {rows} rows")]
    RowOutOfBounds { row: usize, rows: usize },
    #[error("column {col} is out of bounds for a matrix with {cols} columns")]
    ColumnOutOfBounds { col: usize, cols: usize },
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("matrix payload could not be shaped: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// A numeric matrix paired with its missing-value mask (`true` = missing).
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedMatrix {
    values: Array2<f64>,
    mask: Array2<bool>,
}

impl MaskedMatrix {
    /// Validates shape agreement and the no-unmasked-NaN invariant.
    pub fn new(values: Array2<f64>, mask: Array2<bool>) -> Result<Self, MatrixError> {
        if values.dim() != mask.dim() {
            let (values_rows, values_cols) = values.dim();
            let (mask_rows, mask_cols) = mask.dim();
            return Err(MatrixError::ShapeMismatch {
                values_rows,
                values_cols,
                mask_rows,
                mask_cols,
            });
        }
        let matrix = Self { values, mask };
        matrix.check_integrity()?;
        Ok(matrix)
    }

    /// Builds a matrix from rows of optional values; `None` is masked.
    pub fn from_rows(rows: &[Vec<Option<f64>>]) -> Result<Self, MatrixError> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != n_cols) {
            return Err(MatrixError::RowLengthMismatch {
                left: n_cols,
                right: bad.len(),
            });
        }
        let values = Array2::from_shape_fn((n_rows, n_cols), |(r, c)| {
            rows[r][c].unwrap_or(f64::NAN)
        });
        let mask = Array2::from_shape_fn((n_rows, n_cols), |(r, c)| rows[r][c].is_none());
        Self::new(values, mask)
    }

    /// A fully observed matrix.
    pub fn dense(values: Array2<f64>) -> Result<Self, MatrixError> {
        let mask = Array2::from_elem(values.dim(), false);
        Self::new(values, mask)
    }

    fn check_integrity(&self) -> Result<(), MatrixError> {
        let mut count = 0usize;
        let mut first = None;
        for ((r, c), &v) in self.values.indexed_iter() {
            if v.is_nan() && !self.mask[[r, c]] {
                count += 1;
                first.get_or_insert((r, c));
            }
        }
        match first {
            None => Ok(()),
            Some((first_row, first_col)) => Err(MatrixError::DataIntegrity {
                count,
                first_row,
                first_col,
            }),
        }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    #[inline]
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    #[inline]
    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    pub fn row(&self, row: usize) -> Result<(ArrayView1<'_, f64>, ArrayView1<'_, bool>), MatrixError> {
        if row >= self.nrows() {
            return Err(MatrixError::RowOutOfBounds {
                row,
                rows: self.nrows(),
            });
        }
        Ok((self.values.row(row), self.mask.row(row)))
    }

    /// Keeps the given columns, in the given order.
    pub fn select_columns(&self, columns: &[usize]) -> Result<Self, MatrixError> {
        if let Some(&col) = columns.iter().find(|&&c| c >= self.ncols()) {
            return Err(MatrixError::ColumnOutOfBounds {
                col,
                cols: self.ncols(),
            });
        }
        Ok(Self {
            values: self.values.select(Axis(1), columns),
            mask: self.mask.select(Axis(1), columns),
        })
    }

    pub fn summary(&self) -> MatrixSummary {
        MatrixSummary {
            rows: self.nrows(),
            cols: self.ncols(),
            missing: self.mask.iter().filter(|&&m| m).count(),
            nan_total: self.values.iter().filter(|v| v.is_nan()).count(),
        }
    }

    /// Writes the matrix file: header, f64 values, then one byte per mask cell.
    pub fn save(&self, path: &Path) -> Result<(), MatrixError> {
        let (rows, cols) = self.values.dim();
        artifact::write_atomically(path, |w| {
            w.write_all(&artifact::header(MATRIX_MAGIC, ElementKind::F64, rows, cols))?;
            for v in self.values.iter() {
                w.write_all(&v.to_le_bytes())?;
            }
            for &m in self.mask.iter() {
                w.write_all(&[u8::from(m)])?;
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Loads a matrix file and enforces the integrity invariant before returning it.
    pub fn load(path: &Path) -> Result<Self, MatrixError> {
        let (mmap, rows, cols) = artifact::map_checked(path, MATRIX_MAGIC, ElementKind::F64, 1)?;
        let cells = rows * cols;
        let payload = &mmap[HEADER_LEN..];
        let values = artifact::decode_f64(&payload[..cells * 8]);
        let mask: Vec<bool> = payload[cells * 8..].iter().map(|&b| b != 0).collect();
        Self::new(
            Array2::from_shape_vec((rows, cols), values)?,
            Array2::from_shape_vec((rows, cols), mask)?,
        )
    }
}

/// Counts reported after loading or aligning a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixSummary {
    pub rows: usize,
    pub cols: usize,
    pub missing: usize,
    pub nan_total: usize,
}

impl fmt::Display for MatrixSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.rows * self.cols;
        let pct = if total == 0 {
            0.0
        } else {
            self.missing as f64 / total as f64 * 100.0
        };
        write!(
            f,
            "missing values: {} of {} ({} by {}) ({pct:.2}%), NaN cells: {}",
            self.missing, total, self.rows, self.cols, self.nan_total
        )
    }
}

/// Appends to `x` and `y` the values of both rows at every column present in both.
///
/// The buffers are cleared first, so a batch loop can reuse them for every pair.
pub fn extract_into(
    row_a: ArrayView1<'_, f64>,
    mask_a: ArrayView1<'_, bool>,
    row_b: ArrayView1<'_, f64>,
    mask_b: ArrayView1<'_, bool>,
    x: &mut Vec<f64>,
    y: &mut Vec<f64>,
) -> Result<(), MatrixError> {
    let len = row_a.len();
    for other in [mask_a.len(), row_b.len(), mask_b.len()] {
        if other != len {
            return Err(MatrixError::RowLengthMismatch {
                left: len,
                right: other,
            });
        }
    }
    x.clear();
    y.clear();
    Zip::from(row_a)
        .and(mask_a)
        .and(row_b)
        .and(mask_b)
        .for_each(|&va, &missing_a, &vb, &missing_b| {
            if !(missing_a || missing_b) {
                x.push(va);
                y.push(vb);
            }
        });
    Ok(())
}

/// Allocating form of [`extract_into`].
pub fn extract(
    row_a: ArrayView1<'_, f64>,
    mask_a: ArrayView1<'_, bool>,
    row_b: ArrayView1<'_, f64>,
    mask_b: ArrayView1<'_, bool>,
) -> Result<(Vec<f64>, Vec<f64>), MatrixError> {
    let mut x = Vec::with_capacity(row_a.len());
    let mut y = Vec::with_capacity(row_a.len());
    extract_into(row_a, mask_a, row_b, mask_b, &mut x, &mut y)?;
    Ok((x, y))
}
