// ========================================================================================
//                         Linear index <-> row pair bijection
// ========================================================================================
//
// Every worker in a distributed run agrees on which pair a given index names only
// because they all use exactly these functions. Pairs of the strict upper triangle are
// enumerated row-major: (0,1), (0,2), ..., (0,n-1), (1,2), ..., (n-2,n-1).

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("invalid coordinate ({row}, {col}) for n={n}: require 0 <= row < col < n")]
    InvalidCoordinate { row: usize, col: usize, n: usize },
    #[error("invalid pair index {index}: pair space holds {total} pairs")]
    InvalidIndex { index: usize, total: usize },
    #[error("invalid cross coordinate ({row}, {col}) for a {rows} x {cols} space")]
    InvalidCrossCoordinate {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
}

/// Number of unordered pairs without the diagonal, `n(n-1)/2`.
#[inline]
pub fn pair_count(n: usize) -> usize {
    if n < 2 { 0 } else { n * (n - 1) / 2 }
}

/// Position of `(row, col)` in the row-major enumeration of the strict upper triangle.
#[inline]
pub fn sym_idx(row: usize, col: usize, n: usize) -> Result<usize, IndexError> {
    if row >= col || col >= n {
        return Err(IndexError::InvalidCoordinate { row, col, n });
    }
    Ok(row * n - row * (row + 1) / 2 + (col - row - 1))
}

/// Index of the first pair whose row is `row`.
#[inline]
fn row_start(row: usize, n: usize) -> usize {
    row * n - row * (row + 1) / 2
}

/// Inverse of [`sym_idx`].
///
/// The row is estimated from the closed-form root of the row-start quadratic and then
/// nudged by at most a step or two to absorb floating-point error, so the cost does not
/// depend on `n`.
pub fn inv_sym_idx(index: usize, n: usize) -> Result<(usize, usize), IndexError> {
    let total = pair_count(n);
    if index >= total {
        return Err(IndexError::InvalidIndex { index, total });
    }

    // Counting from the end: the last `k` rows hold k(k+1)/2 pairs.
    let from_end = (total - 1 - index) as f64;
    let k = (((8.0 * from_end + 1.0).sqrt() - 1.0) / 2.0).floor() as usize;
    let mut row = (n - 2).saturating_sub(k);

    while row > 0 && row_start(row, n) > index {
        row -= 1;
    }
    while row + 1 < n - 1 && row_start(row + 1, n) <= index {
        row += 1;
    }

    let col = index - row_start(row, n) + row + 1;
    Ok((row, col))
}

/// A half-open range `[start, end)` of linear pair indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairRange {
    pub start: usize,
    pub end: usize,
}

impl PairRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }
}

impl fmt::Display for PairRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// The global index space a run covers.
///
/// `Triangular` is the usual all-pairs case over one matrix. `Cross` pairs every row of
/// a first matrix with every row of a second, column-aligned matrix and numbers the
/// pairs row-major, `index = row * cols + col`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSpace {
    Triangular { n: usize },
    Cross { rows: usize, cols: usize },
}

impl PairSpace {
    pub fn total(&self) -> usize {
        match *self {
            Self::Triangular { n } => pair_count(n),
            Self::Cross { rows, cols } => rows * cols,
        }
    }

    pub fn resolve(&self, index: usize) -> Result<(usize, usize), IndexError> {
        match *self {
            Self::Triangular { n } => inv_sym_idx(index, n),
            Self::Cross { rows, cols } => {
                let total = rows * cols;
                if index >= total {
                    return Err(IndexError::InvalidIndex { index, total });
                }
                Ok((index / cols, index % cols))
            }
        }
    }

    pub fn index_of(&self, row: usize, col: usize) -> Result<usize, IndexError> {
        match *self {
            Self::Triangular { n } => sym_idx(row, col, n),
            Self::Cross { rows, cols } => {
                if row >= rows || col >= cols {
                    return Err(IndexError::InvalidCrossCoordinate {
                        row,
                        col,
                        rows,
                        cols,
                    });
                }
                Ok(row * cols + col)
            }
        }
    }

    /// Shape of the compiled output: a flat vector for the triangle, a matrix for cross.
    pub fn output_shape(&self) -> (usize, usize) {
        match *self {
            Self::Triangular { n } => (1, pair_count(n)),
            Self::Cross { rows, cols } => (rows, cols),
        }
    }
}

impl fmt::Display for PairSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Triangular { n } => write!(f, "triangular(n={n})"),
            Self::Cross { rows, cols } => write!(f, "cross({rows}x{cols})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn count_law() {
        assert_eq!(pair_count(5), 10);
        assert_eq!(pair_count(1), 0);
        assert_eq!(pair_count(0), 0);
        assert_eq!(pair_count(2), 1);
    }

    #[test]
    fn sym_idx_matches_row_major_enumeration() {
        let n = 7;
        let mut expected = 0;
        for row in 0..n {
            for col in (row + 1)..n {
                assert_eq!(sym_idx(row, col, n).unwrap(), expected);
                expected += 1;
            }
        }
        assert_eq!(expected, pair_count(n));
    }

    #[test]
    fn bijection_is_total_for_small_n() {
        for n in 2..60 {
            for i in 0..pair_count(n) {
                let (row, col) = inv_sym_idx(i, n).unwrap();
                assert!(row < col && col < n, "n={n} i={i} -> ({row},{col})");
                assert_eq!(sym_idx(row, col, n).unwrap(), i);
            }
        }
    }

    #[test]
    fn bijection_covers_every_pair_once() {
        let n = 23;
        let seen: HashSet<(usize, usize)> = (0..pair_count(n))
            .map(|i| inv_sym_idx(i, n).unwrap())
            .collect();
        assert_eq!(seen.len(), pair_count(n));
        for row in 0..n {
            for col in (row + 1)..n {
                assert!(seen.contains(&(row, col)));
            }
        }
    }

    #[test]
    fn inversion_is_exact_for_large_n() {
        let n = 300_000;
        let total = pair_count(n);
        let probes = [
            0,
            1,
            n - 2,
            n - 1,
            total / 3,
            total / 2,
            total - n,
            total - 2,
            total - 1,
        ];
        for &i in &probes {
            let (row, col) = inv_sym_idx(i, n).unwrap();
            assert_eq!(sym_idx(row, col, n).unwrap(), i);
        }
        assert_eq!(inv_sym_idx(total - 1, n).unwrap(), (n - 2, n - 1));
    }

    #[test]
    fn rejects_out_of_domain_inputs() {
        assert!(matches!(
            sym_idx(3, 3, 5),
            Err(IndexError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            sym_idx(4, 2, 5),
            Err(IndexError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            sym_idx(1, 5, 5),
            Err(IndexError::InvalidCoordinate { .. })
        ));
        assert_eq!(
            inv_sym_idx(10, 5),
            Err(IndexError::InvalidIndex {
                index: 10,
                total: 10
            })
        );
        assert!(inv_sym_idx(0, 1).is_err());
    }

    #[test]
    fn cross_space_is_row_major() {
        let space = PairSpace::Cross { rows: 3, cols: 4 };
        assert_eq!(space.total(), 12);
        assert_eq!(space.resolve(5).unwrap(), (1, 1));
        assert_eq!(space.index_of(2, 3).unwrap(), 11);
        assert!(space.resolve(12).is_err());
        assert!(space.index_of(3, 0).is_err());
        assert_eq!(space.output_shape(), (3, 4));
    }

    #[test]
    fn pair_range_membership() {
        let range = PairRange::new(3, 8);
        assert_eq!(range.len(), 5);
        assert!(range.contains(3));
        assert!(!range.contains(8));
        assert_eq!(range.to_string(), "[3, 8)");
    }
}
