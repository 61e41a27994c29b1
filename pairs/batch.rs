// ========================================================================================
//                               One contiguous range of pairs
// ========================================================================================
//
// A batch resolves every linear index of its range to a row pair, extracts the jointly
// observed columns, scores them into the computer slot for that offset and finally writes
// one artifact per channel. Batches share nothing but the borrowed input matrices, so any
// number of them may run side by side or on separate machines.

use crate::matrix::{self, MaskedMatrix, MatrixError};
use crate::progress::{PairProgressObserver, PairProgressStage};
use crate::stats::{ScorerParams, StatError, Statistic, StatisticComputer};
use crate::triangular::{IndexError, PairRange, PairSpace};
use log::{info, warn};
use ndarray::ArrayView1;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error(transparent)]
    Stat(#[from] StatError),
    #[error("range {range} is empty or exceeds the {total} pairs of the index space")]
    InvalidRange { range: PairRange, total: usize },
    #[error("computer holds {capacity} slots but range covers {pairs} pairs")]
    CapacityMismatch { capacity: usize, pairs: usize },
    #[error(
        "pair index {index} resolves to rows ({row}, {col}), outside the input ({left_rows} and {right_rows} rows)"
    )]
    CoordinateOutOfBounds {
        index: usize,
        row: usize,
        col: usize,
        left_rows: usize,
        right_rows: usize,
    },
    #[error("pair index {index} resolved to ({row}, {col}) which maps back to {back}")]
    IndexRoundTrip {
        index: usize,
        row: usize,
        col: usize,
        back: usize,
    },
    #[error(
        "batch {name} has {present} of {expected} channel outputs already on disk (missing: {missing}); remove them before rerunning"
    )]
    PartialOutput {
        name: String,
        present: usize,
        expected: usize,
        missing: String,
    },
}

/// The rows a batch reads pairs from.
#[derive(Debug, Clone, Copy)]
pub enum PairData<'a> {
    /// All unordered row pairs of one matrix.
    Single(&'a MaskedMatrix),
    /// Every row of `left` against every row of `right`; the columns must be aligned.
    Cross {
        left: &'a MaskedMatrix,
        right: &'a MaskedMatrix,
    },
}

type RowView<'a> = (ArrayView1<'a, f64>, ArrayView1<'a, bool>);

impl<'a> PairData<'a> {
    /// The index space matching the data's shape.
    pub fn space(&self) -> PairSpace {
        match *self {
            Self::Single(m) => PairSpace::Triangular { n: m.nrows() },
            Self::Cross { left, right } => PairSpace::Cross {
                rows: left.nrows(),
                cols: right.nrows(),
            },
        }
    }

    fn sides(&self) -> (&'a MaskedMatrix, &'a MaskedMatrix) {
        match *self {
            Self::Single(m) => (m, m),
            Self::Cross { left, right } => (left, right),
        }
    }

    fn rows(&self, index: usize, row: usize, col: usize) -> Result<(RowView<'a>, RowView<'a>), BatchError> {
        let (left, right) = self.sides();
        if row >= left.nrows() || col >= right.nrows() {
            return Err(BatchError::CoordinateOutOfBounds {
                index,
                row,
                col,
                left_rows: left.nrows(),
                right_rows: right.nrows(),
            });
        }
        Ok((left.row(row)?, right.row(col)?))
    }
}

/// Where and what a single batch computes.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub space: PairSpace,
    pub range: PairRange,
    pub work_dir: PathBuf,
    /// Artifact stem, `{source}_{start}_{end}`.
    pub batch_name: String,
    /// Pairs between progress log lines.
    pub report_every: usize,
}

impl BatchRequest {
    /// A request whose artifacts are named after `source` and the range.
    pub fn new(space: PairSpace, range: PairRange, work_dir: &Path, source: &str) -> Self {
        Self {
            space,
            range,
            work_dir: work_dir.to_path_buf(),
            batch_name: format!("{source}_{}_{}", range.start, range.end),
            report_every: crate::config::DEFAULT_REPORT_EVERY,
        }
    }

    pub fn with_report_every(mut self, report_every: usize) -> Self {
        self.report_every = report_every.max(1);
        self
    }
}

/// Artifact source used when none is given: `{matrix_stem}_{statistic}`.
pub fn default_source(matrix_path: &Path, statistic: Statistic) -> String {
    let stem = matrix_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "matrix".to_string());
    format!("{stem}_{statistic}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub name: String,
    pub range: PairRange,
    /// Channel to artifact path.
    pub outputs: BTreeMap<String, PathBuf>,
    pub nan_counts: Vec<(&'static str, usize)>,
    /// Pairs with no jointly observed column.
    pub empty_pairs: usize,
}

impl BatchReport {
    pub fn total_nan(&self) -> usize {
        self.nan_counts.iter().map(|(_, count)| count).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Every channel artifact was already present; nothing was computed.
    Skipped { existing: Vec<PathBuf> },
    Completed(BatchReport),
}

/// Splits expected outputs into those present and those missing on disk.
fn existing_outputs(expected: &BTreeMap<String, PathBuf>) -> (Vec<PathBuf>, Vec<String>) {
    let mut present = Vec::new();
    let mut missing = Vec::new();
    for (channel, path) in expected {
        if path.exists() {
            present.push(path.clone());
        } else {
            missing.push(channel.clone());
        }
    }
    (present, missing)
}

/// Computes every pair of `request.range` and exports the channel buffers.
///
/// An already complete set of artifacts is left alone and reported as
/// [`BatchOutcome::Skipped`]; an incomplete set is refused rather than overwritten.
pub fn run_batch(
    data: &PairData<'_>,
    request: &BatchRequest,
    computer: &mut StatisticComputer,
    observer: &mut dyn PairProgressObserver,
) -> Result<BatchOutcome, BatchError> {
    let range = request.range;
    let total = request.space.total();
    if range.is_empty() || range.end > total {
        return Err(BatchError::InvalidRange { range, total });
    }
    if computer.size() != range.len() {
        return Err(BatchError::CapacityMismatch {
            capacity: computer.size(),
            pairs: range.len(),
        });
    }

    let name = request.batch_name.as_str();
    let expected = computer.expected_outputs(&request.work_dir, name);
    let (present, missing) = existing_outputs(&expected);
    if missing.is_empty() {
        info!("{name}: all {} outputs exist, skipping", present.len());
        return Ok(BatchOutcome::Skipped { existing: present });
    }
    if !present.is_empty() {
        return Err(BatchError::PartialOutput {
            name: name.to_string(),
            present: present.len(),
            expected: expected.len(),
            missing: missing.join(", "),
        });
    }

    info!(
        "{name}: computing {} over {} pairs {range} of {}",
        computer.statistic(),
        range.len(),
        request.space
    );
    observer.on_stage_start(PairProgressStage::Batch, range.len());

    let report_every = request.report_every.max(1);
    let mut x = Vec::new();
    let mut y = Vec::new();
    let mut empty_pairs = 0;
    for (offset, index) in (range.start..range.end).enumerate() {
        let (row, col) = request.space.resolve(index)?;
        let back = request.space.index_of(row, col)?;
        if back != index || !range.contains(back) {
            return Err(BatchError::IndexRoundTrip {
                index,
                row,
                col,
                back,
            });
        }

        let ((row_a, mask_a), (row_b, mask_b)) = data.rows(index, row, col)?;
        matrix::extract_into(row_a, mask_a, row_b, mask_b, &mut x, &mut y)?;
        if x.is_empty() {
            empty_pairs += 1;
        }
        computer.compute(&x, &y, offset)?;

        let done = offset + 1;
        if done % report_every == 0 {
            info!("{name}: {done}/{} pairs", range.len());
            observer.on_stage_advance(PairProgressStage::Batch, done);
        }
    }

    let outputs = computer.export(&request.work_dir, name)?;
    observer.on_stage_finish(PairProgressStage::Batch);

    let nan_counts = computer.nan_counts();
    for (channel, count) in &nan_counts {
        info!("{name}.{channel}: {count} NaN of {}", range.len());
    }
    let report = BatchReport {
        name: name.to_string(),
        range,
        outputs,
        nan_counts,
        empty_pairs,
    };
    if report.total_nan() > 0 {
        warn!(
            "{name}: {} NaN values across channels ({empty_pairs} pairs had no shared columns)",
            report.total_nan()
        );
    }
    Ok(BatchOutcome::Completed(report))
}

/// Builds a computer for `statistic` sized to the request and runs it.
pub fn run_statistic_batch(
    data: &PairData<'_>,
    request: &BatchRequest,
    statistic: Statistic,
    params: &ScorerParams,
    observer: &mut dyn PairProgressObserver,
) -> Result<BatchOutcome, BatchError> {
    let total = request.space.total();
    if request.range.is_empty() || request.range.end > total {
        return Err(BatchError::InvalidRange {
            range: request.range,
            total,
        });
    }
    let mut computer = StatisticComputer::with_params(statistic, request.range.len(), params)?;
    run_batch(data, request, &mut computer, observer)
}
