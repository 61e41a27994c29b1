//! Partitioning the pair space into ranges and running them locally.
//!
//! A plan is an ordered list of half-open ranges that should tile `[0, total)`. Plans are
//! stored as tab-separated `start\tend` lines so an external scheduler can hand one line
//! to each worker; [`run_plan`] instead executes every range on a local thread pool.

use crate::batch::{BatchError, BatchOutcome, BatchRequest, PairData, run_statistic_batch};
use crate::progress::{NoopPairProgress, PairProgressObserver, PairProgressStage};
use crate::stats::{ScorerParams, StatError, Statistic, StatisticComputer};
use crate::triangular::PairRange;
use itertools::Itertools;
use log::{error, info, warn};
use rayon::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("range size must be positive")]
    ZeroRangeSize,
    #[error("start offset {offset} lies beyond the {total} pairs of the index space")]
    OffsetBeyondTotal { offset: usize, total: usize },
    #[error("I/O error on plan file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed plan file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("plan file {path}, entry {entry}: range [{start}, {end}) is empty")]
    EmptyRange {
        path: PathBuf,
        entry: usize,
        start: usize,
        end: usize,
    },
    #[error(transparent)]
    Stat(#[from] StatError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Consecutive ranges of `size` pairs from `start_offset` up to `total`; the last one may
/// be shorter.
pub fn plan_ranges(total: usize, size: usize, start_offset: usize) -> Result<Vec<PairRange>, PlanError> {
    if size == 0 {
        return Err(PlanError::ZeroRangeSize);
    }
    if start_offset > total {
        return Err(PlanError::OffsetBeyondTotal {
            offset: start_offset,
            total,
        });
    }
    Ok((start_offset..total)
        .step_by(size)
        .map(|start| PairRange::new(start, (start + size).min(total)))
        .collect())
}

/// How a set of ranges covers `[0, total)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TilingReport {
    /// Sub-ranges covered by no range.
    pub gaps: Vec<PairRange>,
    /// Pairs of ranges sharing at least one index.
    pub overlaps: Vec<(PairRange, PairRange)>,
    /// Ranges reaching past `total`.
    pub out_of_bounds: Vec<PairRange>,
}

impl TilingReport {
    pub fn is_exact(&self) -> bool {
        self.gaps.is_empty() && self.overlaps.is_empty() && self.out_of_bounds.is_empty()
    }
}

/// Checks that `ranges` cover `[0, total)` exactly once.
pub fn check_tiling(ranges: &[PairRange], total: usize) -> TilingReport {
    let mut report = TilingReport::default();
    let sorted: Vec<PairRange> = ranges
        .iter()
        .copied()
        .filter(|r| !r.is_empty())
        .sorted()
        .collect();

    report.out_of_bounds = sorted.iter().copied().filter(|r| r.end > total).collect();

    // Furthest index covered so far, with the range that reached it.
    let mut reach: Option<PairRange> = None;
    let mut covered = 0;
    for range in &sorted {
        if range.start > covered {
            report.gaps.push(PairRange::new(covered, range.start.min(total)));
        }
        if let Some(previous) = reach {
            if range.start < previous.end {
                report.overlaps.push((previous, *range));
            }
        }
        if range.end > covered {
            covered = range.end;
            reach = Some(*range);
        }
    }
    if covered < total {
        report.gaps.push(PairRange::new(covered, total));
    }
    report.gaps.retain(|g| !g.is_empty());
    report
}

/// Writes one `start\tend` line per range.
pub fn write_plan(path: &Path, ranges: &[PairRange]) -> Result<(), PlanError> {
    let format_err = |source| PlanError::Format {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)
        .map_err(format_err)?;
    for range in ranges {
        writer.serialize((range.start, range.end)).map_err(format_err)?;
    }
    writer.flush().map_err(|source| PlanError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a plan file; blank lines and lines starting with `#` are ignored.
pub fn read_plan(path: &Path) -> Result<Vec<PairRange>, PlanError> {
    let file = File::open(path).map_err(|source| PlanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .from_reader(file);

    let mut ranges = Vec::new();
    for record in reader.deserialize::<(usize, usize)>() {
        let (start, end) = record.map_err(|source| PlanError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        if start >= end {
            return Err(PlanError::EmptyRange {
                path: path.to_path_buf(),
                entry: ranges.len() + 1,
                start,
                end,
            });
        }
        ranges.push(PairRange::new(start, end));
    }
    Ok(ranges)
}

/// Shared settings for every batch of a local plan run.
#[derive(Debug, Clone)]
pub struct PlanRun<'a> {
    pub statistic: Statistic,
    pub params: ScorerParams,
    pub work_dir: &'a Path,
    /// Artifact source; batch names are `{source}_{start}_{end}`.
    pub source: &'a str,
    pub threads: usize,
    pub report_every: usize,
}

/// Result of a local plan run. Failed batches do not stop the others.
#[derive(Debug, Default)]
pub struct PlanSummary {
    pub completed: usize,
    pub skipped: usize,
    pub nan_total: usize,
    pub failed: Vec<(PairRange, BatchError)>,
}

impl PlanSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs each range as an independent batch on a pool of `run.threads` workers.
pub fn run_plan(
    data: &PairData<'_>,
    ranges: &[PairRange],
    run: &PlanRun<'_>,
    observer: &mut dyn PairProgressObserver,
) -> Result<PlanSummary, PlanError> {
    // Bad scorer parameters fail here, before any batch starts.
    StatisticComputer::with_params(run.statistic, 1, &run.params)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(run.threads.max(1))
        .build()?;
    let space = data.space();
    info!(
        "running {} ranges of {} over {space} on {} threads",
        ranges.len(),
        run.statistic,
        pool.current_num_threads()
    );
    observer.on_stage_start(PairProgressStage::Plan, ranges.len());

    let (tx, rx) = mpsc::channel::<PairRange>();
    let outcomes = std::thread::scope(|scope| {
        let worker = scope.spawn(|| {
            pool.install(|| {
                ranges
                    .par_iter()
                    .map_with(tx, |tx, &range| {
                        let request = BatchRequest::new(space, range, run.work_dir, run.source)
                            .with_report_every(run.report_every);
                        let outcome = run_statistic_batch(
                            data,
                            &request,
                            run.statistic,
                            &run.params,
                            &mut NoopPairProgress,
                        );
                        let _ = tx.send(range);
                        (range, outcome)
                    })
                    .collect::<Vec<_>>()
            })
        });
        for (done, _) in rx.iter().enumerate() {
            observer.on_stage_advance(PairProgressStage::Plan, done + 1);
        }
        worker
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    });
    observer.on_stage_finish(PairProgressStage::Plan);

    let mut summary = PlanSummary::default();
    for (range, outcome) in outcomes {
        match outcome {
            Ok(BatchOutcome::Completed(report)) => {
                summary.completed += 1;
                summary.nan_total += report.total_nan();
            }
            Ok(BatchOutcome::Skipped { .. }) => summary.skipped += 1,
            Err(e) => {
                error!("batch {range} failed: {e}");
                summary.failed.push((range, e));
            }
        }
    }
    info!(
        "plan finished: {} completed, {} skipped, {} failed",
        summary.completed,
        summary.skipped,
        summary.failed.len()
    );
    if summary.nan_total > 0 {
        warn!("plan produced {} NaN values in total", summary.nan_total);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MaskedMatrix;
    use crate::progress::tests::RecordingProgress;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    #[test]
    fn ranges_cover_the_space_in_order() {
        let ranges = plan_ranges(10, 4, 0).unwrap();
        assert_eq!(
            ranges,
            vec![PairRange::new(0, 4), PairRange::new(4, 8), PairRange::new(8, 10)]
        );
        assert!(check_tiling(&ranges, 10).is_exact());

        let tail = plan_ranges(10, 4, 6).unwrap();
        assert_eq!(tail, vec![PairRange::new(6, 10)]);
        assert!(plan_ranges(10, 4, 10).unwrap().is_empty());
    }

    #[test]
    fn invalid_plans_are_rejected() {
        assert!(matches!(plan_ranges(10, 0, 0), Err(PlanError::ZeroRangeSize)));
        assert!(matches!(
            plan_ranges(10, 3, 11),
            Err(PlanError::OffsetBeyondTotal { offset: 11, total: 10 })
        ));
    }

    #[test]
    fn tiling_check_reports_gaps_and_overlaps() {
        let ranges = [PairRange::new(3, 8), PairRange::new(0, 5), PairRange::new(10, 12)];
        let report = check_tiling(&ranges, 14);
        assert_eq!(report.gaps, vec![PairRange::new(8, 10), PairRange::new(12, 14)]);
        assert_eq!(report.overlaps, vec![(PairRange::new(0, 5), PairRange::new(3, 8))]);
        assert!(report.out_of_bounds.is_empty());
        assert!(!report.is_exact());

        let report = check_tiling(&[PairRange::new(0, 4), PairRange::new(0, 4)], 4);
        assert_eq!(report.overlaps.len(), 1);

        let report = check_tiling(&[PairRange::new(2, 6)], 5);
        assert_eq!(report.gaps, vec![PairRange::new(0, 2)]);
        assert_eq!(report.out_of_bounds, vec![PairRange::new(2, 6)]);
    }

    #[test]
    fn plan_files_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.tsv");
        let ranges = plan_ranges(25, 10, 0).unwrap();
        write_plan(&path, &ranges).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0\t10\n10\t20\n20\t25\n");
        assert_eq!(read_plan(&path).unwrap(), ranges);

        std::fs::write(&path, "# start\tend\n0\t3\n\n3\t3\n").unwrap();
        assert!(matches!(read_plan(&path), Err(PlanError::EmptyRange { start: 3, .. })));
    }

    #[test]
    fn local_run_matches_a_single_batch() {
        let mut rng = StdRng::seed_from_u64(7);
        let values = Array2::from_shape_fn((9, 12), |_| rng.gen_range(-1.0..1.0));
        let m = MaskedMatrix::dense(values).unwrap();
        let data = PairData::Single(&m);
        let total = data.space().total();

        let split = tempdir().unwrap();
        let ranges = plan_ranges(total, 5, 0).unwrap();
        let run = PlanRun {
            statistic: Statistic::Kendall,
            params: ScorerParams::default(),
            work_dir: split.path(),
            source: "m_kendall",
            threads: 3,
            report_every: 1000,
        };
        let mut observer = RecordingProgress::default();
        let summary = run_plan(&data, &ranges, &run, &mut observer).unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.completed, ranges.len());
        assert_eq!(observer.events.len(), ranges.len() + 2);

        let again = run_plan(&data, &ranges, &run, &mut NoopPairProgress).unwrap();
        assert_eq!(again.skipped, ranges.len());

        let whole = tempdir().unwrap();
        let single = PlanRun {
            work_dir: whole.path(),
            threads: 1,
            ..run.clone()
        };
        run_plan(&data, &[PairRange::new(0, total)], &single, &mut NoopPairProgress).unwrap();

        let space = data.space();
        let options = crate::compile::CompileOptions::new(space);
        let split_result = crate::compile::compile_dir(split.path(), &options, &mut NoopPairProgress).unwrap();
        let whole_result = crate::compile::compile_dir(whole.path(), &options, &mut NoopPairProgress).unwrap();
        assert_eq!(split_result.len(), whole_result.len());
        for (split_channel, whole_channel) in split_result.iter().zip(&whole_result) {
            assert_eq!(split_channel.channel, whole_channel.channel);
            assert_eq!(split_channel.values, whole_channel.values);
            assert!(split_channel.is_complete() && whole_channel.is_complete());
            assert_eq!(split_channel.counts.merged, ranges.len());
        }
    }
}
