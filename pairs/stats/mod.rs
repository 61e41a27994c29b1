// ========================================================================================
//                          The pluggable statistic contract
// ========================================================================================
//
// A statistic is a scorer plus a fixed, ordered list of channel names. The computer
// owns one buffer per channel, sized to the batch, and writes one value per channel
// per pair. Scorers only see two equal-length, non-empty vectors; the computer handles
// slot bookkeeping, empty intersections, NaN accounting and export.

mod correlation;
mod distance;
mod hhg;
mod mine;

use crate::artifact::{self, ArtifactError};
use ndarray::{Array2, ArrayView1};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub use correlation::pearson_r;

#[derive(Debug, Error)]
pub enum StatError {
    #[error("unknown statistic '{0}'; expected one of: {list}", list = Statistic::names().join(", "))]
    UnknownStatistic(String),
    #[error("a statistic computer needs a capacity of at least one pair")]
    ZeroCapacity,
    #[error("vectors differ in length: {x} vs {y}")]
    LengthMismatch { x: usize, y: usize },
    #[error("slot {slot} is out of range for a batch of {size}")]
    SlotOutOfRange { slot: usize, size: usize },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// One dependency measure, reduced to its arithmetic.
///
/// `x` and `y` are guaranteed equal-length and non-empty; `out` has one slot per
/// channel. Degenerate input (constant vectors, too few points) must produce NaN in the
/// affected channels rather than panicking.
pub trait PairScorer: Send {
    fn score(&mut self, x: &[f64], y: &[f64], out: &mut [f64]);
}

/// Tunables shared by all scorers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScorerParams {
    /// Exponent bounding the grid size of the information-based family, `cells <= n^alpha`.
    pub mine_alpha: f64,
}

impl Default for ScorerParams {
    fn default() -> Self {
        Self { mine_alpha: 0.6 }
    }
}

/// Every built-in statistic, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statistic {
    Pearson,
    Spearman,
    Kendall,
    Covariance,
    Euclidean,
    Dcor,
    Mine,
    Hhg,
}

impl Statistic {
    pub const ALL: [Statistic; 8] = [
        Self::Pearson,
        Self::Spearman,
        Self::Kendall,
        Self::Covariance,
        Self::Euclidean,
        Self::Dcor,
        Self::Mine,
        Self::Hhg,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Pearson => "pearson",
            Self::Spearman => "spearman",
            Self::Kendall => "kendall",
            Self::Covariance => "covariance",
            Self::Euclidean => "euclidean",
            Self::Dcor => "dcor",
            Self::Mine => "mine",
            Self::Hhg => "hhg",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.name()).collect()
    }

    pub fn channels(self) -> &'static [&'static str] {
        match self {
            Self::Pearson => &["PEARSON", "PEARSON_PV"],
            Self::Spearman => &["SPEARMAN", "SPEARMAN_PV"],
            Self::Kendall => &["KENDALL", "KENDALL_PV"],
            Self::Covariance => &["COV", "STD_X", "STD_Y"],
            Self::Euclidean => &["EUCLIDEAN"],
            Self::Dcor => &["DCOR", "DCOV"],
            Self::Mine => &["MIC", "MAS", "MEV", "MCN"],
            Self::Hhg => &["SUM_CHI", "SUM_LR", "MAX_CHI", "MAX_LR"],
        }
    }

    fn scorer(self, params: &ScorerParams) -> Result<Box<dyn PairScorer>, StatError> {
        Ok(match self {
            Self::Pearson => Box::new(correlation::Pearson),
            Self::Spearman => Box::new(correlation::Spearman::default()),
            Self::Kendall => Box::new(correlation::Kendall),
            Self::Covariance => Box::new(correlation::Covariance),
            Self::Euclidean => Box::new(correlation::Euclidean),
            Self::Dcor => Box::new(distance::DistanceCorrelation::default()),
            Self::Mine => Box::new(mine::Mine::new(params.mine_alpha)?),
            Self::Hhg => Box::new(hhg::Hhg),
        })
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Statistic {
    type Err = StatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|stat| stat.name() == wanted)
            .ok_or_else(|| StatError::UnknownStatistic(s.to_string()))
    }
}

/// A scorer bound to per-channel result buffers for one batch.
pub struct StatisticComputer {
    statistic: Statistic,
    scorer: Box<dyn PairScorer>,
    /// Shape: [channels, size].
    buffers: Array2<f64>,
    scratch: Vec<f64>,
}

impl fmt::Debug for StatisticComputer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatisticComputer")
            .field("statistic", &self.statistic)
            .field("size", &self.size())
            .finish()
    }
}

impl StatisticComputer {
    pub fn new(statistic: Statistic, size: usize) -> Result<Self, StatError> {
        Self::with_params(statistic, size, &ScorerParams::default())
    }

    pub fn with_params(
        statistic: Statistic,
        size: usize,
        params: &ScorerParams,
    ) -> Result<Self, StatError> {
        if size == 0 {
            return Err(StatError::ZeroCapacity);
        }
        let channels = statistic.channels().len();
        Ok(Self {
            statistic,
            scorer: statistic.scorer(params)?,
            buffers: Array2::zeros((channels, size)),
            scratch: vec![0.0; channels],
        })
    }

    pub fn statistic(&self) -> Statistic {
        self.statistic
    }

    pub fn channels(&self) -> &'static [&'static str] {
        self.statistic.channels()
    }

    pub fn size(&self) -> usize {
        self.buffers.ncols()
    }

    /// Scores one pair into `slot` of every channel buffer.
    pub fn compute(&mut self, x: &[f64], y: &[f64], slot: usize) -> Result<(), StatError> {
        if x.len() != y.len() {
            return Err(StatError::LengthMismatch {
                x: x.len(),
                y: y.len(),
            });
        }
        if slot >= self.size() {
            return Err(StatError::SlotOutOfRange {
                slot,
                size: self.size(),
            });
        }

        if x.is_empty() {
            self.scratch.fill(f64::NAN);
        } else {
            self.scratch.fill(0.0);
            self.scorer.score(x, y, &mut self.scratch);
        }
        self.buffers.column_mut(slot).assign(&ArrayView1::from(self.scratch.as_slice()));
        Ok(())
    }

    /// Ad hoc scoring of a single pair through slot 0.
    pub fn compute_one(&mut self, x: &[f64], y: &[f64]) -> Result<BTreeMap<&'static str, f64>, StatError> {
        self.compute(x, y, 0)?;
        self.get(0)
    }

    pub fn get(&self, slot: usize) -> Result<BTreeMap<&'static str, f64>, StatError> {
        if slot >= self.size() {
            return Err(StatError::SlotOutOfRange {
                slot,
                size: self.size(),
            });
        }
        Ok(self
            .channels()
            .iter()
            .zip(self.buffers.column(slot))
            .map(|(&name, &value)| (name, value))
            .collect())
    }

    pub fn nan_counts(&self) -> Vec<(&'static str, usize)> {
        self.channels()
            .iter()
            .zip(self.buffers.rows())
            .map(|(&name, row)| (name, row.iter().filter(|v| v.is_nan()).count()))
            .collect()
    }

    /// Total NaN entries across all channel buffers.
    pub fn nan_count(&self) -> usize {
        self.buffers.iter().filter(|v| v.is_nan()).count()
    }

    /// Writes every channel buffer to `{dir}/{name}.{channel}` and returns the paths.
    pub fn export(&self, dir: &Path, name: &str) -> Result<BTreeMap<String, PathBuf>, StatError> {
        let mut written = BTreeMap::new();
        for (&channel, row) in self.channels().iter().zip(self.buffers.rows()) {
            let path = dir.join(format!("{name}.{channel}"));
            artifact::write_f64(&path, 1, row.len(), &row.to_vec())?;
            written.insert(channel.to_string(), path);
        }
        Ok(written)
    }

    /// Paths the export of `name` would produce, keyed by channel.
    pub fn expected_outputs(&self, dir: &Path, name: &str) -> BTreeMap<String, PathBuf> {
        self.channels()
            .iter()
            .map(|&channel| (channel.to_string(), dir.join(format!("{name}.{channel}"))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    #[test]
    fn statistics_resolve_by_name() {
        for stat in Statistic::ALL {
            assert_eq!(stat.name().parse::<Statistic>().unwrap(), stat);
            assert!(stat.channels().iter().all(|c| artifact::is_channel_name(c)));
        }
        assert_eq!("Pearson".parse::<Statistic>().unwrap(), Statistic::Pearson);
        assert!(matches!(
            "bogus".parse::<Statistic>(),
            Err(StatError::UnknownStatistic(_))
        ));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            StatisticComputer::new(Statistic::Pearson, 0),
            Err(StatError::ZeroCapacity)
        ));
    }

    #[test]
    fn compute_writes_every_channel_at_the_slot() {
        let mut computer = StatisticComputer::new(Statistic::Covariance, 3).unwrap();
        computer.compute(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0], 1).unwrap();
        let values = computer.get(1).unwrap();
        assert_abs_diff_eq!(values["COV"], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(values["STD_X"], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(values["STD_Y"], 2.0, epsilon = 1e-12);
        assert_eq!(computer.get(0).unwrap()["COV"], 0.0);
    }

    #[test]
    fn empty_input_becomes_nan_and_is_counted() {
        let mut computer = StatisticComputer::new(Statistic::Pearson, 2).unwrap();
        computer.compute(&[], &[], 0).unwrap();
        computer.compute(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0], 1).unwrap();
        assert_eq!(computer.nan_count(), 2);
        assert_eq!(computer.nan_counts(), vec![("PEARSON", 1), ("PEARSON_PV", 1)]);
    }

    #[test]
    fn contract_violations_are_errors() {
        let mut computer = StatisticComputer::new(Statistic::Euclidean, 1).unwrap();
        assert!(matches!(
            computer.compute(&[1.0], &[1.0, 2.0], 0),
            Err(StatError::LengthMismatch { .. })
        ));
        assert!(matches!(
            computer.compute(&[1.0], &[1.0], 1),
            Err(StatError::SlotOutOfRange { .. })
        ));
    }

    #[test]
    fn compute_one_reports_identity_correlation() {
        let mut computer = StatisticComputer::new(Statistic::Spearman, 5).unwrap();
        let x: Vec<f64> = (0..700).map(f64::from).collect();
        let scores = computer.compute_one(&x, &x).unwrap();
        assert_abs_diff_eq!(scores["SPEARMAN"], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(scores["SPEARMAN_PV"], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn export_writes_one_artifact_per_channel() {
        let dir = tempdir().unwrap();
        let mut computer = StatisticComputer::new(Statistic::Dcor, 2).unwrap();
        computer.compute(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0], 0).unwrap();
        computer.compute(&[1.0, 2.0, 3.0], &[3.0, 1.0, 2.0], 1).unwrap();

        let written = computer.export(dir.path(), "src_0_2").unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written["DCOR"], dir.path().join("src_0_2.DCOR"));
        let back = artifact::read_values(&written["DCOR"]).unwrap();
        assert_eq!(back.data.len(), 2);
        assert_abs_diff_eq!(back.data[0], 1.0, epsilon = 1e-12);
        assert_eq!(
            computer.expected_outputs(dir.path(), "src_0_2"),
            written
        );
    }
}
