// ========================================================================================
//                        Merging batch artifacts into dense results
// ========================================================================================
//
// Batches finish in any order, some fail, some are rerun. Compilation scans a working
// directory, groups artifacts by channel, orders each group by range and writes every
// stored value back to its global index. Whatever the artifacts do not cover stays unset
// and is reported; whatever they cover twice is counted.

use crate::artifact::{self, ArtifactError, ArtifactName};
use crate::progress::{PairProgressObserver, PairProgressStage};
use crate::triangular::PairSpace;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to list artifacts in {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("{path} claims range [{start}, {end}) but stores {stored} values (index space holds {total})")]
    RangeMismatch {
        path: PathBuf,
        start: usize,
        end: usize,
        stored: usize,
        total: usize,
    },
    #[error("{path} is bit-identical to {previous} for channel {channel}; the same range was produced twice")]
    DuplicateRange {
        channel: String,
        path: PathBuf,
        previous: PathBuf,
    },
    #[error("index {index} of channel {channel} is written again by {path}")]
    DuplicateIndex {
        channel: String,
        path: PathBuf,
        index: usize,
    },
    #[error("no artifacts found in {0}")]
    NoArtifacts(PathBuf),
}

/// Element width of compiled value files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    F32,
    F64,
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "f32" => Ok(Self::F32),
            "f64" => Ok(Self::F64),
            other => Err(format!("unknown precision '{other}', expected f32 or f64")),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
        })
    }
}

/// What to do when an index is written by more than one artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Keep the later value and count the duplicate.
    #[default]
    Overwrite,
    /// Fail on the first duplicated index.
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown duplicate policy '{other}', expected overwrite or reject")),
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Overwrite => "overwrite",
            Self::Reject => "reject",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompileOptions {
    pub space: PairSpace,
    pub precision: Precision,
    pub duplicate_policy: DuplicatePolicy,
}

impl CompileOptions {
    pub fn new(space: PairSpace) -> Self {
        Self {
            space,
            precision: Precision::default(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

/// One artifact file found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredArtifact {
    pub name: ArtifactName,
    pub path: PathBuf,
}

fn artifact_order(a: &DiscoveredArtifact, b: &DiscoveredArtifact) -> Ordering {
    (a.name.start, a.name.end)
        .cmp(&(b.name.start, b.name.end))
        .then_with(|| natord::compare(&a.name.source, &b.name.source))
}

/// Finds every artifact in `dir`, grouped by channel and ordered by `(start, end, source)`.
/// Files whose names do not parse as artifacts are ignored.
pub fn discover(dir: &Path) -> Result<BTreeMap<String, Vec<DiscoveredArtifact>>, CompileError> {
    let io_err = |source| CompileError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut groups: BTreeMap<String, Vec<DiscoveredArtifact>> = BTreeMap::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if !entry.file_type().map_err(io_err)?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Ok(name) = file_name.parse::<ArtifactName>() else {
            continue;
        };
        groups
            .entry(name.channel.clone())
            .or_default()
            .push(DiscoveredArtifact {
                name,
                path: entry.path(),
            });
    }
    for group in groups.values_mut() {
        group.sort_by(artifact_order);
    }
    Ok(groups)
}

/// Tallies gathered while merging one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileCounts {
    /// Artifacts merged.
    pub merged: usize,
    /// Artifacts skipped for a range mismatch or an unreadable file.
    pub skipped: usize,
    /// Indices holding a value.
    pub set: usize,
    /// Writes to an index that already held a value.
    pub duplicates: usize,
    /// NaN values encountered; they are written but never mark their index set.
    pub nan: usize,
}

/// The dense result for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledChannel {
    pub channel: String,
    /// Zero at indices no artifact covered; the last value written everywhere else.
    pub values: Vec<f64>,
    pub is_set: Vec<bool>,
    pub counts: CompileCounts,
    pub duplicate_indices: Vec<usize>,
}

/// Paths written by [`CompiledChannel::persist`].
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedChannel {
    pub values: PathBuf,
    /// Present only when the result is incomplete.
    pub is_set: Option<PathBuf>,
}

impl CompiledChannel {
    fn empty(channel: &str, total: usize) -> Self {
        Self {
            channel: channel.to_string(),
            values: vec![0.0; total],
            is_set: vec![false; total],
            counts: CompileCounts::default(),
            duplicate_indices: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.values.len()
    }

    pub fn is_complete(&self) -> bool {
        self.counts.set == self.total()
    }

    /// Writes `{prefix}.{channel}.values` and, for incomplete results,
    /// `{prefix}.{channel}.isset`, shaped as the index space's output.
    pub fn persist(
        &self,
        out_dir: &Path,
        prefix: &str,
        space: PairSpace,
        precision: Precision,
    ) -> Result<PersistedChannel, CompileError> {
        let (rows, cols) = space.output_shape();
        let values_path = out_dir.join(format!("{prefix}.{}.values", self.channel));
        match precision {
            Precision::F32 => artifact::write_f32(&values_path, rows, cols, &self.values)?,
            Precision::F64 => artifact::write_f64(&values_path, rows, cols, &self.values)?,
        }

        let is_set_path = out_dir.join(format!("{prefix}.{}.isset", self.channel));
        let is_set = if self.is_complete() {
            // A mask left by an earlier, incomplete compile no longer applies.
            if is_set_path.exists() {
                fs::remove_file(&is_set_path).map_err(|e| ArtifactError::io(&is_set_path, e))?;
            }
            None
        } else {
            artifact::write_bool(&is_set_path, rows, cols, &self.is_set)?;
            Some(is_set_path)
        };
        Ok(PersistedChannel {
            values: values_path,
            is_set,
        })
    }
}

fn bit_identical(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

/// Merges one channel's ordered artifacts into a dense buffer of `total` entries.
fn merge_channel(
    channel: &str,
    artifacts: &[DiscoveredArtifact],
    total: usize,
    policy: DuplicatePolicy,
    observer: &mut dyn PairProgressObserver,
    merged_so_far: &mut usize,
) -> Result<CompiledChannel, CompileError> {
    let mut out = CompiledChannel::empty(channel, total);
    let mut previous: Option<(&Path, Vec<f64>)> = None;

    for artifact in artifacts {
        let ArtifactName { start, end, .. } = artifact.name;
        let stored = match artifact::read_values(&artifact.path) {
            Ok(stored) => stored.data,
            Err(e) => {
                warn!("skipping unreadable artifact: {e}");
                out.counts.skipped += 1;
                continue;
            }
        };
        if start >= end || end > total || stored.len() != end - start {
            let mismatch = CompileError::RangeMismatch {
                path: artifact.path.clone(),
                start,
                end,
                stored: stored.len(),
                total,
            };
            warn!("skipping artifact: {mismatch}");
            out.counts.skipped += 1;
            continue;
        }

        if let Some((previous_path, previous_data)) = &previous {
            if bit_identical(previous_data, &stored) {
                return Err(CompileError::DuplicateRange {
                    channel: channel.to_string(),
                    path: artifact.path.clone(),
                    previous: previous_path.to_path_buf(),
                });
            }
        }

        for (offset, &value) in stored.iter().enumerate() {
            let index = start + offset;
            if value.is_nan() {
                out.values[index] = value;
                out.counts.nan += 1;
                continue;
            }
            if out.is_set[index] {
                if policy == DuplicatePolicy::Reject {
                    return Err(CompileError::DuplicateIndex {
                        channel: channel.to_string(),
                        path: artifact.path.clone(),
                        index,
                    });
                }
                out.counts.duplicates += 1;
                out.duplicate_indices.push(index);
            } else {
                out.is_set[index] = true;
                out.counts.set += 1;
            }
            out.values[index] = value;
        }

        out.counts.merged += 1;
        *merged_so_far += 1;
        observer.on_stage_advance(PairProgressStage::Compile, *merged_so_far);
        previous = Some((artifact.path.as_path(), stored));
    }
    Ok(out)
}

/// Compiles every channel found in `dir` over `options.space`.
///
/// Channels come back in name order. Nothing is written; see [`CompiledChannel::persist`].
pub fn compile_dir(
    dir: &Path,
    options: &CompileOptions,
    observer: &mut dyn PairProgressObserver,
) -> Result<Vec<CompiledChannel>, CompileError> {
    let groups = discover(dir)?;
    if groups.is_empty() {
        return Err(CompileError::NoArtifacts(dir.to_path_buf()));
    }
    let total = options.space.total();
    let artifact_total: usize = groups.values().map(Vec::len).sum();
    info!(
        "compiling {artifact_total} artifacts across {} channels over {}",
        groups.len(),
        options.space
    );
    observer.on_stage_start(PairProgressStage::Compile, artifact_total);

    let mut merged_so_far = 0;
    let mut compiled = Vec::with_capacity(groups.len());
    for (channel, artifacts) in &groups {
        let result = merge_channel(
            channel,
            artifacts,
            total,
            options.duplicate_policy,
            observer,
            &mut merged_so_far,
        )?;
        log_counts(&result);
        compiled.push(result);
    }
    observer.on_stage_finish(PairProgressStage::Compile);
    Ok(compiled)
}

fn log_counts(result: &CompiledChannel) {
    let CompileCounts {
        merged,
        skipped,
        set,
        duplicates,
        nan,
    } = result.counts;
    let total = result.total();
    info!(
        "{}: {merged} artifacts merged, {set} of {total} set, {nan} NaN, {duplicates} duplicates",
        result.channel
    );
    if skipped > 0 {
        warn!("{}: {skipped} artifacts skipped for range mismatch", result.channel);
    }
    if duplicates > 0 {
        warn!(
            "{}: {duplicates} indices written more than once; later artifacts won",
            result.channel
        );
    }
    if set < total {
        warn!("{}: result incomplete, {} indices unset", result.channel, total - set);
    }
}
