//! Column alignment of two matrices on shared sample identifiers.
//!
//! The cross-matrix variant pairs rows of two matrices whose columns describe the same
//! samples in possibly different orders. Alignment keeps the samples present in both,
//! in the order of the first matrix, and records them in a comma-joined title file that
//! is checked again before any cross computation.

use crate::matrix::{MaskedMatrix, MatrixError};
use ahash::AHashMap;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} must hold at least two comma-separated sample titles on its first line")]
    TooFewTitles { path: PathBuf },
    #[error("sample title '{title}' appears more than once in {path}")]
    DuplicateTitle { path: PathBuf, title: String },
    #[error("{which} matrix has {cols} columns but {titles} sample titles")]
    TitleCount {
        which: &'static str,
        cols: usize,
        titles: usize,
    },
    #[error("the two matrices share no sample titles")]
    NoSharedColumns,
    #[error("alignment mismatch: {titles} aligned titles, first matrix has {left} columns, second has {right}")]
    Unaligned {
        titles: usize,
        left: usize,
        right: usize,
    },
    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> AlignError + '_ {
    move |source| AlignError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads the comma-separated sample titles on the first line of `path`.
pub fn read_sample_titles(path: &Path) -> Result<Vec<String>, AlignError> {
    let text = fs::read_to_string(path).map_err(io_error(path))?;
    let first = text.lines().next().unwrap_or_default();
    let titles: Vec<String> = first.split(',').map(str::to_string).collect();
    if titles.len() < 2 {
        return Err(AlignError::TooFewTitles {
            path: path.to_path_buf(),
        });
    }
    let mut seen = AHashMap::with_capacity(titles.len());
    for (idx, title) in titles.iter().enumerate() {
        if seen.insert(title.as_str(), idx).is_some() {
            return Err(AlignError::DuplicateTitle {
                path: path.to_path_buf(),
                title: title.clone(),
            });
        }
    }
    Ok(titles)
}

/// Two column-aligned matrices; `first` never has more rows than `second`.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub first: MaskedMatrix,
    pub second: MaskedMatrix,
    pub titles: Vec<String>,
    /// True when the inputs were swapped to put the smaller matrix first.
    pub swapped: bool,
}

/// Aligns the columns of two matrices on their shared sample titles.
pub fn align_columns(
    m1: &MaskedMatrix,
    titles1: &[String],
    m2: &MaskedMatrix,
    titles2: &[String],
) -> Result<Alignment, AlignError> {
    for (which, m, titles) in [("first", m1, titles1), ("second", m2, titles2)] {
        if m.ncols() != titles.len() {
            return Err(AlignError::TitleCount {
                which,
                cols: m.ncols(),
                titles: titles.len(),
            });
        }
    }

    let swapped = m1.nrows() > m2.nrows();
    let (m1, titles1, m2, titles2) = if swapped {
        info!(
            "first matrix has more rows ({}) than the second ({}); swapping so the smaller comes first",
            m1.nrows(),
            m2.nrows()
        );
        (m2, titles2, m1, titles1)
    } else {
        (m1, titles1, m2, titles2)
    };

    let lookup: AHashMap<&str, usize> = titles2
        .iter()
        .enumerate()
        .map(|(idx, title)| (title.as_str(), idx))
        .collect();
    let (cols1, cols2): (Vec<usize>, Vec<usize>) = titles1
        .iter()
        .enumerate()
        .filter_map(|(idx1, title)| lookup.get(title.as_str()).map(|&idx2| (idx1, idx2)))
        .unzip();
    if cols1.is_empty() {
        return Err(AlignError::NoSharedColumns);
    }
    info!(
        "aligned {} and {} columns to {} shared columns by sample title",
        titles1.len(),
        titles2.len(),
        cols1.len()
    );

    let first = m1.select_columns(&cols1)?;
    let second = m2.select_columns(&cols2)?;
    info!("first aligned: {}", first.summary());
    info!("second aligned: {}", second.summary());
    Ok(Alignment {
        first,
        second,
        titles: cols1.iter().map(|&idx| titles1[idx].clone()).collect(),
        swapped,
    })
}

/// Paths written by [`write_alignment`].
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPaths {
    pub first: PathBuf,
    pub second: PathBuf,
    pub titles: PathBuf,
}

/// Writes `{a}_aligned_with_{b}.matrix`, `{b}_aligned_with_{a}.matrix` and
/// `{a}_vs_{b}.coltitles.txt`, where `a` names the first matrix of the alignment.
pub fn write_alignment(
    alignment: &Alignment,
    name_a: &str,
    name_b: &str,
    out_dir: &Path,
) -> Result<AlignedPaths, AlignError> {
    fs::create_dir_all(out_dir).map_err(io_error(out_dir))?;
    let paths = AlignedPaths {
        first: out_dir.join(format!("{name_a}_aligned_with_{name_b}.matrix")),
        second: out_dir.join(format!("{name_b}_aligned_with_{name_a}.matrix")),
        titles: out_dir.join(format!("{name_a}_vs_{name_b}.coltitles.txt")),
    };
    alignment.first.save(&paths.first)?;
    alignment.second.save(&paths.second)?;
    let mut line = alignment.titles.join(",");
    line.push('\n');
    fs::write(&paths.titles, line).map_err(io_error(&paths.titles))?;
    info!(
        "wrote {} aligned column titles to {}",
        alignment.titles.len(),
        paths.titles.display()
    );
    Ok(paths)
}

/// Checks that both matrices have exactly one column per aligned title.
pub fn verify_alignment(
    titles_path: &Path,
    first: &MaskedMatrix,
    second: &MaskedMatrix,
) -> Result<Vec<String>, AlignError> {
    let titles = read_sample_titles(titles_path)?;
    if first.ncols() != titles.len() || second.ncols() != titles.len() {
        return Err(AlignError::Unaligned {
            titles: titles.len(),
            left: first.ncols(),
            right: second.ncols(),
        });
    }
    Ok(titles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn titles(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn shared_titles_keep_first_matrix_order() {
        let m1 = MaskedMatrix::dense(array![[1.0, 2.0, 3.0, 4.0]]).unwrap();
        let m2 = MaskedMatrix::dense(array![[10.0, 20.0, 30.0], [40.0, 50.0, 60.0]]).unwrap();
        let aligned = align_columns(
            &m1,
            &titles(&["s1", "s2", "s3", "s4"]),
            &m2,
            &titles(&["s4", "s9", "s2"]),
        )
        .unwrap();
        assert!(!aligned.swapped);
        assert_eq!(aligned.titles, titles(&["s2", "s4"]));
        assert_eq!(aligned.first.values(), &array![[2.0, 4.0]]);
        assert_eq!(aligned.second.values(), &array![[30.0, 10.0], [60.0, 40.0]]);
    }

    #[test]
    fn larger_first_matrix_is_swapped() {
        let big = MaskedMatrix::dense(array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        let small = MaskedMatrix::dense(array![[5.0, 6.0]]).unwrap();
        let aligned = align_columns(&big, &titles(&["a", "b"]), &small, &titles(&["b", "a"])).unwrap();
        assert!(aligned.swapped);
        assert_eq!(aligned.first.nrows(), 1);
        assert_eq!(aligned.titles, titles(&["b", "a"]));
        assert_eq!(aligned.second.values(), &array![[2.0, 1.0], [4.0, 3.0]]);
    }

    #[test]
    fn title_files_are_validated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("titles.txt");
        fs::write(&path, "only\n").unwrap();
        assert!(matches!(read_sample_titles(&path), Err(AlignError::TooFewTitles { .. })));
        fs::write(&path, "a,b,a\n").unwrap();
        assert!(matches!(read_sample_titles(&path), Err(AlignError::DuplicateTitle { .. })));
        fs::write(&path, "a,b,c\nignored\n").unwrap();
        assert_eq!(read_sample_titles(&path).unwrap(), titles(&["a", "b", "c"]));
    }

    #[test]
    fn written_alignment_verifies() {
        let dir = tempdir().unwrap();
        let m1 = MaskedMatrix::dense(array![[1.0, 2.0, 3.0]]).unwrap();
        let m2 = MaskedMatrix::dense(array![[4.0, 5.0], [6.0, 7.0]]).unwrap();
        let aligned = align_columns(&m1, &titles(&["x", "y", "z"]), &m2, &titles(&["z", "x"])).unwrap();
        let paths = write_alignment(&aligned, "mrna", "mirna", dir.path()).unwrap();
        assert_eq!(paths.titles, dir.path().join("mrna_vs_mirna.coltitles.txt"));
        assert_eq!(fs::read_to_string(&paths.titles).unwrap(), "x,z\n");

        let first = MaskedMatrix::load(&paths.first).unwrap();
        let second = MaskedMatrix::load(&paths.second).unwrap();
        assert_eq!(verify_alignment(&paths.titles, &first, &second).unwrap().len(), 2);
        assert!(matches!(
            verify_alignment(&paths.titles, &m1, &second),
            Err(AlignError::Unaligned { .. })
        ));
    }

    #[test]
    fn disjoint_titles_are_an_error() {
        let m = MaskedMatrix::dense(array![[1.0, 2.0]]).unwrap();
        assert!(matches!(
            align_columns(&m, &titles(&["a", "b"]), &m, &titles(&["c", "d"])),
            Err(AlignError::NoSharedColumns)
        ));
    }
}
