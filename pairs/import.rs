// ========================================================================================
//                         Tab-delimited text to masked matrices
// ========================================================================================
//
// Input rows look like `name<TAB>v1<TAB>v2...`. Lines that are blank or start with `#` are
// skipped. A field is missing when it is empty or equals one of the configured missing
// tokens; every other field must parse as a float. The row names become the variable
// list, written next to the binary matrix.

use crate::matrix::{MaskedMatrix, MatrixError};
use ahash::AHashSet;
use log::info;
use ndarray::Array2;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read tab-delimited input: {0}")]
    Csv(#[from] csv::Error),
    #[error("line {line}: expected {expected} values but found {found}")]
    Ragged {
        line: u64,
        expected: usize,
        found: usize,
    },
    #[error("line {line}, column {column}: '{token}' is neither a number nor a missing-value token")]
    Value {
        line: u64,
        column: usize,
        token: String,
    },
    #[error("line {line} has a variable name but no values")]
    NoValues { line: u64 },
    #[error("input contains no data rows")]
    Empty,
    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOptions {
    pub missing_tokens: Vec<String>,
    /// Rebuild outputs even when both already exist.
    pub overwrite: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            missing_tokens: crate::config::DEFAULT_MISSING_TOKENS
                .iter()
                .map(|t| t.to_string())
                .collect(),
            overwrite: false,
        }
    }
}

#[derive(Debug)]
pub struct ImportedMatrix {
    pub matrix: MaskedMatrix,
    pub variables: Vec<String>,
    pub matrix_path: PathBuf,
    pub varlist_path: PathBuf,
    /// True when existing outputs were loaded instead of rebuilt.
    pub reused: bool,
}

/// Parses tab-delimited rows into variable names and a masked matrix.
pub fn parse_tab<R: Read>(reader: R, missing_tokens: &[String]) -> Result<(Vec<String>, MaskedMatrix), ImportError> {
    let missing: AHashSet<&[u8]> = missing_tokens.iter().map(|t| t.as_bytes()).collect();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .comment(Some(b'#'))
        .from_reader(reader);

    let mut variables = Vec::new();
    let mut values = Vec::new();
    let mut mask = Vec::new();
    let mut width: Option<usize> = None;
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        let line = record.position().map_or(0, |p| p.line());
        let Some(name) = record.get(0) else {
            continue;
        };
        let fields = record.len() - 1;
        if fields == 0 {
            return Err(ImportError::NoValues { line });
        }
        match width {
            None => width = Some(fields),
            Some(expected) if expected != fields => {
                return Err(ImportError::Ragged {
                    line,
                    expected,
                    found: fields,
                });
            }
            Some(_) => {}
        }

        variables.push(String::from_utf8_lossy(name).into_owned());
        for (column, field) in record.iter().skip(1).enumerate() {
            if field.is_empty() || missing.contains(field) {
                values.push(0.0);
                mask.push(true);
                continue;
            }
            let value = lexical_core::parse::<f64>(field).map_err(|_| ImportError::Value {
                line,
                column: column + 1,
                token: String::from_utf8_lossy(field).into_owned(),
            })?;
            values.push(value);
            mask.push(false);
        }
    }

    let cols = width.ok_or(ImportError::Empty)?;
    let rows = variables.len();
    let matrix = MaskedMatrix::new(
        Array2::from_shape_vec((rows, cols), values).map_err(MatrixError::from)?,
        Array2::from_shape_vec((rows, cols), mask).map_err(MatrixError::from)?,
    )?;
    Ok((variables, matrix))
}

/// Output paths for `tabfile` in `outdir`: `{stem}.matrix` and `{stem}.varlist.txt`.
pub fn output_paths(tabfile: &Path, outdir: &Path) -> (PathBuf, PathBuf) {
    let stem = tabfile
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "matrix".to_string());
    (
        outdir.join(format!("{stem}.matrix")),
        outdir.join(format!("{stem}.varlist.txt")),
    )
}

/// Imports `tabfile` into `outdir`, reusing existing outputs unless `options.overwrite`.
pub fn import_tab(tabfile: &Path, outdir: &Path, options: &ImportOptions) -> Result<ImportedMatrix, ImportError> {
    let (matrix_path, varlist_path) = output_paths(tabfile, outdir);
    if !options.overwrite && matrix_path.exists() && varlist_path.exists() {
        info!(
            "both {} and {} exist, reusing them",
            matrix_path.display(),
            varlist_path.display()
        );
        let matrix = MaskedMatrix::load(&matrix_path)?;
        let variables = read_varlist(&varlist_path)?;
        return Ok(ImportedMatrix {
            matrix,
            variables,
            matrix_path,
            varlist_path,
            reused: true,
        });
    }

    info!("loading {} into a masked matrix and variable list", tabfile.display());
    let file = File::open(tabfile).map_err(|source| ImportError::Io {
        path: tabfile.to_path_buf(),
        source,
    })?;
    let (variables, matrix) = parse_tab(file, &options.missing_tokens)?;
    info!("{}", matrix.summary());

    fs::create_dir_all(outdir).map_err(|source| ImportError::Io {
        path: outdir.to_path_buf(),
        source,
    })?;
    matrix.save(&matrix_path)?;
    let mut listing = variables.join("\n");
    listing.push('\n');
    fs::write(&varlist_path, listing).map_err(|source| ImportError::Io {
        path: varlist_path.clone(),
        source,
    })?;

    Ok(ImportedMatrix {
        matrix,
        variables,
        matrix_path,
        varlist_path,
        reused: false,
    })
}

/// Reads a variable list, one name per line.
pub fn read_varlist(path: &Path) -> Result<Vec<String>, ImportError> {
    let text = fs::read_to_string(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text.lines().map(str::to_string).collect())
}
