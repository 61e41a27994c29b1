// ========================================================================================
//                           Artifact names and binary files
// ========================================================================================
//
// A batch worker writes one file per statistic channel, named
// `{source}_{start}_{end}.{channel}`. The name is the only record of which slice of the
// global index space the file covers, so it is parsed and formatted in exactly one place.
//
// All numeric files share a fixed 32-byte header followed by a little-endian,
// row-major payload:
//
//   bytes 0..8    magic
//   byte  8       element kind (1 = f64, 2 = f32, 3 = bool as u8)
//   bytes 9..16   reserved, zero
//   bytes 16..24  rows (u64)
//   bytes 24..32  cols (u64)

use memmap2::Mmap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const VECTOR_MAGIC: [u8; 8] = *b"DEPMATV1";
pub const MATRIX_MAGIC: [u8; 8] = *b"DEPMATM1";
pub const HEADER_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is not a depmat file (bad magic)")]
    BadMagic { path: PathBuf },
    #[error("{path} holds element kind {found}, expected {expected}")]
    WrongKind {
        path: PathBuf,
        expected: ElementKind,
        found: u8,
    },
    #[error("{path} is truncated or oversized: expected {expected} payload bytes, found {actual}")]
    PayloadLength {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("{path} declares a {rows} x {cols} shape whose payload size does not fit in memory")]
    ShapeOverflow { path: PathBuf, rows: u64, cols: u64 },
    #[error("'{0}' is not a valid artifact name")]
    InvalidName(String),
}

impl ArtifactError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The element types a numeric file can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    F64,
    F32,
    Bool,
}

impl ElementKind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Self::F64 => 1,
            Self::F32 => 2,
            Self::Bool => 3,
        }
    }

    fn width(self) -> usize {
        match self {
            Self::F64 => 8,
            Self::F32 => 4,
            Self::Bool => 1,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::F64 => "f64",
            Self::F32 => "f32",
            Self::Bool => "bool",
        };
        f.write_str(label)
    }
}

// ----------------------------------------------------------------------------------------
// Artifact names
// ----------------------------------------------------------------------------------------

/// The typed form of an artifact file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName {
    pub source: String,
    pub start: usize,
    pub end: usize,
    pub channel: String,
}

impl ArtifactName {
    pub fn new(source: impl Into<String>, start: usize, end: usize, channel: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            start,
            end,
            channel: channel.into(),
        }
    }

    /// The batch stem shared by every channel of one batch: `{source}_{start}_{end}`.
    pub fn batch_stem(&self) -> String {
        format!("{}_{}_{}", self.source, self.start, self.end)
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.to_string())
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.batch_stem(), self.channel)
    }
}

impl FromStr for ArtifactName {
    type Err = ArtifactError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let invalid = || ArtifactError::InvalidName(name.to_string());

        let (stem, channel) = name.rsplit_once('.').ok_or_else(invalid)?;
        if !is_channel_name(channel) {
            return Err(invalid());
        }
        let (rest, end) = stem.rsplit_once('_').ok_or_else(invalid)?;
        let (source, start) = rest.rsplit_once('_').ok_or_else(invalid)?;
        if source.is_empty() || !is_decimal(start) || !is_decimal(end) {
            return Err(invalid());
        }
        let start = start.parse().map_err(|_| invalid())?;
        let end = end.parse().map_err(|_| invalid())?;

        Ok(Self::new(source, start, end, channel))
    }
}

/// Channel names are restricted to `[A-Za-z0-9_]+` so they can act as a file suffix.
pub fn is_channel_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// True when `source` names artifacts that parse back to the same source: non-empty and
/// free of path separators.
pub fn is_source_name(source: &str) -> bool {
    !source.is_empty()
        && !source.contains(['/', '\\'])
        && ArtifactName::new(source, 0, 1, "X")
            .to_string()
            .parse::<ArtifactName>()
            .is_ok_and(|parsed| parsed.source == source)
}

fn is_decimal(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

// ----------------------------------------------------------------------------------------
// Binary files
// ----------------------------------------------------------------------------------------

/// A dense array read back from disk, with its recorded shape.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArray<T> {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<T>,
}

pub(crate) fn header(magic: [u8; 8], kind: ElementKind, rows: usize, cols: usize) -> [u8; HEADER_LEN] {
    let mut bytes = [0u8; HEADER_LEN];
    bytes[0..8].copy_from_slice(&magic);
    bytes[8] = kind.tag();
    bytes[16..24].copy_from_slice(&(rows as u64).to_le_bytes());
    bytes[24..32].copy_from_slice(&(cols as u64).to_le_bytes());
    bytes
}

/// Writes `path` through a sibling temporary file that is renamed into place, so an
/// interrupted writer never leaves a file that looks complete.
pub(crate) fn write_atomically<F>(path: &Path, fill: F) -> Result<(), ArtifactError>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| ArtifactError::io(parent, e))?;
        }
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".partial");
    let tmp_path = PathBuf::from(tmp_name);

    let result = (|| {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        fill(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok::<(), io::Error>(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(ArtifactError::io(path, e));
    }
    fs::rename(&tmp_path, path).map_err(|e| ArtifactError::io(path, e))
}

pub fn write_f64(path: &Path, rows: usize, cols: usize, values: &[f64]) -> Result<(), ArtifactError> {
    debug_assert_eq!(rows * cols, values.len());
    write_atomically(path, |w| {
        w.write_all(&header(VECTOR_MAGIC, ElementKind::F64, rows, cols))?;
        for v in values {
            w.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    })
}

pub fn write_f32(path: &Path, rows: usize, cols: usize, values: &[f64]) -> Result<(), ArtifactError> {
    debug_assert_eq!(rows * cols, values.len());
    write_atomically(path, |w| {
        w.write_all(&header(VECTOR_MAGIC, ElementKind::F32, rows, cols))?;
        for &v in values {
            w.write_all(&(v as f32).to_le_bytes())?;
        }
        Ok(())
    })
}

pub fn write_bool(path: &Path, rows: usize, cols: usize, values: &[bool]) -> Result<(), ArtifactError> {
    debug_assert_eq!(rows * cols, values.len());
    write_atomically(path, |w| {
        w.write_all(&header(VECTOR_MAGIC, ElementKind::Bool, rows, cols))?;
        for &v in values {
            w.write_all(&[u8::from(v)])?;
        }
        Ok(())
    })
}

/// Memory-maps `path` and checks the header. Returns the map with its shape; the payload
/// starts at [`HEADER_LEN`].
pub(crate) fn map_checked(
    path: &Path,
    magic: [u8; 8],
    kind: ElementKind,
    trailing_bytes_per_cell: usize,
) -> Result<(Mmap, usize, usize), ArtifactError> {
    let file = File::open(path).map_err(|e| ArtifactError::io(path, e))?;
    // The file is only read, and artifacts are never rewritten in place.
    let mmap = unsafe { Mmap::map(&file).map_err(|e| ArtifactError::io(path, e))? };

    if mmap.len() < HEADER_LEN || mmap[0..8] != magic {
        return Err(ArtifactError::BadMagic {
            path: path.to_path_buf(),
        });
    }
    if mmap[8] != kind.tag() {
        return Err(ArtifactError::WrongKind {
            path: path.to_path_buf(),
            expected: kind,
            found: mmap[8],
        });
    }
    let (raw_rows, raw_cols) = (read_u64(&mmap[16..24]), read_u64(&mmap[24..32]));
    let overflow = || ArtifactError::ShapeOverflow {
        path: path.to_path_buf(),
        rows: raw_rows,
        cols: raw_cols,
    };
    let rows = usize::try_from(raw_rows).map_err(|_| overflow())?;
    let cols = usize::try_from(raw_cols).map_err(|_| overflow())?;
    let expected = rows
        .checked_mul(cols)
        .and_then(|cells| cells.checked_mul(kind.width() + trailing_bytes_per_cell))
        .ok_or_else(overflow)?;
    let actual = mmap.len() - HEADER_LEN;
    if expected != actual {
        return Err(ArtifactError::PayloadLength {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok((mmap, rows, cols))
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

pub(crate) fn decode_f64(payload: &[u8]) -> Vec<f64> {
    payload
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect()
}

/// Reads a numeric file of either float width, widening f32 to f64.
pub fn read_values(path: &Path) -> Result<StoredArray<f64>, ArtifactError> {
    let kind = peek_kind(path)?;
    match kind {
        ElementKind::F32 => {
            let (mmap, rows, cols) = map_checked(path, VECTOR_MAGIC, ElementKind::F32, 0)?;
            let data = mmap[HEADER_LEN..]
                .chunks_exact(4)
                .map(|chunk| {
                    let mut buf = [0u8; 4];
                    buf.copy_from_slice(chunk);
                    f64::from(f32::from_le_bytes(buf))
                })
                .collect();
            Ok(StoredArray { rows, cols, data })
        }
        _ => {
            let (mmap, rows, cols) = map_checked(path, VECTOR_MAGIC, ElementKind::F64, 0)?;
            Ok(StoredArray {
                rows,
                cols,
                data: decode_f64(&mmap[HEADER_LEN..]),
            })
        }
    }
}

pub fn read_bool(path: &Path) -> Result<StoredArray<bool>, ArtifactError> {
    let (mmap, rows, cols) = map_checked(path, VECTOR_MAGIC, ElementKind::Bool, 0)?;
    Ok(StoredArray {
        rows,
        cols,
        data: mmap[HEADER_LEN..].iter().map(|&b| b != 0).collect(),
    })
}

fn peek_kind(path: &Path) -> Result<ElementKind, ArtifactError> {
    let mut head = [0u8; HEADER_LEN];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut head))
        .map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ArtifactError::BadMagic {
                path: path.to_path_buf(),
            },
            _ => ArtifactError::io(path, e),
        })?;
    if head[0..8] != VECTOR_MAGIC {
        return Err(ArtifactError::BadMagic {
            path: path.to_path_buf(),
        });
    }
    Ok(if head[8] == ElementKind::F32.tag() {
        ElementKind::F32
    } else {
        ElementKind::F64
    })
}
