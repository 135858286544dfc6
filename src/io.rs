//! JSON Lines row files: one JSON object per line.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("read failed at line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid row at line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),
    #[error("cannot encode row: {0}")]
    Encode(#[from] serde_json::Error),
}

pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, RowError> {
    let file = File::open(path).map_err(|source| RowError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    read_rows_from(BufReader::new(file))
}

/// Parse every non-blank line. Line numbers in errors are 1-based.
pub fn read_rows_from<T: DeserializeOwned, R: BufRead>(reader: R) -> Result<Vec<T>, RowError> {
    let mut rows = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|source| RowError::Read {
            line: line_no,
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|source| RowError::Parse {
            line: line_no,
            source,
        })?;
        rows.push(row);
    }
    Ok(rows)
}

pub fn write_rows_to<T: Serialize, W: Write>(mut writer: W, rows: &[T]) -> Result<(), RowError> {
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Write rows to `path`, or to stdout when no path is given.
pub fn write_output<T: Serialize>(path: Option<&Path>, rows: &[T]) -> Result<(), RowError> {
    match path {
        Some(path) => {
            let file = File::create(path).map_err(|source| RowError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            write_rows_to(BufWriter::new(file), rows)
        }
        None => write_rows_to(std::io::stdout().lock(), rows),
    }
}
