//! CSV output for classification runs.
//!
//! A run writes two files: a header file holding `uuid,<label>...` and a
//! data file with one row per successful classification, in input order.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use retrieval_types::{Classification, RetrievalError};
use tracing::debug;

/// Name of the identifier column.
pub const ID_COLUMN: &str = "uuid";

/// Create the parent directory of `path` if it has one.
pub fn ensure_parent_dir(path: &Path) -> Result<(), RetrievalError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Write the header file for the given label order.
pub fn write_header_file(path: &Path, labels: &[String]) -> Result<(), RetrievalError> {
    ensure_parent_dir(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    write_row(&mut writer, ID_COLUMN, labels.iter().map(|l| escape(l)))?;
    writer.flush()?;
    Ok(())
}

fn write_row<W: Write>(
    writer: &mut W,
    first: &str,
    rest: impl Iterator<Item = String>,
) -> Result<(), RetrievalError> {
    let mut line = escape(first);
    for field in rest {
        line.push(',');
        line.push_str(&field);
    }
    line.push('\n');
    writer.write_all(line.as_bytes())?;
    Ok(())
}

/// Streaming writer of classification rows.
pub struct CsvResultSink<W: Write> {
    writer: W,
    labels: Vec<String>,
    rows: u64,
}

impl CsvResultSink<BufWriter<File>> {
    /// Create (truncating) the data file at `path`.
    pub fn create(path: &Path, labels: Vec<String>) -> Result<Self, RetrievalError> {
        ensure_parent_dir(path)?;
        Ok(Self::new(BufWriter::new(File::create(path)?), labels))
    }
}

impl<W: Write> CsvResultSink<W> {
    pub fn new(writer: W, labels: Vec<String>) -> Self {
        Self {
            writer,
            labels,
            rows: 0,
        }
    }

    /// Append one row. Every header label must have a score.
    pub fn write(&mut self, classification: &Classification) -> Result<(), RetrievalError> {
        let mut scores = Vec::with_capacity(self.labels.len());
        for label in &self.labels {
            let score = classification.score(label).ok_or_else(|| {
                RetrievalError::InvalidArgument(format!(
                    "classification of '{}' has no score for label '{}'",
                    classification.id, label
                ))
            })?;
            scores.push(score.to_string());
        }
        write_row(&mut self.writer, classification.id.as_str(), scores.into_iter())?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush and return the writer with the number of rows written.
    pub fn finish(mut self) -> Result<(W, u64), RetrievalError> {
        self.writer.flush()?;
        debug!(rows = self.rows, "CSV sink finished");
        Ok((self.writer, self.rows))
    }
}
