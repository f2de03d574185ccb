use anyhow::{Context, Result, bail};
use csv::{Reader, Writer, WriterBuilder};
use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use crate::{
    batch::{RowSink, UnmatchedRow},
    checkpoint::Checkpoint,
    common::ensure_parent_dir,
    projector::OutputRow,
};

/// Streams output rows to CSV as each input row finishes, then marks the row
/// done in the checkpoint. The header is fixed up front so rows appended by a
/// resumed run line up with the earlier ones.
pub struct CsvRowSink<'a> {
    writer: Writer<File>,
    headers: Vec<String>,
    path: PathBuf,
    checkpoint: Option<&'a Checkpoint>,
    rows_written: usize,
}

impl<'a> CsvRowSink<'a> {
    /// Truncates `path` unless `append` is set and the file already holds a
    /// header, in which case that header must equal `headers`.
    pub fn create(
        path: &Path,
        headers: Vec<String>,
        append: bool,
        checkpoint: Option<&'a Checkpoint>,
    ) -> Result<Self> {
        ensure_parent_dir(path)?;
        let existing = if append {
            existing_header(path)?
        } else {
            None
        };

        let writer = match existing {
            Some(found) => {
                if found != headers {
                    bail!(
                        "Existing output {} has different columns; remove it or start a fresh run",
                        path.display()
                    );
                }
                let file = OpenOptions::new()
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed opening output {} for append", path.display()))?;
                tracing::info!(path = %path.display(), "appending to existing output");
                WriterBuilder::new().has_headers(false).from_writer(file)
            }
            None => {
                let mut writer = Writer::from_path(path)
                    .with_context(|| format!("Failed creating output CSV {}", path.display()))?;
                writer
                    .write_record(&headers)
                    .context("Failed writing output CSV header")?;
                writer.flush().context("Failed flushing output CSV header")?;
                writer
            }
        };

        Ok(Self {
            writer,
            headers,
            path: path.to_path_buf(),
            checkpoint,
            rows_written: 0,
        })
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}

impl RowSink for CsvRowSink<'_> {
    fn row_finished(&mut self, row_index: usize, rows: &[OutputRow]) -> Result<()> {
        for row in rows {
            let record: Vec<&str> = self
                .headers
                .iter()
                .map(|h| row.get(h).unwrap_or(""))
                .collect();
            self.writer
                .write_record(&record)
                .with_context(|| format!("Failed writing output row for NPI {}", row.npi))?;
        }
        self.writer
            .flush()
            .with_context(|| format!("Failed flushing output CSV {}", self.path.display()))?;
        self.rows_written += rows.len();

        if let Some(checkpoint) = self.checkpoint {
            let npis: Vec<&str> = rows.iter().map(|r| r.npi.as_str()).collect();
            checkpoint.record_row(row_index, &npis)?;
        }
        Ok(())
    }
}

fn existing_header(path: &Path) -> Result<Option<Vec<String>>> {
    let has_content = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    if !has_content {
        return Ok(None);
    }
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed opening existing output {}", path.display()))?;
    let header = reader
        .headers()
        .with_context(|| format!("Failed reading header of {}", path.display()))?;
    Ok(Some(header.iter().map(str::to_string).collect()))
}

/// Writes the rows that produced no output. A fresh log goes through a temp
/// file; with `append` the rows are added to an existing log.
pub fn write_unmatched_log(unmatched: &[UnmatchedRow], path: &Path, append: bool) -> Result<()> {
    ensure_parent_dir(path)?;
    let header = ["row_number", "provider", "reason"];

    if append && existing_header(path)?.is_some() {
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("Failed opening unmatched log {} for append", path.display()))?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        write_unmatched_rows(&mut writer, unmatched)?;
        writer.flush().context("Failed flushing unmatched log")?;
        return Ok(());
    }

    let file_name = path
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or("unmatched.csv");
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
    let mut writer = Writer::from_path(&tmp_path)
        .with_context(|| format!("Failed creating temp unmatched log {}", tmp_path.display()))?;
    writer
        .write_record(header)
        .context("Failed writing unmatched log header")?;
    write_unmatched_rows(&mut writer, unmatched)?;
    writer.flush().context("Failed flushing unmatched log")?;

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "Failed moving temp unmatched log {} to {}",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

fn write_unmatched_rows(writer: &mut Writer<File>, unmatched: &[UnmatchedRow]) -> Result<()> {
    for item in unmatched {
        writer
            .write_record([
                item.row_number.to_string().as_str(),
                item.label.as_str(),
                item.reason.as_str(),
            ])
            .with_context(|| format!("Failed writing unmatched row {}", item.row_number))?;
    }
    Ok(())
}
