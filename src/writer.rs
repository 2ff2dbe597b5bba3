//! Streaming Parquet writer with atomic finalization.
//!
//! Rows are buffered up to the batch size and then appended to the file as a
//! row group. The file is opened lazily on the first flush, so a run without rows
//! leaves nothing behind, and also clears any file an earlier run left at the
//! final path. All writes go to `<final>.tmp`; only a successful `finish` renames
//! it to the final path. Aborting, or dropping an unfinished writer, deletes the
//! temporary file.

use crate::builders::{polars_schema, DataFrameBuilder};
use crate::error::Result;
use crate::projector::Row;
use polars::io::parquet::write::BatchedWriter;
use polars::prelude::*;
use std::ffi::OsString;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffix appended to the final path while a file is being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Returns the temporary path used while writing `final_path`.
pub fn temp_path_for(final_path: &Path) -> PathBuf {
    let mut name = OsString::from(final_path.as_os_str());
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Removes a temporary file left behind by an interrupted run.
///
/// Returns true if a stale file was found and deleted.
pub fn remove_stale_temp(final_path: &Path) -> Result<bool> {
    match std::fs::remove_file(temp_path_for(final_path)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Batched, atomically committed Parquet writer for fixed-shape rows.
pub struct ColumnarWriter {
    final_path: PathBuf,
    temp_path: PathBuf,
    schema: Schema,
    compression: ParquetCompression,
    batch_size: usize,
    builder: DataFrameBuilder,
    writer: Option<BatchedWriter<File>>,
    /// Set as soon as the temporary file exists on disk.
    opened: bool,
    rows_written: u64,
    batches_written: u64,
    done: bool,
}

impl ColumnarWriter {
    /// Prepares a writer for `final_path`. No file is created yet.
    pub fn new(
        final_path: PathBuf,
        columns: &[String],
        batch_size: usize,
        compression: ParquetCompression,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            temp_path: temp_path_for(&final_path),
            final_path,
            schema: polars_schema(columns),
            compression,
            batch_size,
            builder: DataFrameBuilder::new(columns, batch_size),
            writer: None,
            opened: false,
            rows_written: 0,
            batches_written: 0,
            done: false,
        }
    }

    /// Buffers a row, flushing when the batch is full.
    ///
    /// Returns true if this call flushed a batch.
    pub fn push(&mut self, row: &Row) -> Result<bool> {
        self.builder.push_row(row);
        if self.builder.len() >= self.batch_size {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Writes any buffered rows as one batch, opening the file if needed.
    pub fn flush(&mut self) -> Result<()> {
        if self.builder.is_empty() {
            return Ok(());
        }

        let df = self.builder.take_frame()?;
        let rows = df.height() as u64;

        if self.writer.is_none() {
            debug!(path = %self.temp_path.display(), "Opening columnar writer");
            let file = File::create(&self.temp_path)?;
            self.opened = true;
            let writer = ParquetWriter::new(file)
                .with_compression(self.compression)
                .batched(&self.schema)?;
            self.writer = Some(writer);
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.write_batch(&df)?;
        }

        self.rows_written += rows;
        self.batches_written += 1;
        debug!(
            batch = self.batches_written,
            rows,
            total = self.rows_written,
            "Wrote batch"
        );
        Ok(())
    }

    /// Flushes the final batch, closes the file and renames it into place.
    ///
    /// Returns the final path, or `None` when no rows were ever written. In that
    /// case a file already at the final path is removed, since it belongs to an
    /// earlier run.
    pub fn finish(mut self) -> Result<Option<PathBuf>> {
        self.flush()?;

        let Some(mut writer) = self.writer.take() else {
            self.done = true;
            self.remove_previous_output()?;
            return Ok(None);
        };

        writer.finish()?;
        drop(writer);
        File::open(&self.temp_path)?.sync_all()?;
        std::fs::rename(&self.temp_path, &self.final_path)?;

        self.done = true;
        Ok(Some(self.final_path.clone()))
    }

    fn remove_previous_output(&self) -> Result<()> {
        match std::fs::remove_file(&self.final_path) {
            Ok(()) => {
                warn!(
                    path = %self.final_path.display(),
                    "No rows written; removed output left by a previous run"
                );
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Discards all output: closes the file and deletes the temporary path.
    pub fn abort(mut self) {
        self.cleanup();
    }

    fn cleanup(&mut self) {
        if self.done {
            return;
        }
        self.done = true;

        // Close the file handle before deleting.
        drop(self.writer.take());
        if !self.opened {
            return;
        }
        match std::fs::remove_file(&self.temp_path) {
            Ok(()) => debug!(path = %self.temp_path.display(), "Removed partial output"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.temp_path.display(),
                error = %e,
                "Failed to remove partial output"
            ),
        }
    }

    /// Rows written to the file so far (excluding buffered rows).
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Rows waiting in the current batch.
    pub fn buffered_rows(&self) -> usize {
        self.builder.len()
    }

    /// Returns true once the underlying file has been created.
    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }
}

impl Drop for ColumnarWriter {
    fn drop(&mut self) {
        self.cleanup();
    }
}
