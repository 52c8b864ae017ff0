//! Streaming writer for the join export.
//!
//! Rows are decoded from the query engine's CSV, converted to [`JoinRow`]s,
//! re-encoded and gzip-compressed into a [`StagedFile`], one row at a time.
//! Nothing is buffered beyond the encoder's window, so memory stays flat no
//! matter how many settlements the extract holds.

use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::PathBuf;

use flate2::write::GzEncoder;
use flate2::Compression;
use indicatif::ProgressBar;
use tracing::{debug, warn};

use super::cancel::CancelFlag;
use super::error::StageError;
use super::publish::StagedFile;
use crate::domain::{JoinRow, RawJoinRow, EXPORT_HEADER};

/// Rows between progress updates
const PROGRESS_INTERVAL: u64 = 10_000;

/// Counts from one export stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Rows written to the export
    pub rows: u64,

    /// Rows skipped because they could not be converted
    pub rejected: u64,

    /// Rows written with an empty admin level
    pub unleveled: u64,
}

/// Compressed CSV export being written to a temporary file
pub struct ExportSink {
    staged: StagedFile,
    writer: csv::Writer<GzEncoder<BufWriter<File>>>,
    summary: ExportSummary,
}

impl ExportSink {
    /// Start a new export for `target`; the header row is written immediately
    pub fn create(target: impl Into<PathBuf>) -> io::Result<Self> {
        let staged = StagedFile::new(target)?;
        let file = staged.file().try_clone()?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(encoder);
        writer.write_record(EXPORT_HEADER).map_err(csv_to_io)?;

        Ok(Self {
            staged,
            writer,
            summary: ExportSummary::default(),
        })
    }

    /// Append one converted row
    pub fn write_row(&mut self, row: &JoinRow) -> io::Result<()> {
        self.writer.serialize(row).map_err(csv_to_io)?;
        self.summary.rows += 1;
        Ok(())
    }

    /// Drain the query engine's CSV output into the export.
    ///
    /// `source` must start with a header naming the [`RawJoinRow`] columns.
    /// Stops with `PartialStream` on a read or decode error and with
    /// `Interrupted` once `cancel` is set.
    pub fn write_from<R: Read>(
        &mut self,
        stage: &str,
        source: R,
        cancel: &CancelFlag,
        progress: &ProgressBar,
    ) -> Result<ExportSummary, StageError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(source);

        for result in reader.deserialize::<RawJoinRow>() {
            if cancel.is_cancelled() {
                return Err(StageError::Interrupted {
                    stage: stage.to_string(),
                });
            }

            let raw = result.map_err(|e| self.partial(stage, e.to_string()))?;
            match JoinRow::try_from(raw) {
                Ok(row) => {
                    if row.boundary_admin_level.is_none() {
                        self.summary.unleveled += 1;
                        debug!(
                            stage,
                            boundary_id = row.boundary_id,
                            "Boundary has no usable admin_level"
                        );
                    }
                    self.write_row(&row)
                        .map_err(|e| self.partial(stage, e.to_string()))?;
                    if self.summary.rows % PROGRESS_INTERVAL == 0 {
                        progress.set_position(self.summary.rows);
                    }
                }
                Err(e) => {
                    self.summary.rejected += 1;
                    debug!(stage, error = %e, "Skipping row");
                }
            }
        }

        progress.set_position(self.summary.rows);
        if self.summary.rejected > 0 {
            warn!(
                stage,
                rejected = self.summary.rejected,
                "Skipped rows with unusable place ids"
            );
        }
        if self.summary.unleveled > 0 {
            warn!(
                stage,
                unleveled = self.summary.unleveled,
                "Wrote rows whose boundary has no integer admin_level"
            );
        }
        Ok(self.summary)
    }

    /// Finish compression and rename the export into place
    pub fn commit(self) -> io::Result<PathBuf> {
        debug!(
            export = %self.staged.target().display(),
            rows = self.summary.rows,
            "Finishing export"
        );
        let encoder = self
            .writer
            .into_inner()
            .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string()))?;
        let buffered = encoder.finish()?;
        buffered.into_inner().map_err(|e| e.into_error())?;
        self.staged.commit()
    }

    fn partial(&self, stage: &str, reason: String) -> StageError {
        StageError::PartialStream {
            stage: stage.to_string(),
            rows: self.summary.rows,
            reason,
        }
    }
}

fn csv_to_io(err: csv::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}
