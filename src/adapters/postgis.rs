//! The containment join, streamed out of PostGIS by psql.
//!
//! psql writes CSV to a pipe; the export sink reads it row by row on the
//! blocking pool. When compression falls behind the pipe fills up and
//! psql blocks, so memory use does not grow with the result size.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::DatabaseSettings;
use crate::core::cancel::CancelFlag;
use crate::core::export::{ExportSink, ExportSummary};
use crate::core::StageError;

use super::process::ToolCommand;

/// Runs the join query and publishes the compressed export
#[derive(Debug, Clone)]
pub struct PostgisJoin {
    psql: String,
    database: DatabaseSettings,
    cancel: CancelFlag,
    show_progress: bool,
}

impl PostgisJoin {
    pub fn new(psql: impl Into<String>, database: DatabaseSettings, cancel: CancelFlag) -> Self {
        Self {
            psql: psql.into(),
            database,
            cancel,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn query_command(&self, places_table: &str, boundaries_table: &str) -> ToolCommand {
        ToolCommand::new(&self.psql)
            .args(["-X", "-q", "-v", "ON_ERROR_STOP=1"])
            .args(self.database.psql_args())
            .arg("-c")
            .arg(join_sql(places_table, boundaries_table))
    }

    /// Stream the join for the given tables into `output`
    pub async fn export(
        &self,
        stage: &str,
        places_table: &str,
        boundaries_table: &str,
        output: &Path,
    ) -> Result<ExportSummary, StageError> {
        let command = self.query_command(places_table, boundaries_table);
        info!(stage, command = %command.program, output = %output.display(), "Streaming join");

        let progress = self.progress_bar();
        let cancel = self.cancel.clone();
        let task_stage = stage.to_string();
        let output: PathBuf = output.to_path_buf();

        tokio::task::spawn_blocking(move || {
            stream_join(&task_stage, &command, &output, &cancel, &progress)
        })
        .await
        .map_err(|e| StageError::PartialStream {
            stage: stage.to_string(),
            rows: 0,
            reason: format!("export task aborted: {}", e),
        })?
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} rows ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar
    }
}

/// Containment join between imported places and boundaries.
///
/// `&&` lets the planner prune candidates through the GiST index on the
/// bounding boxes before `ST_Contains` does the exact test.
pub fn join_sql(places_table: &str, boundaries_table: &str) -> String {
    format!(
        "COPY (\n\
         SELECT\n  \
           p.osm_id AS place_id,\n  \
           p.tags -> 'name:en' AS place_name_en,\n  \
           p.name AS place_name,\n  \
           p.place AS place_type,\n  \
           ST_Y(p.way) AS place_lat,\n  \
           ST_X(p.way) AS place_lon,\n  \
           b.osm_id AS boundary_id,\n  \
           b.tags -> 'name:en' AS boundary_name_en,\n  \
           b.name AS boundary_name,\n  \
           b.admin_level AS boundary_admin_level\n\
         FROM {places_table}_point AS p\n\
         JOIN {boundaries_table}_polygon AS b\n  \
           ON p.way && b.way AND ST_Contains(b.way, p.way)\n\
         WHERE p.place IS NOT NULL AND b.boundary = 'administrative'\n\
         ) TO STDOUT WITH (FORMAT csv, HEADER true)"
    )
}

/// Run `command`, stream its stdout into a new export at `output`, and
/// commit only if the command exits successfully.
///
/// A non-zero exit is an `Execution` error; death by signal, a broken
/// stream or cancellation is a `PartialStream`/`Interrupted` error. In all
/// failure cases the previous export at `output` is left untouched.
pub fn stream_join(
    stage: &str,
    command: &ToolCommand,
    output: &Path,
    cancel: &CancelFlag,
    progress: &ProgressBar,
) -> Result<ExportSummary, StageError> {
    let mut sink = ExportSink::create(output).map_err(|e| StageError::store(output, e))?;

    let mut child = command
        .to_std()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|source| StageError::Spawn {
            stage: stage.to_string(),
            command: command.to_string(),
            source,
        })?;

    let streamed = match child.stdout.take() {
        Some(stdout) => sink.write_from(stage, stdout, cancel, progress),
        None => Err(StageError::PartialStream {
            stage: stage.to_string(),
            rows: 0,
            reason: "query engine stdout was not captured".to_string(),
        }),
    };
    if streamed.is_err() {
        // Ignore the result: the child may already have exited
        let _ = child.kill();
    }

    let status = child.wait();
    progress.finish_and_clear();
    let summary = streamed?;

    let status = status.map_err(|e| StageError::PartialStream {
        stage: stage.to_string(),
        rows: summary.rows,
        reason: format!("failed to wait for query engine: {}", e),
    })?;

    match status.code() {
        Some(0) => {}
        Some(code) => {
            return Err(StageError::Execution {
                stage: stage.to_string(),
                command: command.to_string(),
                status: Some(code),
            })
        }
        None => {
            return Err(StageError::PartialStream {
                stage: stage.to_string(),
                rows: summary.rows,
                reason: "query engine was terminated by a signal".to_string(),
            })
        }
    }

    sink.commit().map_err(|e| StageError::store(output, e))?;
    info!(
        stage,
        rows = summary.rows,
        rejected = summary.rejected,
        unleveled = summary.unleveled,
        export = %output.display(),
        "Export committed"
    );
    Ok(summary)
}
