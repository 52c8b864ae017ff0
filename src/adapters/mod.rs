//! Adapter interfaces for external tools.
//!
//! Every stage runs through the [`Executor`] capability; the production
//! implementation, [`ToolExecutor`], shells out to osmium, osm2pgsql and
//! psql. Tests substitute deterministic fakes.

pub mod osm2pgsql;
pub mod osmium;
pub mod postgis;
pub mod process;
pub mod report;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::ResolvedConfig;
use crate::core::cancel::CancelFlag;
use crate::core::graph::{Stage, StageCommand};
use crate::core::StageError;

pub use osm2pgsql::Osm2pgsqlImporter;
pub use osmium::OsmiumFilter;
pub use postgis::PostgisJoin;
pub use process::ToolCommand;
pub use report::CommandReportGenerator;

/// Output from a successful stage execution
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    /// Rows written, for stages that stream a table
    pub rows: Option<u64>,
}

/// Capability to carry out a stage's command
#[async_trait]
pub trait Executor: Send + Sync {
    /// Human-readable executor name
    fn name(&self) -> &str;

    /// Execute `stage`, reading `inputs` and producing `output`.
    ///
    /// File outputs must only appear at `output` once complete.
    async fn execute(
        &self,
        stage: &Stage,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<StageOutput, StageError>;
}

/// Downstream consumer of the join export
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, export: &Path, report: &Path) -> Result<(), StageError>;
}

/// Executor backed by the real OSM and PostGIS tooling
pub struct ToolExecutor {
    osmium: OsmiumFilter,
    importer: Osm2pgsqlImporter,
    join: PostgisJoin,
}

impl ToolExecutor {
    pub fn new(osmium: OsmiumFilter, importer: Osm2pgsqlImporter, join: PostgisJoin) -> Self {
        Self {
            osmium,
            importer,
            join,
        }
    }

    pub fn from_config(config: &ResolvedConfig, cancel: CancelFlag) -> Self {
        Self::new(
            OsmiumFilter::new(&config.tools.osmium),
            Osm2pgsqlImporter::new(
                &config.tools.osm2pgsql,
                &config.tools.psql,
                config.database.clone(),
                config.import.clone(),
            ),
            PostgisJoin::new(&config.tools.psql, config.database.clone(), cancel),
        )
    }
}

fn single_input<'a>(stage: &Stage, inputs: &'a [PathBuf]) -> Result<&'a Path, StageError> {
    inputs
        .first()
        .map(PathBuf::as_path)
        .ok_or_else(|| StageError::MissingInput {
            stage: stage.name.clone(),
            artifact: "input".to_string(),
            path: PathBuf::new(),
        })
}

#[async_trait]
impl Executor for ToolExecutor {
    fn name(&self) -> &str {
        "tools"
    }

    async fn execute(
        &self,
        stage: &Stage,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<StageOutput, StageError> {
        match &stage.command {
            StageCommand::FilterTags { predicates } => {
                let input = single_input(stage, inputs)?;
                self.osmium
                    .filter(&stage.name, input, predicates, output)
                    .await?;
                Ok(StageOutput::default())
            }
            StageCommand::Import {
                layer,
                table_prefix,
            } => {
                let input = single_input(stage, inputs)?;
                self.importer
                    .import(&stage.name, *layer, table_prefix, input)
                    .await?;
                Ok(StageOutput::default())
            }
            StageCommand::JoinExport {
                places_table,
                boundaries_table,
            } => {
                let summary = self
                    .join
                    .export(&stage.name, places_table, boundaries_table, output)
                    .await?;
                Ok(StageOutput {
                    rows: Some(summary.rows),
                })
            }
        }
    }
}
