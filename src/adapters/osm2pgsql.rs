//! Spatial import with `osm2pgsql`, followed by table housekeeping in psql.
//!
//! osm2pgsql always creates `_point`, `_line`, `_polygon` and `_roads`
//! tables under its prefix. Each import keeps the one table its layer
//! needs, drops the rest, indexes the attribute the join filters on and
//! refreshes planner statistics.

use std::path::Path;

use crate::config::{DatabaseSettings, ImportSettings};
use crate::core::graph::ImportLayer;
use crate::core::StageError;

use super::process::{run_tool, ToolCommand};

const TABLE_KINDS: [&str; 4] = ["point", "line", "polygon", "roads"];

/// Loads a filtered extract into PostGIS
#[derive(Debug, Clone)]
pub struct Osm2pgsqlImporter {
    binary: String,
    psql: String,
    database: DatabaseSettings,
    settings: ImportSettings,
}

impl Osm2pgsqlImporter {
    pub fn new(
        binary: impl Into<String>,
        psql: impl Into<String>,
        database: DatabaseSettings,
        settings: ImportSettings,
    ) -> Self {
        Self {
            binary: binary.into(),
            psql: psql.into(),
            database,
            settings,
        }
    }

    pub fn import_command(&self, input: &Path, table_prefix: &str) -> ToolCommand {
        let mut command = ToolCommand::new(&self.binary)
            .args(["--create", "--slim", "--drop", "--hstore", "--latlong"])
            .args(["--prefix", table_prefix])
            .args(self.database.osm2pgsql_args());

        if let Some(style) = &self.settings.style {
            command = command.arg("--style").arg(style.to_string_lossy());
        }
        if let Some(cache) = self.settings.cache_mb {
            command = command.arg("--cache").arg(cache.to_string());
        }
        if let Some(processes) = self.settings.processes {
            command = command
                .arg("--number-processes")
                .arg(processes.to_string());
        }

        command
            .args(self.settings.extra_args.iter().cloned())
            .arg(input.to_string_lossy())
    }

    pub fn post_import_command(&self, layer: ImportLayer, table_prefix: &str) -> ToolCommand {
        ToolCommand::new(&self.psql)
            .args(["-X", "-q", "-v", "ON_ERROR_STOP=1"])
            .args(self.database.psql_args())
            .arg("-c")
            .arg(post_import_sql(layer, table_prefix))
    }

    /// Import `input` and tidy the resulting tables
    pub async fn import(
        &self,
        stage: &str,
        layer: ImportLayer,
        table_prefix: &str,
        input: &Path,
    ) -> Result<(), StageError> {
        run_tool(stage, &self.import_command(input, table_prefix)).await?;
        run_tool(stage, &self.post_import_command(layer, table_prefix)).await
    }
}

/// Drop unused tables, index the join attribute, refresh statistics
pub fn post_import_sql(layer: ImportLayer, table_prefix: &str) -> String {
    let kept = layer.kept_table();
    let dropped: Vec<String> = TABLE_KINDS
        .iter()
        .filter(|kind| **kind != kept)
        .map(|kind| format!("{}_{}", table_prefix, kind))
        .collect();
    let column = layer.indexed_column();

    format!(
        "DROP TABLE IF EXISTS {dropped};\n\
         CREATE INDEX IF NOT EXISTS {prefix}_{kept}_{column}_idx ON {prefix}_{kept} ({column});\n\
         ANALYZE {prefix}_{kept};",
        dropped = dropped.join(", "),
        prefix = table_prefix,
    )
}
