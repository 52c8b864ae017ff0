//! Tag-filter extraction with `osmium tags-filter`.

use std::path::Path;

use crate::core::publish::StagedFile;
use crate::core::StageError;

use super::process::{run_tool, ToolCommand};

/// Extracts the objects matching tag predicates from an OSM file
#[derive(Debug, Clone)]
pub struct OsmiumFilter {
    binary: String,
}

impl OsmiumFilter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// `osmium tags-filter` writing PBF to `output`
    pub fn command(&self, input: &Path, predicates: &[String], output: &Path) -> ToolCommand {
        ToolCommand::new(&self.binary)
            .args(["tags-filter", "--overwrite", "--output-format", "pbf", "-o"])
            .arg(output.to_string_lossy())
            .arg(input.to_string_lossy())
            .args(predicates.iter().cloned())
    }

    /// Filter `input` into `output`, publishing only on success
    pub async fn filter(
        &self,
        stage: &str,
        input: &Path,
        predicates: &[String],
        output: &Path,
    ) -> Result<(), StageError> {
        let staged = StagedFile::new(output).map_err(|e| StageError::store(output, e))?;
        run_tool(stage, &self.command(input, predicates, staged.path())).await?;
        staged.commit().map_err(|e| StageError::store(output, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_command() {
        let osmium = OsmiumFilter::new("osmium");
        let command = osmium.command(
            Path::new("/data/ireland.osm.pbf"),
            &["n/place".to_string()],
            Path::new("/out/.ireland-places.osm.pbf.x1.partial"),
        );

        assert_eq!(command.program, "osmium");
        assert_eq!(
            command.args,
            vec![
                "tags-filter",
                "--overwrite",
                "--output-format",
                "pbf",
                "-o",
                "/out/.ireland-places.osm.pbf.x1.partial",
                "/data/ireland.osm.pbf",
                "n/place",
            ]
        );
    }
}
