//! Hand-off to the downstream report generator.

use std::path::Path;

use async_trait::async_trait;

use crate::core::StageError;

use super::process::{run_tool, ToolCommand};
use super::ReportGenerator;

/// Report generator invoked as `<binary> <export> <report>`
#[derive(Debug, Clone)]
pub struct CommandReportGenerator {
    binary: String,
}

impl CommandReportGenerator {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn command(&self, export: &Path, report: &Path) -> ToolCommand {
        ToolCommand::new(&self.binary)
            .arg(export.to_string_lossy())
            .arg(report.to_string_lossy())
    }
}

#[async_trait]
impl ReportGenerator for CommandReportGenerator {
    async fn generate(&self, export: &Path, report: &Path) -> Result<(), StageError> {
        run_tool("report", &self.command(export, report)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_command() {
        let generator = CommandReportGenerator::new("place-chains");
        let command = generator.command(
            Path::new("/out/ie-placesinboundaries.csv.gz"),
            Path::new("/out/ie-chains.txt"),
        );
        assert_eq!(
            command.to_string(),
            "place-chains /out/ie-placesinboundaries.csv.gz /out/ie-chains.txt"
        );
    }
}
