//! The place-in-boundary pipeline definition.
//!
//! Five stages hang off one OSM extract:
//!
//! ```text
//! root ─┬─ filter-places ───── import-places ─────┬─ spatial-join-export
//!       └─ filter-boundaries ─ import-boundaries ─┘
//! ```
//!
//! All artifact names derive from a prefix taken from the input file name,
//! so several regions can share one output directory and one database.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::error::GraphError;
use super::graph::{ImportLayer, Stage, StageCommand, StageGraph};
use crate::config::FilterSettings;
use crate::domain::Artifact;

/// Input suffixes stripped to obtain the prefix, longest first
pub const KNOWN_SUFFIXES: [&str; 4] = [".osm.pbf", ".osm.bz2", ".pbf", ".osm"];

pub const FILTER_PLACES: &str = "filter-places";
pub const FILTER_BOUNDARIES: &str = "filter-boundaries";
pub const IMPORT_PLACES: &str = "import-places";
pub const IMPORT_BOUNDARIES: &str = "import-boundaries";
pub const SPATIAL_JOIN_EXPORT: &str = "spatial-join-export";

/// Logical pipeline name derived from the input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePrefix {
    name: String,
}

impl PipelinePrefix {
    /// `ireland-latest.osm.pbf` becomes `ireland-latest`
    pub fn from_input(input: &Path) -> Result<Self> {
        let file_name = input
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Input path has no usable file name: {}", input.display()))?;

        let name = KNOWN_SUFFIXES
            .iter()
            .find_map(|suffix| file_name.strip_suffix(suffix))
            .unwrap_or(file_name);

        if name.is_empty() {
            anyhow::bail!("Cannot derive a pipeline name from {}", input.display());
        }

        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// SQL-safe version of the prefix for table names
    pub fn table_prefix(&self) -> String {
        let mut table: String = self
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        if table.starts_with(|c: char| c.is_ascii_digit()) {
            table.insert(0, '_');
        }
        table
    }

    pub fn place_extract(&self) -> Artifact {
        Artifact::file("place extract", format!("{}-places.osm.pbf", self.name))
    }

    pub fn boundary_extract(&self) -> Artifact {
        Artifact::file("boundary extract", format!("{}-boundaries.osm.pbf", self.name))
    }

    pub fn place_marker(&self) -> Artifact {
        Artifact::marker("place import marker", format!("{}-places.imported", self.name))
    }

    pub fn boundary_marker(&self) -> Artifact {
        Artifact::marker(
            "boundary import marker",
            format!("{}-boundaries.imported", self.name),
        )
    }

    pub fn join_export(&self) -> Artifact {
        Artifact::file(
            "join export",
            format!("{}-placesinboundaries.csv.gz", self.name),
        )
    }

    /// Where the downstream report is written, relative to the output directory
    pub fn report(&self) -> PathBuf {
        PathBuf::from(format!("{}-chains.txt", self.name))
    }

    fn places_table(&self) -> String {
        format!("{}_places", self.table_prefix())
    }

    fn boundaries_table(&self) -> String {
        format!("{}_boundaries", self.table_prefix())
    }
}

/// The root input artifact for an extract
pub fn root_artifact(input: impl Into<PathBuf>) -> Artifact {
    Artifact::file("root extract", input)
}

/// Build the five-stage graph for `root`
pub fn build_graph(
    root: Artifact,
    prefix: &PipelinePrefix,
    filters: &FilterSettings,
) -> Result<StageGraph, GraphError> {
    let stages = vec![
        Stage::new(
            FILTER_PLACES,
            vec![root.clone()],
            prefix.place_extract(),
            StageCommand::FilterTags {
                predicates: filters.places.clone(),
            },
        ),
        Stage::new(
            FILTER_BOUNDARIES,
            vec![root.clone()],
            prefix.boundary_extract(),
            StageCommand::FilterTags {
                predicates: filters.boundaries.clone(),
            },
        ),
        Stage::new(
            IMPORT_PLACES,
            vec![prefix.place_extract()],
            prefix.place_marker(),
            StageCommand::Import {
                layer: ImportLayer::Places,
                table_prefix: prefix.places_table(),
            },
        ),
        Stage::new(
            IMPORT_BOUNDARIES,
            vec![prefix.boundary_extract()],
            prefix.boundary_marker(),
            StageCommand::Import {
                layer: ImportLayer::Boundaries,
                table_prefix: prefix.boundaries_table(),
            },
        ),
        Stage::new(
            SPATIAL_JOIN_EXPORT,
            vec![prefix.place_marker(), prefix.boundary_marker()],
            prefix.join_export(),
            StageCommand::JoinExport {
                places_table: prefix.places_table(),
                boundaries_table: prefix.boundaries_table(),
            },
        ),
    ];

    StageGraph::new(root, stages)
}
