//! placejoin - Incremental OSM place-in-boundary pipeline
//!
//! Turns one OpenStreetMap extract into a gzip-compressed CSV of every
//! (place, administrative boundary) containment pair, re-running only
//! the stages whose inputs changed since their output was produced.
//!
//! # Architecture
//!
//! The pipeline is an explicit graph of five stages:
//! - two tag filters (places and boundaries) over the root extract
//! - two database imports, one per filtered extract
//! - a spatial join streamed into the final export
//!
//! Each stage is skipped when its output is at least as new as all of
//! its inputs and the pipeline definition.
//!
//! # Modules
//!
//! - `adapters`: External tools (osmium, osm2pgsql, psql, report generator)
//! - `core`: Store, graph, runner, driver, export
//! - `domain`: Data structures (Artifact, JoinRow, RunReport)
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Build or refresh the export for an extract
//! placejoin run ireland-and-northern-ireland-latest.osm.pbf out/
//!
//! # Show which stages would run
//! placejoin plan ireland-and-northern-ireland-latest.osm.pbf out/
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{ArtifactStore, Driver, FsStore, MemoryStore, RunOptions, StageError};
pub use domain::{Artifact, JoinRow, OsmType, RunReport};
