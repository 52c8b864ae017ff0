//! Domain types for the place-in-boundary pipeline.
//!
//! This module contains the core data structures:
//! - Artifact: named outputs with a freshness timestamp
//! - JoinRow: one (place, enclosing boundary) pair of the export
//! - Run: per-invocation report and stage outcomes

pub mod artifact;
pub mod join_row;
pub mod run;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactKind};
pub use join_row::{JoinRow, JoinRowError, OsmType, RawJoinRow, EXPORT_HEADER};
pub use run::{Freshness, PlannedStage, RunReport, StageOutcome, StageStatus};
