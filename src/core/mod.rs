//! Core pipeline logic.
//!
//! This module contains:
//! - Store: artifact timestamps over the filesystem or in memory
//! - Graph: stage definitions and dependency ordering
//! - Runner: freshness checks and stage execution
//! - Driver: prefix resolution, graph run and report hand-off
//! - Export: streaming join rows into a compressed, atomically published file

pub mod cancel;
pub mod driver;
pub mod error;
pub mod export;
pub mod graph;
pub mod pipeline;
pub mod publish;
pub mod runner;
pub mod store;

// Re-export commonly used types
pub use cancel::CancelFlag;
pub use driver::{Driver, RunOptions};
pub use error::{GraphError, StageError};
pub use graph::{ImportLayer, Stage, StageCommand, StageGraph};
pub use pipeline::{build_graph, root_artifact, PipelinePrefix};
pub use runner::StageRunner;
pub use store::{newest_modification, ArtifactStore, FsStore, MemoryStore};
