//! Artifacts produced and consumed by pipeline stages.
//!
//! An artifact is a named location whose freshness is its last-write time.
//! Stages with no natural single-file output leave a zero-length marker
//! file behind instead.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// How an artifact records that its producing stage succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A data file written (and renamed into place) by the stage itself
    File,

    /// An empty file touched by the runner after a side-effecting stage
    Marker,
}

/// A named on-disk output of the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    /// Logical name used in logs and errors (e.g. "place extract")
    pub name: String,

    /// Location, relative to the output directory unless absolute
    pub location: PathBuf,

    /// File or marker
    pub kind: ArtifactKind,
}

impl Artifact {
    /// A data file artifact
    pub fn file(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            kind: ArtifactKind::File,
        }
    }

    /// A marker artifact
    pub fn marker(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            kind: ArtifactKind::Marker,
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn is_marker(&self) -> bool {
        self.kind == ArtifactKind::Marker
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.location.display())
    }
}
