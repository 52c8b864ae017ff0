//! Error taxonomy for stage execution.
//!
//! None of these are recovered locally: the first error aborts the
//! remaining pipeline and is surfaced with enough identity (stage and
//! command) to reproduce the failure by hand.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single stage
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Stage '{stage}' is missing input {artifact}: {} does not exist", .path.display())]
    MissingInput {
        stage: String,
        artifact: String,
        path: PathBuf,
    },

    #[error("Stage '{stage}' failed: `{command}` exited with {}", status_label(.status))]
    Execution {
        stage: String,
        command: String,
        status: Option<i32>,
    },

    #[error("Stage '{stage}' stream ended after {rows} rows: {reason}")]
    PartialStream {
        stage: String,
        rows: u64,
        reason: String,
    },

    #[error("Stage '{stage}' was interrupted")]
    Interrupted { stage: String },

    #[error("Failed to launch `{command}` for stage '{stage}': {source}")]
    Spawn {
        stage: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact store error at {}: {source}", .path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn status_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl StageError {
    pub fn store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StageError::Store {
            path: path.into(),
            source,
        }
    }

    /// Name of the stage that failed, when there is one
    pub fn stage(&self) -> Option<&str> {
        match self {
            StageError::MissingInput { stage, .. }
            | StageError::Execution { stage, .. }
            | StageError::PartialStream { stage, .. }
            | StageError::Interrupted { stage }
            | StageError::Spawn { stage, .. } => Some(stage),
            StageError::Store { .. } => None,
        }
    }

    /// Process exit code for this failure.
    ///
    /// The failing command's own status is propagated when it fits in a
    /// process exit code.
    pub fn exit_code(&self) -> u8 {
        match self {
            StageError::Execution {
                status: Some(code), ..
            } => u8::try_from(*code).ok().filter(|c| *c != 0).unwrap_or(1),
            StageError::Interrupted { .. } => 130,
            _ => 1,
        }
    }
}

/// Structural problems in a stage graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Stage '{0}' is declared more than once")]
    DuplicateStage(String),

    #[error("{artifact} is produced by both '{first}' and '{second}'")]
    DuplicateProducer {
        artifact: String,
        first: String,
        second: String,
    },

    #[error("Stage '{stage}' produces the root input {artifact}")]
    ProducesRoot { stage: String, artifact: String },

    #[error("Stage '{stage}' reads {artifact}, which no stage produces")]
    UnknownInput { stage: String, artifact: String },

    #[error("Stage graph contains a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_propagates_command_status() {
        let err = StageError::Execution {
            stage: "import-boundaries".to_string(),
            command: "osm2pgsql --create".to_string(),
            status: Some(3),
        };
        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.stage(), Some("import-boundaries"));
        assert!(err.to_string().contains("exit code 3"));
    }

    #[test]
    fn test_exit_code_fallbacks() {
        let killed = StageError::Execution {
            stage: "spatial-join-export".to_string(),
            command: "psql".to_string(),
            status: None,
        };
        assert_eq!(killed.exit_code(), 1);
        assert!(killed.to_string().contains("signal"));

        let out_of_range = StageError::Execution {
            stage: "filter-places".to_string(),
            command: "osmium".to_string(),
            status: Some(300),
        };
        assert_eq!(out_of_range.exit_code(), 1);

        let interrupted = StageError::Interrupted {
            stage: "import-places".to_string(),
        };
        assert_eq!(interrupted.exit_code(), 130);
    }

    #[test]
    fn test_missing_input_message() {
        let err = StageError::MissingInput {
            stage: "filter-places".to_string(),
            artifact: "root extract".to_string(),
            path: PathBuf::from("/data/ireland.osm.pbf"),
        };
        let message = err.to_string();
        assert!(message.contains("filter-places"));
        assert!(message.contains("/data/ireland.osm.pbf"));
    }
}
