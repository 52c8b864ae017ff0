//! Pipeline runs.
//!
//! A run lives only as long as one invocation. Everything it learns is
//! recorded in the artifacts it writes; the report here is for logging and
//! for callers that want to know what happened.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary of one pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique identifier for this run (logging only)
    pub id: Uuid,

    /// Pipeline prefix derived from the input file name
    pub prefix: String,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished
    pub completed_at: Option<DateTime<Utc>>,

    /// One entry per stage, in execution order
    pub outcomes: Vec<StageOutcome>,

    /// Location of the terminal artifact
    pub export: Option<PathBuf>,
}

impl RunReport {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prefix: prefix.into(),
            started_at: Utc::now(),
            completed_at: None,
            outcomes: Vec::new(),
            export: None,
        }
    }

    /// Names of stages that actually executed
    pub fn executed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.status == StageStatus::Ran)
            .map(|o| o.stage.as_str())
            .collect()
    }

    /// True when every stage was already fresh
    pub fn is_noop(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == StageStatus::Skipped)
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }
}

/// What happened to a single stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: String,
    pub status: StageStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Rows written, for stages that stream a table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
}

impl StageOutcome {
    pub fn skipped(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::Skipped,
            duration_ms: None,
            rows: None,
        }
    }

    pub fn ran(stage: impl Into<String>, duration_ms: u64, rows: Option<u64>) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::Ran,
            duration_ms: Some(duration_ms),
            rows,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Output was already fresh
    Skipped,

    /// External command executed successfully
    Ran,
}

/// Why a stage is (or is not) going to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Freshness {
    /// Output is at least as new as every input and the pipeline definition
    Fresh,

    /// Output does not exist yet
    OutputMissing,

    /// An input was written after the output
    InputNewer { artifact: String },

    /// The pipeline definition changed after the output was written
    DefinitionNewer,

    /// A predecessor is going to run first
    UpstreamPending { artifact: String },

    /// Re-run requested by the operator
    Forced,
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Freshness::Fresh)
    }
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Freshness::Fresh => write!(f, "up to date"),
            Freshness::OutputMissing => write!(f, "output missing"),
            Freshness::InputNewer { artifact } => write!(f, "{} is newer", artifact),
            Freshness::DefinitionNewer => write!(f, "pipeline definition is newer"),
            Freshness::UpstreamPending { artifact } => {
                write!(f, "{} will be regenerated", artifact)
            }
            Freshness::Forced => write!(f, "forced"),
        }
    }
}

/// One line of a dry-run plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedStage {
    pub stage: String,
    pub output: PathBuf,
    pub freshness: Freshness,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_noop_detection() {
        let mut report = RunReport::new("ireland");
        report.outcomes.push(StageOutcome::skipped("filter-places"));
        report.outcomes.push(StageOutcome::skipped("filter-boundaries"));
        assert!(report.is_noop());
        assert!(report.executed().is_empty());

        report
            .outcomes
            .push(StageOutcome::ran("spatial-join-export", 1200, Some(42)));
        assert!(!report.is_noop());
        assert_eq!(report.executed(), vec!["spatial-join-export"]);
    }

    #[test]
    fn test_freshness_serialization() {
        let json = serde_json::to_string(&Freshness::InputNewer {
            artifact: "place extract".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"state":"input_newer","artifact":"place extract"}"#);

        let parsed: Freshness = serde_json::from_str(r#"{"state":"fresh"}"#).unwrap();
        assert!(parsed.is_fresh());
    }
}
