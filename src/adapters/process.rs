//! Subprocess plumbing shared by all tool adapters.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::core::StageError;

/// A fully rendered external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Blocking equivalent, for stages that consume stdout synchronously
    pub fn to_std(&self) -> std::process::Command {
        let mut command = std::process::Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl std::fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Quote an argument so the rendered command can be pasted into a shell
fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Run a tool to completion with inherited stdout/stderr.
///
/// A non-zero exit becomes `StageError::Execution` carrying the status.
pub async fn run_tool(stage: &str, command: &ToolCommand) -> Result<(), StageError> {
    info!(stage, command = %command, "Running");

    let status = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|source| StageError::Spawn {
            stage: stage.to_string(),
            command: command.to_string(),
            source,
        })?;

    if !status.success() {
        return Err(StageError::Execution {
            stage: stage.to_string(),
            command: command.to_string(),
            status: status.code(),
        });
    }

    debug!(stage, program = %command.program, "Command succeeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_when_needed() {
        let command = ToolCommand::new("psql")
            .args(["-d", "gis", "-c"])
            .arg("SELECT 'x' FROM t");
        assert_eq!(
            command.to_string(),
            r#"psql -d gis -c 'SELECT '\''x'\'' FROM t'"#
        );
    }

    #[test]
    fn test_display_plain_paths() {
        let command = ToolCommand::new("osmium")
            .args(["tags-filter", "/data/ie.osm.pbf", "n/place", "wr/boundary=administrative"]);
        assert_eq!(
            command.to_string(),
            "osmium tags-filter /data/ie.osm.pbf n/place wr/boundary=administrative"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_success_and_failure() {
        assert!(run_tool("ok", &ToolCommand::new("true")).await.is_ok());

        let err = run_tool("boom", &ToolCommand::new("sh").args(["-c", "exit 7"]))
            .await
            .unwrap_err();
        match err {
            StageError::Execution { stage, status, .. } => {
                assert_eq!(stage, "boom");
                assert_eq!(status, Some(7));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_tool_missing_binary() {
        let err = run_tool("x", &ToolCommand::new("placejoin-no-such-tool"))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Spawn { .. }));
    }
}
