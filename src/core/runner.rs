//! Stage runner: decides whether a stage is stale and, if so, runs it.
//!
//! A stage is fresh when its output exists and is at least as new as each
//! of its direct inputs and the pipeline definition. Only timestamps are
//! compared: an input whose content changes without its modification time
//! advancing is not noticed.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Instant, SystemTime};

use tracing::{debug, info, instrument};

use super::cancel::CancelFlag;
use super::error::StageError;
use super::graph::{Stage, StageGraph};
use super::store::ArtifactStore;
use crate::adapters::Executor;
use crate::domain::{Artifact, Freshness, PlannedStage, RunReport, StageOutcome};

/// Runs stages against a store through an executor
pub struct StageRunner<'a> {
    store: &'a dyn ArtifactStore,
    executor: &'a dyn Executor,
    /// Last modification of the pipeline definition itself
    definition: Option<SystemTime>,
    cancel: CancelFlag,
}

impl<'a> StageRunner<'a> {
    pub fn new(store: &'a dyn ArtifactStore, executor: &'a dyn Executor) -> Self {
        Self {
            store,
            executor,
            definition: None,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_definition(mut self, definition: Option<SystemTime>) -> Self {
        self.definition = definition;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    fn timestamp(&self, artifact: &Artifact) -> Result<Option<SystemTime>, StageError> {
        self.store
            .modified(artifact)
            .map_err(|e| StageError::store(self.store.locate(artifact), e))
    }

    /// Timestamps of every input, failing on the first missing one
    fn input_stamps<'s>(
        &self,
        stage: &'s Stage,
    ) -> Result<Vec<(&'s Artifact, SystemTime)>, StageError> {
        stage
            .inputs
            .iter()
            .map(|input| match self.timestamp(input)? {
                Some(stamp) => Ok((input, stamp)),
                None => Err(StageError::MissingInput {
                    stage: stage.name.clone(),
                    artifact: input.name.clone(),
                    path: self.store.locate(input),
                }),
            })
            .collect()
    }

    /// Whether `stage` needs to run, ignoring `force`
    pub fn freshness(&self, stage: &Stage) -> Result<Freshness, StageError> {
        let inputs = self.input_stamps(stage)?;

        let Some(output) = self.timestamp(&stage.output)? else {
            return Ok(Freshness::OutputMissing);
        };

        if let Some((input, _)) = inputs.iter().find(|(_, stamp)| *stamp > output) {
            return Ok(Freshness::InputNewer {
                artifact: input.name.clone(),
            });
        }

        if self.definition.is_some_and(|definition| definition > output) {
            return Ok(Freshness::DefinitionNewer);
        }

        Ok(Freshness::Fresh)
    }

    /// Run one stage unless its output is already fresh
    #[instrument(skip(self, stage), fields(stage = %stage.name))]
    pub async fn run(&self, stage: &Stage, force: bool) -> Result<StageOutcome, StageError> {
        let freshness = self.freshness(stage)?;
        if freshness.is_fresh() && !force {
            info!(output = %stage.output, "Up to date, skipping");
            return Ok(StageOutcome::skipped(&stage.name));
        }

        if self.cancel.is_cancelled() {
            return Err(StageError::Interrupted {
                stage: stage.name.clone(),
            });
        }

        let reason = if force { Freshness::Forced } else { freshness };
        info!(reason = %reason, output = %stage.output, "Running stage");

        let inputs: Vec<PathBuf> = stage.inputs.iter().map(|a| self.store.locate(a)).collect();
        let output = self.store.locate(&stage.output);
        let started = Instant::now();

        // A child killed by the same Ctrl-C reports a plain failure
        let produced = match self.executor.execute(stage, &inputs, &output).await {
            Ok(produced) => produced,
            Err(_) if self.cancel.is_cancelled() => {
                return Err(StageError::Interrupted {
                    stage: stage.name.clone(),
                })
            }
            Err(e) => return Err(e),
        };
        self.store
            .mark_produced(&stage.output)
            .map_err(|e| StageError::store(&output, e))?;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(duration_ms, rows = ?produced.rows, "Stage completed");
        Ok(StageOutcome::ran(&stage.name, duration_ms, produced.rows))
    }

    /// Run every stage in dependency order, stopping at the first failure
    pub async fn run_all(
        &self,
        graph: &StageGraph,
        report: &mut RunReport,
        force: bool,
    ) -> Result<(), StageError> {
        for stage in graph.ordered() {
            let outcome = self.run(stage, force).await?;
            report.outcomes.push(outcome);
        }
        report.export = graph.terminal().map(|a| self.store.locate(a));
        Ok(())
    }

    /// What `run_all` would do, without executing anything
    pub fn plan(&self, graph: &StageGraph, force: bool) -> Result<Vec<PlannedStage>, StageError> {
        let mut pending: HashSet<PathBuf> = HashSet::new();
        let mut plan = Vec::with_capacity(graph.len());

        for stage in graph.ordered() {
            let upstream = stage
                .inputs
                .iter()
                .find(|input| pending.contains(&input.location));

            let freshness = match upstream {
                Some(input) => Freshness::UpstreamPending {
                    artifact: input.name.clone(),
                },
                None if force => {
                    self.input_stamps(stage)?;
                    Freshness::Forced
                }
                None => self.freshness(stage)?,
            };

            if !freshness.is_fresh() {
                pending.insert(stage.output.location.clone());
            }
            debug!(stage = %stage.name, freshness = %freshness, "Planned");

            plan.push(PlannedStage {
                stage: stage.name.clone(),
                output: self.store.locate(&stage.output),
                freshness,
            });
        }

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StageOutput;
    use crate::core::graph::StageCommand;
    use crate::core::store::MemoryStore;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Executor for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn execute(
            &self,
            stage: &Stage,
            _inputs: &[PathBuf],
            _output: &Path,
        ) -> Result<StageOutput, StageError> {
            self.calls.lock().unwrap().push(stage.name.clone());
            Ok(StageOutput::default())
        }
    }

    fn stage() -> Stage {
        Stage::new(
            "filter-places",
            vec![Artifact::file("root extract", "root.osm.pbf")],
            Artifact::file("place extract", "places.osm.pbf"),
            StageCommand::FilterTags {
                predicates: vec!["n/place".to_string()],
            },
        )
    }

    #[tokio::test]
    async fn test_missing_input_fails() {
        let store = MemoryStore::new();
        let executor = Recorder::default();
        let runner = StageRunner::new(&store, &executor);

        let err = runner.run(&stage(), false).await.unwrap_err();
        match err {
            StageError::MissingInput { artifact, .. } => assert_eq!(artifact, "root extract"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_runs_then_skips() {
        let store = MemoryStore::new();
        store.touch("root.osm.pbf");
        let executor = Recorder::default();
        let runner = StageRunner::new(&store, &executor);

        let first = runner.run(&stage(), false).await.unwrap();
        assert_eq!(first.status, crate::domain::StageStatus::Ran);
        assert!(store.stamp("places.osm.pbf").is_some());

        let second = runner.run(&stage(), false).await.unwrap();
        assert_eq!(second.status, crate::domain::StageStatus::Skipped);
        assert_eq!(executor.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rerun_makes_stage_fresh_again() {
        let store = MemoryStore::new();
        let stamp = store.touch("root.osm.pbf");
        let executor = Recorder::default();
        let runner = StageRunner::new(&store, &executor).with_definition(Some(stamp));

        // Output older than root
        store.touch("places.osm.pbf");
        store.touch("root.osm.pbf");
        assert!(matches!(
            runner.freshness(&stage()).unwrap(),
            Freshness::InputNewer { .. }
        ));

        runner.run(&stage(), false).await.unwrap();
        assert_eq!(runner.freshness(&stage()).unwrap(), Freshness::Fresh);
    }

    #[tokio::test]
    async fn test_definition_change_invalidates() {
        let store = MemoryStore::new();
        store.touch("root.osm.pbf");
        store.touch("places.osm.pbf");
        let definition = store.tick();

        let executor = Recorder::default();
        let runner = StageRunner::new(&store, &executor).with_definition(Some(definition));
        assert_eq!(
            runner.freshness(&stage()).unwrap(),
            Freshness::DefinitionNewer
        );
    }

    #[tokio::test]
    async fn test_force_reruns_fresh_stage() {
        let store = MemoryStore::new();
        store.touch("root.osm.pbf");
        store.touch("places.osm.pbf");
        let executor = Recorder::default();
        let runner = StageRunner::new(&store, &executor);

        let outcome = runner.run(&stage(), true).await.unwrap();
        assert_eq!(outcome.status, crate::domain::StageStatus::Ran);
    }

    #[tokio::test]
    async fn test_cancelled_runner_does_not_start_stage() {
        let store = MemoryStore::new();
        store.touch("root.osm.pbf");
        let executor = Recorder::default();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let runner = StageRunner::new(&store, &executor).with_cancel(cancel);

        let err = runner.run(&stage(), false).await.unwrap_err();
        assert!(matches!(err, StageError::Interrupted { .. }));
        assert!(executor.calls.lock().unwrap().is_empty());
    }
}
