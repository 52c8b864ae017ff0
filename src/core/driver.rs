//! Pipeline driver: input file in, join export and report out.
//!
//! Resolves the pipeline prefix, runs the stage graph against the output
//! directory and hands the export to the report generator. Every error is
//! propagated as-is; nothing is retried or partially recovered.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use super::cancel::CancelFlag;
use super::error::StageError;
use super::graph::StageGraph;
use super::pipeline::{build_graph, root_artifact, PipelinePrefix};
use super::runner::StageRunner;
use super::store::ArtifactStore;
use crate::adapters::{Executor, ReportGenerator};
use crate::config::FilterSettings;
use crate::domain::{Artifact, PlannedStage, RunReport};

/// Options for one invocation
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Re-run every stage regardless of freshness
    pub force: bool,

    /// Stop after the export instead of calling the report generator
    pub skip_report: bool,
}

/// Sequences the pipeline over a store, an executor and a report generator
pub struct Driver<'a> {
    store: &'a dyn ArtifactStore,
    executor: &'a dyn Executor,
    reporter: Option<&'a dyn ReportGenerator>,
    filters: FilterSettings,
    definition: Option<SystemTime>,
    cancel: CancelFlag,
}

impl<'a> Driver<'a> {
    pub fn new(store: &'a dyn ArtifactStore, executor: &'a dyn Executor) -> Self {
        Self {
            store,
            executor,
            reporter: None,
            filters: FilterSettings::default(),
            definition: None,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: &'a dyn ReportGenerator) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_filters(mut self, filters: FilterSettings) -> Self {
        self.filters = filters;
        self
    }

    /// Timestamp of the pipeline definition; newer than an output means stale
    pub fn with_definition(mut self, definition: Option<SystemTime>) -> Self {
        self.definition = definition;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    fn runner(&self) -> StageRunner<'a> {
        StageRunner::new(self.store, self.executor)
            .with_definition(self.definition)
            .with_cancel(self.cancel.clone())
    }

    /// Prefix and validated stage graph for `input`.
    ///
    /// The prefix comes from the name as given, so a symlink such as
    /// `planet-latest.osm.pbf` keeps its artifacts across new downloads.
    /// The root artifact points at the resolved file.
    pub fn graph(&self, input: &Path) -> Result<(PipelinePrefix, StageGraph)> {
        let root = self.check_root(input)?;
        let prefix = PipelinePrefix::from_input(input)?;
        let graph = build_graph(root_artifact(root), &prefix, &self.filters)
            .context("Invalid pipeline definition")?;
        Ok((prefix, graph))
    }

    /// Run the whole pipeline for `input`
    #[instrument(skip(self, input, options), fields(input = %input.display()))]
    pub async fn run(&self, input: &Path, options: &RunOptions) -> Result<RunReport> {
        let (prefix, graph) = self.graph(input)?;

        let mut report = RunReport::new(prefix.name());
        info!(
            run_id = %report.id,
            prefix = %prefix.name(),
            root = %graph.root().location().display(),
            executor = self.executor.name(),
            "Starting pipeline"
        );

        self.runner()
            .run_all(&graph, &mut report, options.force)
            .await
            .with_context(|| format!("Pipeline '{}' failed", prefix.name()))?;

        let export = report
            .export
            .clone()
            .context("Pipeline has no terminal artifact")?;

        if report.is_noop() {
            info!("All artifacts up to date");
        }

        match self.reporter {
            Some(reporter) if !options.skip_report => {
                let report_path = self.store.locate(&Artifact::file("report", prefix.report()));
                info!(report = %report_path.display(), "Generating report");
                reporter
                    .generate(&export, &report_path)
                    .await
                    .context("Report generation failed")?;
            }
            _ => info!(export = %export.display(), "Export ready"),
        }

        report.complete();
        Ok(report)
    }

    /// Dry run: which stages would execute for `input`, and why
    pub fn plan(&self, input: &Path, force: bool) -> Result<Vec<PlannedStage>> {
        let (_, graph) = self.graph(input)?;
        Ok(self.runner().plan(&graph, force)?)
    }

    /// The input must exist and be readable before anything runs
    fn check_root(&self, input: &Path) -> Result<PathBuf> {
        let missing = |path: PathBuf| StageError::MissingInput {
            stage: "pipeline".to_string(),
            artifact: "root extract".to_string(),
            path,
        };

        let root = input
            .canonicalize()
            .map_err(|_| missing(input.to_path_buf()))?;
        File::open(&root)
            .map_err(|e| StageError::store(&root, e))
            .with_context(|| format!("Input extract is not readable: {}", root.display()))?;
        Ok(root)
    }
}
