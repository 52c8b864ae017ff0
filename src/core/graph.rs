//! Stage definitions and the dependency graph between them.
//!
//! Edges are not declared by hand: a stage depends on whichever stage
//! produces one of its inputs. The execution order is a topological sort
//! that breaks ties by declaration order, so a graph declared in a valid
//! order runs in exactly that order.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::GraphError;
use crate::domain::Artifact;

/// What a stage asks its executor to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageCommand {
    /// Keep only objects matching any of the tag predicates
    FilterTags { predicates: Vec<String> },

    /// Load an extract into the spatial store under `table_prefix`
    Import {
        layer: ImportLayer,
        table_prefix: String,
    },

    /// Stream the containment join between the two imported tables
    JoinExport {
        places_table: String,
        boundaries_table: String,
    },
}

/// Which kind of features an import stage loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportLayer {
    Places,
    Boundaries,
}

impl ImportLayer {
    /// Importer table kind this layer keeps (the others are dropped)
    pub fn kept_table(&self) -> &'static str {
        match self {
            ImportLayer::Places => "point",
            ImportLayer::Boundaries => "polygon",
        }
    }

    /// Attribute column indexed after import
    pub fn indexed_column(&self) -> &'static str {
        match self {
            ImportLayer::Places => "place",
            ImportLayer::Boundaries => "admin_level",
        }
    }
}

/// A named transformation from input artifacts to one output artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub inputs: Vec<Artifact>,
    pub output: Artifact,
    pub command: StageCommand,
}

impl Stage {
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<Artifact>,
        output: Artifact,
        command: StageCommand,
    ) -> Self {
        Self {
            name: name.into(),
            inputs,
            output,
            command,
        }
    }
}

/// Validated DAG of stages hanging off a single root input
#[derive(Debug, Clone)]
pub struct StageGraph {
    root: Artifact,
    stages: Vec<Stage>,
    /// (producer index, consumer index)
    edges: Vec<(usize, usize)>,
    order: Vec<usize>,
}

impl StageGraph {
    /// Build and validate a graph.
    ///
    /// Every input must be either the root or the output of exactly one
    /// stage, and the resulting dependencies must be acyclic.
    pub fn new(root: Artifact, stages: Vec<Stage>) -> Result<Self, GraphError> {
        let mut names = HashSet::new();
        let mut producers: HashMap<&Path, usize> = HashMap::new();

        for (idx, stage) in stages.iter().enumerate() {
            if !names.insert(stage.name.as_str()) {
                return Err(GraphError::DuplicateStage(stage.name.clone()));
            }
            if stage.output.location == root.location {
                return Err(GraphError::ProducesRoot {
                    stage: stage.name.clone(),
                    artifact: root.to_string(),
                });
            }
            if let Some(&first) = producers.get(stage.output.location()) {
                return Err(GraphError::DuplicateProducer {
                    artifact: stage.output.to_string(),
                    first: stages[first].name.clone(),
                    second: stage.name.clone(),
                });
            }
            producers.insert(stage.output.location(), idx);
        }

        let mut edges = Vec::new();
        for (idx, stage) in stages.iter().enumerate() {
            for input in &stage.inputs {
                if input.location == root.location {
                    continue;
                }
                match producers.get(input.location()) {
                    Some(&producer) => edges.push((producer, idx)),
                    None => {
                        return Err(GraphError::UnknownInput {
                            stage: stage.name.clone(),
                            artifact: input.to_string(),
                        })
                    }
                }
            }
        }

        let order = topological_order(stages.len(), &edges).map_err(|stuck| {
            GraphError::Cycle(stuck.into_iter().map(|i| stages[i].name.clone()).collect())
        })?;

        Ok(Self {
            root,
            stages,
            edges,
            order,
        })
    }

    /// The pipeline's declared root input
    pub fn root(&self) -> &Artifact {
        &self.root
    }

    /// Stages in execution order
    pub fn ordered(&self) -> impl Iterator<Item = &Stage> {
        self.order.iter().map(move |&i| &self.stages[i])
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Names of the stages `name` directly depends on
    pub fn predecessors(&self, name: &str) -> Vec<&str> {
        let Some(idx) = self.stages.iter().position(|s| s.name == name) else {
            return Vec::new();
        };
        self.edges
            .iter()
            .filter(|(_, to)| *to == idx)
            .map(|(from, _)| self.stages[*from].name.as_str())
            .collect()
    }

    /// Output of the last stage in execution order
    pub fn terminal(&self) -> Option<&Artifact> {
        self.order.last().map(|&i| &self.stages[i].output)
    }
}

/// Kahn's algorithm; ready stages are taken lowest index first.
///
/// On a cycle, returns the indices that could never be scheduled.
fn topological_order(count: usize, edges: &[(usize, usize)]) -> Result<Vec<usize>, Vec<usize>> {
    let mut indegree = vec![0usize; count];
    for &(_, to) in edges {
        indegree[to] += 1;
    }

    let mut ready: BTreeSet<usize> = (0..count).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(count);

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &(from, to) in edges {
            if from == next {
                indegree[to] -= 1;
                if indegree[to] == 0 {
                    ready.insert(to);
                }
            }
        }
    }

    if order.len() == count {
        Ok(order)
    } else {
        Err((0..count).filter(|i| !order.contains(i)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(name: &str, input: &Artifact, output: &str) -> Stage {
        Stage::new(
            name,
            vec![input.clone()],
            Artifact::file(output, output),
            StageCommand::FilterTags {
                predicates: vec!["n/place".to_string()],
            },
        )
    }

    #[test]
    fn test_order_follows_dependencies_not_declaration() {
        let root = Artifact::file("root extract", "/in.osm.pbf");
        let a = Artifact::file("a", "a");
        // Declared consumer-first on purpose
        let stages = vec![filter("second", &a, "b"), filter("first", &root, "a")];

        let graph = StageGraph::new(root, stages).unwrap();
        let names: Vec<_> = graph.ordered().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(graph.predecessors("second"), vec!["first"]);
        assert_eq!(graph.terminal().unwrap().location, Path::new("b"));
    }

    #[test]
    fn test_unknown_input_rejected() {
        let root = Artifact::file("root extract", "/in.osm.pbf");
        let orphan = Artifact::file("orphan", "orphan");
        let err = StageGraph::new(root, vec![filter("s", &orphan, "out")]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownInput { .. }));
    }

    #[test]
    fn test_duplicate_producer_rejected() {
        let root = Artifact::file("root extract", "/in.osm.pbf");
        let stages = vec![filter("one", &root, "out"), filter("two", &root, "out")];
        let err = StageGraph::new(root, stages).unwrap_err();
        assert_eq!(
            err,
            GraphError::DuplicateProducer {
                artifact: "out (out)".to_string(),
                first: "one".to_string(),
                second: "two".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_stage_and_root_producer_rejected() {
        let root = Artifact::file("root extract", "/in.osm.pbf");
        let dup = vec![filter("s", &root, "a"), filter("s", &root, "b")];
        assert_eq!(
            StageGraph::new(root.clone(), dup).unwrap_err(),
            GraphError::DuplicateStage("s".to_string())
        );

        let overwrite = vec![filter("s", &root, "/in.osm.pbf")];
        assert!(matches!(
            StageGraph::new(root, overwrite).unwrap_err(),
            GraphError::ProducesRoot { .. }
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let root = Artifact::file("root extract", "/in.osm.pbf");
        let a = Artifact::file("a", "a");
        let b = Artifact::file("b", "b");
        let stages = vec![filter("x", &b, "a"), filter("y", &a, "b")];

        match StageGraph::new(root, stages).unwrap_err() {
            GraphError::Cycle(names) => assert_eq!(names, vec!["x", "y"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }
}
