//! Pipeline graph domain types
//!
//! A pipeline is a directed acyclic graph of named steps. Each step declares
//! the steps it depends on, the artifact slots it consumes and the slots it
//! produces. The graph is validated once before execution; validation yields
//! the topological execution order.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

pub const PROVISION_TABLE: &str = "provision_table";
pub const LOAD_EXTRACT: &str = "load_extract";
pub const GENERATE_LINK: &str = "generate_link";
pub const NOTIFY: &str = "notify";

/// Slot holding the extract's `ArtifactRef`
pub const EXTRACT_OBJECT: &str = "extract_object";
/// Slot holding the extract's `SignedUrl`
pub const DOWNLOAD_URL: &str = "download_url";

/// Graph validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("pipeline has no steps")]
    Empty,

    #[error("step '{0}' is declared more than once")]
    DuplicateStep(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("artifact '{artifact}' is produced by both '{first}' and '{second}'")]
    DuplicateProducer {
        artifact: String,
        first: String,
        second: String,
    },

    #[error("step '{step}' consumes '{artifact}' which no upstream step produces")]
    UnproducedInput { step: String, artifact: String },
}

/// Declaration of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    pub depends_on: Vec<String>,
    pub consumes: Vec<String>,
    pub produces: Vec<String>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            consumes: Vec::new(),
            produces: Vec::new(),
        }
    }

    pub fn after(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }

    pub fn consumes(mut self, artifact: impl Into<String>) -> Self {
        self.consumes.push(artifact.into());
        self
    }

    pub fn produces(mut self, artifact: impl Into<String>) -> Self {
        self.produces.push(artifact.into());
        self
    }
}

/// Unvalidated pipeline definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineGraph {
    pub name: String,
    pub steps: Vec<StepSpec>,
}

impl PipelineGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, spec: StepSpec) -> Self {
        self.steps.push(spec);
        self
    }

    /// The monthly balance export: provision -> load -> link -> notify
    pub fn monthly_balance() -> Self {
        Self::new("account_monthly_balance")
            .step(StepSpec::new(PROVISION_TABLE))
            .step(
                StepSpec::new(LOAD_EXTRACT)
                    .after(PROVISION_TABLE)
                    .produces(EXTRACT_OBJECT),
            )
            .step(
                StepSpec::new(GENERATE_LINK)
                    .after(LOAD_EXTRACT)
                    .consumes(EXTRACT_OBJECT)
                    .produces(DOWNLOAD_URL),
            )
            .step(StepSpec::new(NOTIFY).after(GENERATE_LINK).consumes(DOWNLOAD_URL))
    }

    /// Validates the graph and computes its execution order
    ///
    /// Checks, in order: non-empty, unique names, resolvable dependencies,
    /// acyclicity, a single producer per artifact, and that every consumed
    /// artifact is produced by an ancestor of the consuming step.
    pub fn validate(&self) -> Result<ValidatedPipeline, GraphError> {
        if self.steps.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            if index.insert(step.name.as_str(), i).is_some() {
                return Err(GraphError::DuplicateStep(step.name.clone()));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if !index.contains_key(dep.as_str()) {
                    return Err(GraphError::UnknownDependency {
                        step: step.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        if let Some(cycle) = self.find_cycle(&index) {
            return Err(GraphError::CycleDetected(cycle));
        }

        let order = self.topological_order(&index);

        let mut producers: HashMap<&str, &str> = HashMap::new();
        for step in &self.steps {
            for artifact in &step.produces {
                if let Some(first) = producers.insert(artifact.as_str(), step.name.as_str()) {
                    return Err(GraphError::DuplicateProducer {
                        artifact: artifact.clone(),
                        first: first.to_string(),
                        second: step.name.clone(),
                    });
                }
            }
        }

        for step in &self.steps {
            let ancestors = self.ancestors(&step.name, &index);
            for artifact in &step.consumes {
                let produced_upstream = producers
                    .get(artifact.as_str())
                    .is_some_and(|producer| ancestors.contains(producer));
                if !produced_upstream {
                    return Err(GraphError::UnproducedInput {
                        step: step.name.clone(),
                        artifact: artifact.clone(),
                    });
                }
            }
        }

        Ok(ValidatedPipeline {
            name: self.name.clone(),
            steps: order.into_iter().map(|i| self.steps[i].clone()).collect(),
        })
    }

    /// DFS over dependency edges, returning the first cycle found
    fn find_cycle(&self, index: &HashMap<&str, usize>) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            Visiting,
            Done,
        }

        fn visit(
            graph: &PipelineGraph,
            index: &HashMap<&str, usize>,
            node: usize,
            marks: &mut [Mark],
            path: &mut Vec<usize>,
        ) -> Option<Vec<String>> {
            marks[node] = Mark::Visiting;
            path.push(node);

            for dep in &graph.steps[node].depends_on {
                let next = index[dep.as_str()];
                match marks[next] {
                    Mark::Visiting => {
                        let start = path.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle: Vec<String> = path[start..]
                            .iter()
                            .map(|&n| graph.steps[n].name.clone())
                            .collect();
                        cycle.push(graph.steps[next].name.clone());
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(graph, index, next, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }

            path.pop();
            marks[node] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::Unvisited; self.steps.len()];
        let mut path = Vec::new();
        for node in 0..self.steps.len() {
            if marks[node] == Mark::Unvisited {
                if let Some(cycle) = visit(self, index, node, &mut marks, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Kahn's algorithm; ties keep declaration order. Assumes no cycles.
    fn topological_order(&self, index: &HashMap<&str, usize>) -> Vec<usize> {
        let mut in_degree = vec![0usize; self.steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];

        for (i, step) in self.steps.iter().enumerate() {
            let deps: HashSet<&str> = step.depends_on.iter().map(String::as_str).collect();
            in_degree[i] = deps.len();
            for dep in deps {
                dependents[index[dep]].push(i);
            }
        }

        let mut ready: VecDeque<usize> = (0..self.steps.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        while let Some(node) = ready.pop_front() {
            order.push(node);
            for &next in &dependents[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push_back(next);
                }
            }
        }

        order
    }

    /// Names of all transitive dependencies of `name`
    fn ancestors<'a>(&'a self, name: &str, index: &HashMap<&str, usize>) -> HashSet<&'a str> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = self.steps[index[name]]
            .depends_on
            .iter()
            .map(String::as_str)
            .collect();

        while let Some(current) = stack.pop() {
            let step = &self.steps[index[current]];
            if seen.insert(step.name.as_str()) {
                stack.extend(step.depends_on.iter().map(String::as_str));
            }
        }
        seen
    }
}

/// A graph that passed validation, with steps in execution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedPipeline {
    pub name: String,
    pub steps: Vec<StepSpec>,
}

impl ValidatedPipeline {
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }
}
