//! Structural validation and metrics for workflow definitions.
//!
//! Validation never fails with an error: callers get the metrics that could be
//! computed plus a verdict. Node and edge counts are always populated; depth,
//! width, complexity and parallelization are only meaningful for valid graphs.

use super::dag::WorkflowDag;
use crate::types::{StepId, StepKind, WorkflowDefinition};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Shape metrics of a workflow graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMetrics {
    pub node_count: usize,
    pub edge_count: usize,
    /// Number of nodes on the longest dependency chain
    pub max_depth: usize,
    /// Largest number of nodes sharing the same earliest level
    pub max_width: usize,
    /// SCCs with more than one node
    pub strongly_connected_components: usize,
    pub topological_complexity: f64,
    pub parallelization_factor: f64,
}

/// A structural problem that makes a definition unschedulable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphIssue {
    Cycle { steps: Vec<StepId> },
    SelfLoop { step: StepId },
    DanglingDependency { step: StepId, missing: StepId },
    UnknownStep { step: StepId },
    DuplicateStep { step: StepId },
    MissingAgent { step: StepId },
}

impl GraphIssue {
    /// Steps involved in the issue
    pub fn steps(&self) -> Vec<StepId> {
        match self {
            GraphIssue::Cycle { steps } => steps.clone(),
            GraphIssue::SelfLoop { step }
            | GraphIssue::UnknownStep { step }
            | GraphIssue::DuplicateStep { step }
            | GraphIssue::MissingAgent { step } => vec![step.clone()],
            GraphIssue::DanglingDependency { step, .. } => vec![step.clone()],
        }
    }
}

impl std::fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphIssue::Cycle { steps } => {
                let ids: Vec<&str> = steps.iter().map(StepId::as_str).collect();
                write!(f, "circular dependency between {}", ids.join(", "))
            }
            GraphIssue::SelfLoop { step } => write!(f, "step {} depends on itself", step),
            GraphIssue::DanglingDependency { step, missing } => {
                write!(f, "step {} depends on undefined step {}", step, missing)
            }
            GraphIssue::UnknownStep { step } => {
                write!(f, "dependencies declared for undefined step {}", step)
            }
            GraphIssue::DuplicateStep { step } => write!(f, "step {} is defined more than once", step),
            GraphIssue::MissingAgent { step } => write!(f, "agent step {} has no agent_id", step),
        }
    }
}

/// Result of analysing a definition
#[derive(Debug, Clone)]
pub struct Analysis {
    pub metrics: GraphMetrics,
    pub issues: Vec<GraphIssue>,
    /// Steps grouped by earliest schedulable level; empty when invalid
    pub levels: Vec<Vec<StepId>>,
    /// The checked graph, present only when valid
    pub(crate) dag: Option<WorkflowDag>,
}

impl Analysis {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

pub struct GraphValidator;

impl GraphValidator {
    /// Metrics plus validity verdict
    pub fn validate(definition: &WorkflowDefinition) -> (GraphMetrics, bool) {
        let analysis = Self::analyze(definition);
        let ok = analysis.is_valid();
        (analysis.metrics, ok)
    }

    pub fn issues(definition: &WorkflowDefinition) -> Vec<GraphIssue> {
        Self::analyze(definition).issues
    }

    /// Parallel groups by earliest level, or `None` for an invalid graph
    pub fn levels(definition: &WorkflowDefinition) -> Option<Vec<Vec<StepId>>> {
        let analysis = Self::analyze(definition);
        analysis.is_valid().then_some(analysis.levels)
    }

    pub fn analyze(definition: &WorkflowDefinition) -> Analysis {
        let mut issues = Vec::new();
        let mut graph: DiGraph<StepId, ()> = DiGraph::new();
        let mut indices: HashMap<&StepId, NodeIndex> = HashMap::new();

        for step in &definition.steps {
            if indices.contains_key(&step.id) {
                issues.push(GraphIssue::DuplicateStep {
                    step: step.id.clone(),
                });
                continue;
            }
            indices.insert(&step.id, graph.add_node(step.id.clone()));

            let has_agent = step.agent_id.as_deref().is_some_and(|a| !a.is_empty());
            if step.kind == StepKind::Agent && !has_agent {
                issues.push(GraphIssue::MissingAgent {
                    step: step.id.clone(),
                });
            }
        }

        let mut unknown: Vec<&StepId> = definition
            .dependencies
            .keys()
            .filter(|id| !indices.contains_key(id))
            .collect();
        unknown.sort();
        issues.extend(unknown.into_iter().map(|id| GraphIssue::UnknownStep { step: id.clone() }));

        // Walk steps in definition order so issue lists are deterministic
        let mut visited = HashSet::new();
        for step in &definition.steps {
            if !visited.insert(&step.id) {
                continue;
            }
            let step_idx = indices[&step.id];
            let mut seen = HashSet::new();
            for dep in definition.dependencies_of(&step.id) {
                if !seen.insert(dep) {
                    continue;
                }
                match indices.get(dep) {
                    Some(&dep_idx) => {
                        if dep_idx == step_idx {
                            issues.push(GraphIssue::SelfLoop {
                                step: step.id.clone(),
                            });
                        }
                        graph.add_edge(dep_idx, step_idx, ());
                    }
                    None => issues.push(GraphIssue::DanglingDependency {
                        step: step.id.clone(),
                        missing: dep.clone(),
                    }),
                }
            }
        }

        let mut cyclic_components = 0;
        for component in tarjan_scc(&graph) {
            if component.len() > 1 {
                cyclic_components += 1;
                let mut steps: Vec<StepId> =
                    component.iter().map(|&n| graph[n].clone()).collect();
                steps.sort();
                issues.push(GraphIssue::Cycle { steps });
            }
        }

        let node_count = graph.node_count();
        let edge_count = graph.edge_count();
        let mut metrics = GraphMetrics {
            node_count,
            edge_count,
            strongly_connected_components: cyclic_components,
            ..GraphMetrics::default()
        };

        if !issues.is_empty() {
            tracing::debug!(
                "Workflow {} failed validation with {} issue(s)",
                definition.id,
                issues.len()
            );
            return Analysis {
                metrics,
                issues,
                levels: Vec::new(),
                dag: None,
            };
        }

        let levels = match Self::earliest_levels(&graph) {
            Some(levels) => levels,
            None => {
                // toposort only fails on cycles, which were reported above
                return Analysis {
                    metrics,
                    issues: vec![GraphIssue::Cycle { steps: Vec::new() }],
                    levels: Vec::new(),
                    dag: None,
                };
            }
        };

        metrics.max_depth = levels.len();
        metrics.max_width = levels.iter().map(Vec::len).max().unwrap_or(0);
        if node_count > 0 {
            let n = node_count as f64;
            let excess = edge_count as f64 - (n - 1.0);
            metrics.topological_complexity = (excess / n).clamp(0.0, 1.0);
            metrics.parallelization_factor = metrics.max_width as f64 / n;
        }

        Analysis {
            metrics,
            issues,
            levels,
            dag: Some(WorkflowDag::from_graph(graph)),
        }
    }

    /// Earliest level per node via DP over a topological order, grouped in insertion order
    fn earliest_levels(graph: &DiGraph<StepId, ()>) -> Option<Vec<Vec<StepId>>> {
        let order = toposort(graph, None).ok()?;
        let mut level: HashMap<NodeIndex, usize> = HashMap::new();

        for node in order {
            let depth = graph
                .neighbors_directed(node, petgraph::Direction::Incoming)
                .filter_map(|pred| level.get(&pred))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(node, depth);
        }

        let depth = level.values().copied().max().map(|d| d + 1).unwrap_or(0);
        let mut groups = vec![Vec::new(); depth];
        for node in graph.node_indices() {
            groups[level[&node]].push(graph[node].clone());
        }

        Some(groups)
    }
}
