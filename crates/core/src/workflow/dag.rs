use super::validator::GraphValidator;
use crate::types::{StepId, WorkflowDefinition};
use anyhow::{anyhow, Result};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Topo;
use std::collections::HashMap;

/// DAG representation of a validated workflow
#[derive(Debug, Clone)]
pub struct WorkflowDag {
    graph: DiGraph<StepId, ()>,
    step_indices: HashMap<StepId, NodeIndex>,
}

impl WorkflowDag {
    /// Build a DAG from a workflow definition, rejecting any invalid graph
    pub fn from_definition(definition: &WorkflowDefinition) -> Result<Self> {
        let analysis = GraphValidator::analyze(definition);
        if !analysis.is_valid() {
            let reasons: Vec<String> = analysis.issues.iter().map(ToString::to_string).collect();
            return Err(anyhow!(reasons.join("; ")));
        }

        analysis
            .dag
            .ok_or_else(|| anyhow!("Workflow {} produced no graph", definition.id))
    }

    /// Wrap an acyclic graph whose edges point from dependency to dependent
    pub(super) fn from_graph(graph: DiGraph<StepId, ()>) -> Self {
        let step_indices = graph
            .node_indices()
            .map(|n| (graph[n].clone(), n))
            .collect();

        Self {
            graph,
            step_indices,
        }
    }

    /// Get steps in topological order (dependencies first)
    pub fn topological_order(&self) -> Vec<StepId> {
        let mut topo = Topo::new(&self.graph);
        let mut steps = Vec::new();

        while let Some(node) = topo.next(&self.graph) {
            steps.push(self.graph[node].clone());
        }

        steps
    }

    /// True when neither step transitively depends on the other
    pub fn are_independent(&self, a: &StepId, b: &StepId) -> Result<bool> {
        let a_idx = self.index(a)?;
        let b_idx = self.index(b)?;
        if a_idx == b_idx {
            return Ok(false);
        }

        Ok(!has_path_connecting(&self.graph, a_idx, b_idx, None)
            && !has_path_connecting(&self.graph, b_idx, a_idx, None))
    }

    fn index(&self, step_id: &StepId) -> Result<NodeIndex> {
        self.step_indices
            .get(step_id)
            .copied()
            .ok_or_else(|| anyhow!("Step {} not found", step_id))
    }
}
