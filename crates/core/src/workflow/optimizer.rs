use super::dag::WorkflowDag;
use super::validator::{GraphMetrics, GraphValidator};
use crate::error::OptimizerError;
use crate::types::{RetryPolicy, StepId, WorkflowDefinition, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const COMPLEXITY_WEIGHT: f64 = 0.5;
const PARALLELISM_WEIGHT: f64 = 0.5;

const LONG_CHAIN_DEPTH: usize = 5;
const LOW_PARALLELISM: f64 = 0.3;
const HIGH_COMPLEXITY: f64 = 0.5;

/// Structural change `generate_optimized` can apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimization {
    /// Attach a default retry policy to steps without one
    RetryPolicy,
    /// Record level groupings under `metadata.parallel_groups`
    ParallelHints,
}

impl Optimization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Optimization::RetryPolicy => "retry_policy",
            Optimization::ParallelHints => "parallel_hints",
        }
    }
}

impl std::str::FromStr for Optimization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry_policy" => Ok(Self::RetryPolicy),
            "parallel_hints" => Ok(Self::ParallelHints),
            other => Err(format!("unknown optimization: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    InvalidDag,
    AddRetryPolicy,
    Parallelize,
    ShortenCriticalPath,
    ReduceCoupling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub message: String,
    pub steps: Vec<StepId>,
}

/// A step and every step it could run alongside
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelizationCandidate {
    pub step_id: StepId,
    pub can_parallel_with: Vec<StepId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub original_workflow: WorkflowId,
    pub version: String,
    pub optimization_score: u8,
    pub metrics: Option<GraphMetrics>,
    pub suggested_improvements: Vec<Suggestion>,
    pub structure_optimizations: Vec<ParallelizationCandidate>,
}

/// Static analysis of workflow definitions with per-version caching
#[derive(Default)]
pub struct WorkflowOptimizer {
    cache: HashMap<WorkflowId, OptimizationReport>,
    analyses_run: usize,
}

impl WorkflowOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score a definition and propose improvements.
    ///
    /// Reports are memoized by `(id, version)`; a new version replaces the
    /// cached entry for that id.
    pub fn optimize_workflow(&mut self, definition: &WorkflowDefinition) -> OptimizationReport {
        if let Some(cached) = self.cache.get(&definition.id) {
            if cached.version == definition.version {
                tracing::debug!(
                    "Optimization cache hit for {} v{}",
                    definition.id,
                    definition.version
                );
                return cached.clone();
            }
        }

        let report = self.analyze(definition);
        self.cache.insert(definition.id.clone(), report.clone());
        report
    }

    /// Number of reports computed rather than served from cache
    pub fn analyses_run(&self) -> usize {
        self.analyses_run
    }

    pub fn invalidate(&mut self, workflow_id: &WorkflowId) {
        self.cache.remove(workflow_id);
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    fn analyze(&mut self, definition: &WorkflowDefinition) -> OptimizationReport {
        self.analyses_run += 1;
        let analysis = GraphValidator::analyze(definition);

        if !analysis.is_valid() {
            let reasons: Vec<String> = analysis.issues.iter().map(ToString::to_string).collect();
            let mut steps: Vec<StepId> = analysis.issues.iter().flat_map(|i| i.steps()).collect();
            steps.sort();
            steps.dedup();

            tracing::warn!(
                "Skipping optimization of invalid workflow {}: {}",
                definition.id,
                reasons.join("; ")
            );

            return OptimizationReport {
                original_workflow: definition.id.clone(),
                version: definition.version.clone(),
                optimization_score: 0,
                metrics: None,
                suggested_improvements: vec![Suggestion {
                    kind: SuggestionKind::InvalidDag,
                    message: format!("Invalid DAG: {}", reasons.join("; ")),
                    steps,
                }],
                structure_optimizations: Vec::new(),
            };
        }

        let metrics = analysis.metrics;
        let score = 100.0
            * (COMPLEXITY_WEIGHT * (1.0 - metrics.topological_complexity)
                + PARALLELISM_WEIGHT * metrics.parallelization_factor);
        let optimization_score = score.round().clamp(0.0, 100.0) as u8;

        let candidates = Self::find_parallelization_candidates(definition);
        let suggested_improvements = Self::suggestions(definition, &metrics, &candidates);

        tracing::info!(
            "Optimized workflow {} v{}: score={}, suggestions={}",
            definition.id,
            definition.version,
            optimization_score,
            suggested_improvements.len()
        );

        OptimizationReport {
            original_workflow: definition.id.clone(),
            version: definition.version.clone(),
            optimization_score,
            metrics: Some(metrics),
            suggested_improvements,
            structure_optimizations: candidates,
        }
    }

    fn suggestions(
        definition: &WorkflowDefinition,
        metrics: &GraphMetrics,
        candidates: &[ParallelizationCandidate],
    ) -> Vec<Suggestion> {
        let mut suggestions = Vec::new();

        let without_retry: Vec<StepId> = definition
            .steps
            .iter()
            .filter(|s| s.retry_policy.is_none())
            .map(|s| s.id.clone())
            .collect();
        if !without_retry.is_empty() {
            suggestions.push(Suggestion {
                kind: SuggestionKind::AddRetryPolicy,
                message: format!(
                    "{} step(s) have no retry policy; transient executor failures will fail them outright",
                    without_retry.len()
                ),
                steps: without_retry,
            });
        }

        if !candidates.is_empty() {
            suggestions.push(Suggestion {
                kind: SuggestionKind::Parallelize,
                message: format!(
                    "{} step(s) have independent peers; run with the parallel or priority strategy",
                    candidates.len()
                ),
                steps: candidates.iter().map(|c| c.step_id.clone()).collect(),
            });
        }

        if metrics.max_depth >= LONG_CHAIN_DEPTH && metrics.parallelization_factor < LOW_PARALLELISM {
            suggestions.push(Suggestion {
                kind: SuggestionKind::ShortenCriticalPath,
                message: format!(
                    "Dependency chain of {} steps dominates the run; consider splitting independent work off the chain",
                    metrics.max_depth
                ),
                steps: Vec::new(),
            });
        }

        if metrics.topological_complexity > HIGH_COMPLEXITY {
            let mut coupled: Vec<(usize, StepId)> = definition
                .steps
                .iter()
                .map(|s| (definition.dependencies_of(&s.id).len(), s.id.clone()))
                .filter(|(n, _)| *n > 1)
                .collect();
            coupled.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

            suggestions.push(Suggestion {
                kind: SuggestionKind::ReduceCoupling,
                message: format!(
                    "Topological complexity {:.2} is high; review redundant dependencies",
                    metrics.topological_complexity
                ),
                steps: coupled.into_iter().map(|(_, id)| id).collect(),
            });
        }

        suggestions
    }

    /// Every step paired with the steps it has no dependency path to
    pub fn find_parallelization_candidates(
        definition: &WorkflowDefinition,
    ) -> Vec<ParallelizationCandidate> {
        let dag = match WorkflowDag::from_definition(definition) {
            Ok(dag) => dag,
            Err(e) => {
                tracing::debug!("No parallelization candidates for {}: {:#}", definition.id, e);
                return Vec::new();
            }
        };

        definition
            .steps
            .iter()
            .filter_map(|step| {
                let peers: Vec<StepId> = definition
                    .steps
                    .iter()
                    .filter(|other| dag.are_independent(&step.id, &other.id).unwrap_or(false))
                    .map(|other| other.id.clone())
                    .collect();

                (!peers.is_empty()).then(|| ParallelizationCandidate {
                    step_id: step.id.clone(),
                    can_parallel_with: peers,
                })
            })
            .collect()
    }

    /// Produce a new definition with the requested optimizations applied.
    ///
    /// The input is never mutated. The result is `<id>_optimized` with a
    /// minor-bumped version.
    pub fn generate_optimized(
        &self,
        definition: &WorkflowDefinition,
        optimizations: &[Optimization],
    ) -> Result<WorkflowDefinition, OptimizerError> {
        let version = semver::Version::parse(&definition.version).map_err(|source| {
            OptimizerError::InvalidVersion {
                version: definition.version.clone(),
                source,
            }
        })?;
        let bumped = semver::Version::new(version.major, version.minor + 1, 0);

        let mut optimized = definition.clone();
        optimized.id = WorkflowId::new(format!("{}_optimized", definition.id));
        optimized.name = format!("{} (Optimized)", definition.name);
        optimized.version = bumped.to_string();
        optimized
            .metadata
            .insert("optimized".to_string(), serde_json::Value::Bool(true));
        optimized.metadata.insert(
            "optimized_from".to_string(),
            serde_json::Value::String(definition.id.0.clone()),
        );

        let mut applied = Vec::new();
        for optimization in optimizations {
            match optimization {
                Optimization::RetryPolicy => {
                    for step in optimized.steps.iter_mut().filter(|s| s.retry_policy.is_none()) {
                        step.retry_policy = Some(RetryPolicy::default());
                    }
                }
                Optimization::ParallelHints => match GraphValidator::levels(definition) {
                    Some(levels) => {
                        optimized.metadata.insert(
                            "parallel_groups".to_string(),
                            serde_json::json!(levels),
                        );
                    }
                    None => {
                        tracing::warn!(
                            "Not recording parallel groups for invalid workflow {}",
                            definition.id
                        );
                        continue;
                    }
                },
            }
            applied.push(optimization.as_str());
        }
        optimized.metadata.insert(
            "applied_optimizations".to_string(),
            serde_json::json!(applied),
        );

        tracing::info!(
            "Generated {} v{} from {} v{}",
            optimized.id,
            optimized.version,
            definition.id,
            definition.version
        );

        Ok(optimized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Step;

    fn definition(steps: &[&str], deps: &[(&str, &[&str])]) -> WorkflowDefinition {
        WorkflowDefinition {
            id: WorkflowId::new("wf"),
            name: "Workflow".to_string(),
            version: "1.0.0".to_string(),
            steps: steps
                .iter()
                .map(|id| Step::agent(*id, id.to_uppercase(), "agent"))
                .collect(),
            dependencies: deps
                .iter()
                .map(|(step, on)| {
                    (
                        StepId::new(*step),
                        on.iter().map(|d| StepId::new(*d)).collect(),
                    )
                })
                .collect(),
            metadata: HashMap::new(),
        }
    }

    fn diamond() -> WorkflowDefinition {
        definition(
            &["start", "b1", "b2", "merge"],
            &[("b1", &["start"]), ("b2", &["start"]), ("merge", &["b1", "b2"])],
        )
    }

    #[test]
    fn test_score_for_diamond() {
        let mut optimizer = WorkflowOptimizer::new();
        let report = optimizer.optimize_workflow(&diamond());

        // complexity (4 - 3) / 4 = 0.25, parallelization 2 / 4 = 0.5
        assert_eq!(report.optimization_score, 63);
        assert_eq!(report.original_workflow, WorkflowId::new("wf"));
        assert!(report
            .suggested_improvements
            .iter()
            .any(|s| s.kind == SuggestionKind::AddRetryPolicy));
    }

    #[test]
    fn test_invalid_dag_short_circuits() {
        let mut optimizer = WorkflowOptimizer::new();
        let def = definition(&["a", "b"], &[("a", &["b"]), ("b", &["a"])]);
        let report = optimizer.optimize_workflow(&def);

        assert_eq!(report.optimization_score, 0);
        assert!(report.metrics.is_none());
        assert!(report.structure_optimizations.is_empty());
        assert_eq!(report.suggested_improvements.len(), 1);
        let suggestion = &report.suggested_improvements[0];
        assert_eq!(suggestion.kind, SuggestionKind::InvalidDag);
        assert!(suggestion.message.starts_with("Invalid DAG"));
        assert_eq!(suggestion.steps, vec![StepId::new("a"), StepId::new("b")]);
    }

    #[test]
    fn test_cache_hit_until_version_changes() {
        let mut optimizer = WorkflowOptimizer::new();
        let mut def = diamond();

        let first = optimizer.optimize_workflow(&def);
        let second = optimizer.optimize_workflow(&def);
        assert_eq!(first, second);
        assert_eq!(optimizer.analyses_run(), 1);

        def.version = "1.0.1".to_string();
        let third = optimizer.optimize_workflow(&def);
        assert_eq!(third.version, "1.0.1");
        assert_eq!(optimizer.analyses_run(), 2);

        optimizer.invalidate(&def.id);
        optimizer.optimize_workflow(&def);
        assert_eq!(optimizer.analyses_run(), 3);
    }

    #[test]
    fn test_parallelization_candidates() {
        let candidates = WorkflowOptimizer::find_parallelization_candidates(&diamond());

        assert_eq!(
            candidates,
            vec![
                ParallelizationCandidate {
                    step_id: StepId::new("b1"),
                    can_parallel_with: vec![StepId::new("b2")],
                },
                ParallelizationCandidate {
                    step_id: StepId::new("b2"),
                    can_parallel_with: vec![StepId::new("b1")],
                },
            ]
        );

        let chain = definition(&["a", "b", "c"], &[("b", &["a"]), ("c", &["b"])]);
        assert!(WorkflowOptimizer::find_parallelization_candidates(&chain).is_empty());
    }

    #[test]
    fn test_long_chain_and_coupling_suggestions() {
        let chain = definition(
            &["a", "b", "c", "d", "e", "f"],
            &[
                ("b", &["a"]),
                ("c", &["b"]),
                ("d", &["c"]),
                ("e", &["d"]),
                ("f", &["e"]),
            ],
        );
        let mut optimizer = WorkflowOptimizer::new();
        let report = optimizer.optimize_workflow(&chain);
        assert!(report
            .suggested_improvements
            .iter()
            .any(|s| s.kind == SuggestionKind::ShortenCriticalPath));

        let mut dense = definition(
            &["a", "b", "c", "d"],
            &[("b", &["a"]), ("c", &["a", "b"]), ("d", &["a", "b", "c"])],
        );
        dense.id = WorkflowId::new("dense");
        let report = optimizer.optimize_workflow(&dense);
        let coupling = report
            .suggested_improvements
            .iter()
            .find(|s| s.kind == SuggestionKind::ReduceCoupling)
            .unwrap();
        assert_eq!(coupling.steps, vec![StepId::new("d"), StepId::new("c")]);
    }

    #[test]
    fn test_generate_optimized_is_pure() {
        let optimizer = WorkflowOptimizer::new();
        let mut def = diamond();
        def.steps[0].retry_policy = Some(RetryPolicy {
            max_attempts: 7,
            backoff_ms: 5,
        });

        let optimized = optimizer
            .generate_optimized(&def, &[Optimization::RetryPolicy])
            .unwrap();

        assert_eq!(optimized.id, WorkflowId::new("wf_optimized"));
        assert_eq!(optimized.name, "Workflow (Optimized)");
        assert_eq!(optimized.version, "1.1.0");
        assert_eq!(optimized.metadata["optimized"], serde_json::json!(true));

        // input untouched
        assert_eq!(def.id, WorkflowId::new("wf"));
        assert_eq!(def.version, "1.0.0");
        assert!(def.steps[1..].iter().all(|s| s.retry_policy.is_none()));
        assert!(!def.metadata.contains_key("optimized"));

        // existing policies kept, missing ones filled
        assert_eq!(optimized.steps[0].retry_policy.as_ref().unwrap().max_attempts, 7);
        assert!(optimized.steps[1..]
            .iter()
            .all(|s| s.retry_policy == Some(RetryPolicy::default())));
    }

    #[test]
    fn test_generate_without_optimizations_keeps_steps() {
        let optimizer = WorkflowOptimizer::new();
        let mut def = diamond();
        def.version = "2.3.4".to_string();

        let optimized = optimizer.generate_optimized(&def, &[]).unwrap();
        assert_eq!(optimized.version, "2.4.0");
        assert!(optimized.steps.iter().all(|s| s.retry_policy.is_none()));
        assert_eq!(optimized.dependencies, def.dependencies);
    }

    #[test]
    fn test_parallel_hints_metadata() {
        let optimizer = WorkflowOptimizer::new();
        let optimized = optimizer
            .generate_optimized(&diamond(), &[Optimization::ParallelHints])
            .unwrap();

        assert_eq!(
            optimized.metadata["parallel_groups"],
            serde_json::json!([["start"], ["b1", "b2"], ["merge"]])
        );
        assert_eq!(
            optimized.metadata["applied_optimizations"],
            serde_json::json!(["parallel_hints"])
        );
    }

    #[test]
    fn test_invalid_version_is_rejected() {
        let optimizer = WorkflowOptimizer::new();
        let mut def = diamond();
        def.version = "latest".to_string();

        assert!(matches!(
            optimizer.generate_optimized(&def, &[Optimization::RetryPolicy]),
            Err(OptimizerError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn test_optimization_from_str() {
        assert_eq!(
            "retry_policy".parse::<Optimization>().unwrap(),
            Optimization::RetryPolicy
        );
        assert!("turbo".parse::<Optimization>().is_err());
    }
}
