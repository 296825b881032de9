// DAG-based workflow scheduling, validation and optimization

pub mod dag;
pub mod executor;
pub mod optimizer;
pub mod step_executor;
pub mod validator;
pub mod visualize;

pub use dag::WorkflowDag;
pub use executor::WorkflowEngine;
pub use optimizer::{
    Optimization, OptimizationReport, ParallelizationCandidate, Suggestion, SuggestionKind,
    WorkflowOptimizer,
};
pub use step_executor::NodeRunner;
pub use validator::{GraphIssue, GraphMetrics, GraphValidator};
