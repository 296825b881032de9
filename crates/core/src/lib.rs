// Core library for the flowdag workflow scheduler

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod storage;
pub mod types;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;

pub use agent::{AgentExecutor, EchoExecutor};
pub use config::EngineConfig;
pub use context::InputContext;
pub use error::{EngineError, NodeError, OptimizerError};
pub use types::*;
