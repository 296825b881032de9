use async_trait::async_trait;
use serde_json::Value;

/// External collaborator that performs a node's work.
///
/// The engine wraps every call in its own timeout and may call the same
/// agent again after a failure, so implementations must tolerate
/// at-least-once delivery.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, agent_id: &str, input: Value) -> anyhow::Result<Value>;
}

/// Executor that returns its input tagged with the agent id
#[derive(Debug, Clone, Default)]
pub struct EchoExecutor;

#[async_trait]
impl AgentExecutor for EchoExecutor {
    async fn execute(&self, agent_id: &str, input: Value) -> anyhow::Result<Value> {
        Ok(serde_json::json!({
            "agent_id": agent_id,
            "input": input,
        }))
    }
}
