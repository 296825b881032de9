//! Agent executor that shells out to configured commands.
//!
//! The merged node input is written to the child's stdin as JSON; stdout is
//! parsed as JSON, falling back to a plain string.

use crate::config::AgentCommand;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use flowdag_core::AgentExecutor;
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};

pub struct CommandExecutor {
    agents: HashMap<String, AgentCommand>,
}

impl CommandExecutor {
    pub fn new(agents: HashMap<String, AgentCommand>) -> Self {
        Self { agents }
    }
}

#[async_trait]
impl AgentExecutor for CommandExecutor {
    async fn execute(&self, agent_id: &str, input: Value) -> Result<Value> {
        let agent = self
            .agents
            .get(agent_id)
            .ok_or_else(|| anyhow!("No command configured for agent {}", agent_id))?;

        let mut cmd = Command::new(&agent.command);
        cmd.args(&agent.args)
            .envs(&agent.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // the engine's timeout drops this future; the child must not outlive it
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {} for agent {}", agent.command, agent_id))?;

        let payload = serde_json::to_vec(&input).context("Failed to serialize node input")?;
        let stdin = child.stdin.take();

        // Feed stdin while draining stdout so neither side blocks on a full pipe
        let (written, output) = tokio::join!(write_input(stdin, payload), child.wait_with_output());
        let output = output.with_context(|| format!("Failed to wait for agent {}", agent_id))?;
        written.with_context(|| format!("Failed to write input for agent {}", agent_id))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Agent {} exited with {}: {}",
                agent_id,
                output.status,
                stderr.trim()
            ));
        }

        tracing::debug!(
            "Agent {} produced {} bytes of output",
            agent_id,
            output.stdout.len()
        );

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        Ok(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())))
    }
}

async fn write_input(stdin: Option<ChildStdin>, payload: Vec<u8>) -> std::io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };

    match stdin.write_all(&payload).await {
        // The agent exited without reading its input
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
            tracing::debug!("Agent closed stdin before reading {} bytes", payload.len());
            Ok(())
        }
        result => result,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn agent(command: &str, args: &[&str]) -> AgentCommand {
        AgentCommand {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_json_round_trips_through_child() {
        let executor = CommandExecutor::new(HashMap::from([("cat".to_string(), agent("cat", &[]))]));

        let output = executor
            .execute("cat", serde_json::json!({"topic": "rust"}))
            .await
            .unwrap();
        assert_eq!(output["topic"], "rust");
    }

    #[tokio::test]
    async fn test_plain_stdout_becomes_string() {
        let executor = CommandExecutor::new(HashMap::from([(
            "hello".to_string(),
            agent("sh", &["-c", "cat > /dev/null; echo hello"]),
        )]));

        let output = executor.execute("hello", Value::Null).await.unwrap();
        assert_eq!(output, Value::String("hello".to_string()));
    }

    #[tokio::test]
    async fn test_failures_are_errors() {
        let executor = CommandExecutor::new(HashMap::from([(
            "fail".to_string(),
            agent("sh", &["-c", "cat > /dev/null; echo boom >&2; exit 3"]),
        )]));

        let err = executor.execute("fail", Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(executor.execute("unknown", Value::Null).await.is_err());
    }

    #[tokio::test]
    async fn test_agent_ignoring_input_still_succeeds() {
        let executor = CommandExecutor::new(HashMap::from([(
            "writer".to_string(),
            agent("sh", &["-c", "echo '{\"summary\": \"done\"}'"]),
        )]));
        let big = serde_json::json!({ "text": "x".repeat(1 << 20) });

        for input in [Value::Null, big] {
            let output = executor.execute("writer", input).await.unwrap();
            assert_eq!(output["summary"], "done");
        }
    }

    #[tokio::test]
    async fn test_large_output_before_reading_input() {
        let executor = CommandExecutor::new(HashMap::from([(
            "chatty".to_string(),
            agent(
                "sh",
                &["-c", "head -c 200000 /dev/zero | tr '\\0' a; cat > /dev/null"],
            ),
        )]));
        let input = serde_json::json!({ "text": "x".repeat(1 << 20) });

        let output = executor.execute("chatty", input).await.unwrap();
        assert_eq!(output.as_str().unwrap().len(), 200_000);
    }
}
