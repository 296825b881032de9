use anyhow::{Context, Result};
use flowdag_core::{EngineConfig, WorkflowDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Agent id -> external command bound to it
    #[serde(default)]
    pub agents: HashMap<String, AgentCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_store_file")]
    pub store_file: PathBuf,
}

fn default_store_file() -> PathBuf {
    PathBuf::from("./data/executions.redb")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_file: default_store_file(),
        }
    }
}

/// External process invoked for an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl CliConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self::default()
        };

        config.engine = config.engine.normalized();
        Ok(config)
    }
}

/// Read a workflow definition from a TOML or JSON file
pub fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow definition {}", path.display()))?;

    let definition = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse workflow definition {}", path.display()))?,
        _ => toml::from_str(&content)
            .with_context(|| format!("Failed to parse workflow definition {}", path.display()))?,
    };

    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_with_agents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flowdag.toml");
        std::fs::write(
            &path,
            r#"
            [engine]
            max_parallel_nodes = 2

            [storage]
            store_file = "runs.redb"

            [agents.summarizer]
            command = "python3"
            args = ["summarize.py"]
            "#,
        )
        .unwrap();

        let config = CliConfig::load(&path).unwrap();
        assert_eq!(config.engine.max_parallel_nodes, 2);
        assert_eq!(config.engine.default_retry_count, 3);
        assert_eq!(config.storage.store_file, PathBuf::from("runs.redb"));
        assert_eq!(config.agents["summarizer"].args, vec!["summarize.py"]);
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = CliConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert!(config.agents.is_empty());
        assert_eq!(config.storage.store_file, default_store_file());
    }

    #[test]
    fn test_load_json_definition() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wf.json");
        std::fs::write(
            &path,
            r#"{
                "id": "wf",
                "name": "Workflow",
                "version": "1.0.0",
                "steps": [{"id": "a", "name": "A", "kind": "service"}]
            }"#,
        )
        .unwrap();

        let definition = load_definition(&path).unwrap();
        assert_eq!(definition.steps.len(), 1);
        assert!(definition.dependencies.is_empty());
    }
}
