use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker pool size for the parallel and priority strategies
    #[serde(default = "default_max_parallel_nodes")]
    pub max_parallel_nodes: usize,

    /// Per-call executor timeout unless a node overrides it
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Total attempts for nodes without their own retry count
    #[serde(default = "default_retry_count")]
    pub default_retry_count: u32,

    #[serde(default)]
    pub default_backoff_ms: u64,
}

fn default_max_parallel_nodes() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_count() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: default_max_parallel_nodes(),
            default_timeout_ms: default_timeout_ms(),
            default_retry_count: default_retry_count(),
            default_backoff_ms: 0,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("Engine configuration {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse engine configuration")?;

        Ok(config.normalized())
    }

    /// A pool of zero workers would never dispatch anything
    pub fn normalized(mut self) -> Self {
        self.max_parallel_nodes = self.max_parallel_nodes.max(1);
        self
    }
}
