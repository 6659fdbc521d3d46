use agentflow_client::PollConfig;
use agentflow_gateway::SecurityConfig;
use agentflow_orchestrator::{ExecutionConfig, RetentionConfig};
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

/// Contents of `agentflow.toml`. Every section is optional.
#[derive(Debug, Default, Deserialize)]
pub struct AgentflowConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub poller: PollConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}

impl AgentflowConfig {
    /// Read and parse `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file; using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read config file '{}': {e}",
                    path.display()
                ))
            }
        };
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Invalid config file '{}'", path.display()))?;
        config.execution.validate()?;
        Ok(config)
    }
}
