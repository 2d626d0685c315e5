use crate::demo_agents::{default_agents, DemoAgentSpec};
use agentmesh_orchestrator::{OrchestratorConfig, StepDefinition};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Contents of `agentmesh.toml`.
#[derive(Debug, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default = "default_agents")]
    pub agents: Vec<DemoAgentSpec>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            agents: default_agents(),
        }
    }
}

impl CliConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.orchestrator.validate()?;
        Ok(config)
    }

    /// Load the config file; a missing file means defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {e}", path.display())
        })?;
        Self::from_toml_str(&text)
    }
}

/// A workflow file: either a bare list of steps or a named document.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WorkflowFile {
    Named {
        name: String,
        #[serde(default)]
        description: String,
        steps: Vec<StepDefinition>,
    },
    Steps(Vec<StepDefinition>),
}

impl WorkflowFile {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read workflow file '{}': {e}", path.display())
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Name, description and steps, with the file stem as the fallback name.
    pub fn into_parts(self, path: &Path) -> (String, String, Vec<StepDefinition>) {
        match self {
            WorkflowFile::Named {
                name,
                description,
                steps,
            } => (name, description, steps),
            WorkflowFile::Steps(steps) => {
                let name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "workflow".to_string());
                (name, String::new(), steps)
            }
        }
    }
}
