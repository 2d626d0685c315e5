use agentmesh_core::{MeshError, MeshResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for the orchestrator's background loops and deadlines.
///
/// Every field has a default, so an empty TOML table is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Seconds between health monitor cycles.
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    /// Deadline for one agent's health check.
    #[serde(default = "default_health_timeout")]
    pub health_check_timeout_secs: u64,
    /// Query deadline used when neither the caller nor the agent config gives one.
    #[serde(default = "default_query_timeout")]
    pub default_query_timeout_secs: u64,
    /// Pause between workflow readiness scans. `0` only yields to the runtime.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_ms: u64,
    /// Bounded wait of a bus consumer loop before it re-checks for shutdown.
    #[serde(default = "default_poll_interval")]
    pub bus_poll_interval_ms: u64,
    /// How long closing an endpoint waits for its consumer loop before aborting it.
    #[serde(default = "default_shutdown_grace")]
    pub bus_shutdown_grace_ms: u64,
}

fn default_health_interval() -> u64 {
    30
}
fn default_health_timeout() -> u64 {
    10
}
fn default_query_timeout() -> u64 {
    60
}
fn default_scan_interval() -> u64 {
    100
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_shutdown_grace() -> u64 {
    2000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_interval(),
            health_check_timeout_secs: default_health_timeout(),
            default_query_timeout_secs: default_query_timeout(),
            scan_interval_ms: default_scan_interval(),
            bus_poll_interval_ms: default_poll_interval(),
            bus_shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> MeshResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| MeshError::Config(format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub async fn load(path: impl AsRef<Path>) -> MeshResult<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            MeshError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject values that would stall the loops.
    pub fn validate(&self) -> MeshResult<()> {
        if self.health_check_interval_secs == 0 {
            return Err(MeshError::Config(
                "health_check_interval_secs must be greater than zero".into(),
            ));
        }
        if self.bus_poll_interval_ms == 0 {
            return Err(MeshError::Config(
                "bus_poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.default_query_timeout_secs == 0 {
            return Err(MeshError::Config(
                "default_query_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn default_query_timeout(&self) -> Duration {
        Duration::from_secs(self.default_query_timeout_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn bus_poll_interval(&self) -> Duration {
        Duration::from_millis(self.bus_poll_interval_ms)
    }

    pub fn bus_shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.bus_shutdown_grace_ms)
    }
}
