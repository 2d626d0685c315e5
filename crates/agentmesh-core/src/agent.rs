use crate::{Message, MeshResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Static configuration of an agent instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent id; the registry key.
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    /// Human-readable name.
    pub name: String,
    /// What the agent does.
    #[serde(default)]
    pub description: String,
    /// Backing model, when the agent wraps an LLM.
    #[serde(default)]
    pub model: Option<String>,
    /// Deadline in milliseconds for a single request; `None` defers to the orchestrator default.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Whether the agent should receive work.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Agent implementation version.
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_agent_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl AgentConfig {
    /// Creates a config with a fresh random id and default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            agent_id: default_agent_id(),
            name: name.into(),
            description: String::new(),
            model: None,
            timeout_ms: None,
            enabled: true,
            version: default_version(),
        }
    }

    /// Sets an explicit agent id.
    pub fn with_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// The configured request deadline, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// A request handed to [`Agent::process`]: free text or structured JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentRequest {
    /// A plain operation name or prompt.
    Text(String),
    /// A structured query.
    Structured(serde_json::Value),
}

impl AgentRequest {
    /// The request as text, if it is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AgentRequest::Text(text) => Some(text),
            AgentRequest::Structured(value) => value.as_str(),
        }
    }

    /// Returns `true` for an empty string, `null`, or an empty object/array.
    pub fn is_empty(&self) -> bool {
        match self {
            AgentRequest::Text(text) => text.trim().is_empty(),
            AgentRequest::Structured(serde_json::Value::Null) => true,
            AgentRequest::Structured(serde_json::Value::Object(map)) => map.is_empty(),
            AgentRequest::Structured(serde_json::Value::Array(items)) => items.is_empty(),
            AgentRequest::Structured(serde_json::Value::String(text)) => text.trim().is_empty(),
            AgentRequest::Structured(_) => false,
        }
    }
}

impl From<&str> for AgentRequest {
    fn from(text: &str) -> Self {
        AgentRequest::Text(text.to_string())
    }
}

impl From<String> for AgentRequest {
    fn from(text: String) -> Self {
        AgentRequest::Text(text)
    }
}

impl From<serde_json::Value> for AgentRequest {
    fn from(value: serde_json::Value) -> Self {
        AgentRequest::Structured(value)
    }
}

/// Structured result of an agent call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Whether the agent handled the request.
    pub success: bool,
    /// Result payload on success.
    pub data: Option<serde_json::Value>,
    /// Failure reason.
    pub error: Option<String>,
    /// Extra information about the call (request id, model used, ...).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// The agent that produced this response.
    pub agent_id: String,
    /// Wall-clock processing time.
    pub processing_time_ms: Option<u64>,
    /// When the response was produced.
    pub timestamp: DateTime<Utc>,
}

impl AgentResponse {
    /// A successful response carrying `data`.
    pub fn success(agent_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: HashMap::new(),
            agent_id: agent_id.into(),
            processing_time_ms: None,
            timestamp: Utc::now(),
        }
    }

    /// A failed response carrying an error message.
    pub fn failure(agent_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: HashMap::new(),
            agent_id: agent_id.into(),
            processing_time_ms: None,
            timestamp: Utc::now(),
        }
    }

    /// Records how long the call took.
    pub fn with_processing_time(mut self, elapsed: Duration) -> Self {
        self.processing_time_ms = Some(elapsed.as_millis() as u64);
        self
    }

    /// Attaches a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// What an agent declares it can do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    /// Agent id.
    pub agent_id: String,
    /// Agent name.
    pub name: String,
    /// Agent description.
    #[serde(default)]
    pub description: String,
    /// Operation names the agent accepts.
    pub supported_operations: Vec<String>,
    /// Agent implementation version.
    #[serde(default)]
    pub version: String,
}

impl Capabilities {
    /// Builds capabilities from an agent config and an operation list.
    pub fn from_config(config: &AgentConfig, operations: &[&str]) -> Self {
        Self {
            agent_id: config.agent_id.clone(),
            name: config.name.clone(),
            description: config.description.clone(),
            supported_operations: operations.iter().map(|op| (*op).to_string()).collect(),
            version: config.version.clone(),
        }
    }

    /// Returns `true` if `operation` is declared.
    pub fn supports(&self, operation: &str) -> bool {
        self.supported_operations.iter().any(|op| op == operation)
    }
}

/// Outcome of a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// The agent can take work.
    Healthy,
    /// The agent should not take work.
    Unhealthy,
}

/// Result of [`Agent::health_check`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Agent id.
    pub agent_id: String,
    /// Check outcome.
    pub status: HealthState,
    /// Whether the agent is enabled in its config.
    pub enabled: bool,
    /// Agent implementation version.
    #[serde(default)]
    pub version: String,
    /// Free-form details such as request statistics.
    #[serde(default)]
    pub details: serde_json::Value,
    /// When the check ran.
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// A report for `config` with the given status.
    pub fn new(config: &AgentConfig, status: HealthState) -> Self {
        Self {
            agent_id: config.agent_id.clone(),
            status,
            enabled: config.enabled,
            version: config.version.clone(),
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Attaches free-form details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Returns `true` when the check reported [`HealthState::Healthy`].
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// The contract every orchestrated unit implements.
///
/// One implementation per agent category; the orchestrator dispatches by the
/// category string the agent was registered under. `process` must not block
/// indefinitely, but the registry imposes the real deadline.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Static configuration, including the agent's unique id.
    fn config(&self) -> &AgentConfig;

    /// Handle a request. An `Err` is reported to the caller as a failed response.
    async fn process(
        &self,
        request: AgentRequest,
        context: Option<serde_json::Value>,
    ) -> MeshResult<AgentResponse>;

    /// Declare supported operations.
    async fn capabilities(&self) -> MeshResult<Capabilities>;

    /// Check liveness.
    async fn health_check(&self) -> MeshResult<HealthReport> {
        Ok(HealthReport::new(self.config(), HealthState::Healthy))
    }

    /// Best-effort cleanup; awaited when the agent is unregistered.
    async fn shutdown(&self) -> MeshResult<()> {
        Ok(())
    }

    /// Handle a message delivered by the message bus.
    ///
    /// A returned message is sent back through the bus.
    async fn handle_message(&self, _message: Message) -> MeshResult<Option<Message>> {
        Ok(None)
    }

    /// The agent's unique id.
    fn id(&self) -> &str {
        &self.config().agent_id
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: AgentConfig = serde_json::from_str(r#"{"name": "market"}"#).unwrap();
        assert!(config.timeout().is_none());
        assert!(config.enabled);
        assert_eq!(config.version, "1.0.0");
        assert!(!config.agent_id.is_empty());
    }

    #[test]
    fn test_request_untagged() {
        let text: AgentRequest = serde_json::from_str("\"analyze\"").unwrap();
        assert_eq!(text.as_text(), Some("analyze"));
        let structured: AgentRequest = serde_json::from_str(r#"{"zip": "78701"}"#).unwrap();
        assert!(matches!(structured, AgentRequest::Structured(_)));
        assert!(AgentRequest::from("  ").is_empty());
        assert!(AgentRequest::from(serde_json::json!({})).is_empty());
    }

    #[test]
    fn test_response_constructors() {
        let ok = AgentResponse::success("a-1", serde_json::json!({"v": 1}))
            .with_processing_time(Duration::from_millis(12));
        assert!(ok.success);
        assert_eq!(ok.processing_time_ms, Some(12));

        let failed = AgentResponse::failure("a-1", "upstream 503");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("upstream 503"));
        assert!(failed.data.is_none());
    }

    #[test]
    fn test_capabilities_supports() {
        let config = AgentConfig::new("finance").with_id("finance-1");
        let caps = Capabilities::from_config(&config, &["roi", "cash_flow"]);
        assert_eq!(caps.agent_id, "finance-1");
        assert!(caps.supports("roi"));
        assert!(!caps.supports("comps"));
    }
}
