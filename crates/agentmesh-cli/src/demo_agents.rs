//! Built-in agents the CLI can register from its config file.

use agentmesh_core::{
    Agent, AgentConfig, AgentRequest, AgentResponse, AgentStats, CacheStore, Capabilities,
    HealthReport, HealthState, MemoryCache, Message, MessageKind, MeshResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Which built-in agent to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemoKind {
    Echo,
    Lookup,
    Flaky,
}

/// One `[[agents]]` entry of the CLI config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoAgentSpec {
    pub id: String,
    pub kind: DemoKind,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Flaky agents fail every n-th request.
    #[serde(default = "default_fail_every")]
    pub fail_every: u64,
    /// Lookup agents keep answers this long.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_fail_every() -> u64 {
    3
}
fn default_cache_ttl() -> u64 {
    300
}

impl DemoAgentSpec {
    pub fn new(id: &str, kind: DemoKind, category: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            category: category.to_string(),
            description: String::new(),
            timeout_ms: None,
            fail_every: default_fail_every(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }

    fn agent_config(&self) -> AgentConfig {
        let mut config = AgentConfig::new(format!("{:?}", self.kind).to_lowercase())
            .with_id(&self.id)
            .with_description(&self.description);
        config.timeout_ms = self.timeout_ms;
        config
    }

    /// Build the agent this entry describes.
    pub fn build(&self) -> Arc<dyn Agent> {
        let config = self.agent_config();
        match self.kind {
            DemoKind::Echo => Arc::new(EchoAgent::new(config)),
            DemoKind::Lookup => Arc::new(LookupAgent::new(
                config,
                Arc::new(MemoryCache::new()),
                Duration::from_secs(self.cache_ttl_secs),
            )),
            DemoKind::Flaky => Arc::new(FlakyAgent::new(config, self.fail_every)),
        }
    }
}

/// The agents registered when the config names none.
pub fn default_agents() -> Vec<DemoAgentSpec> {
    vec![
        DemoAgentSpec::new("echo-1", DemoKind::Echo, "echo"),
        DemoAgentSpec::new("lookup-1", DemoKind::Lookup, "lookup"),
        DemoAgentSpec::new("lookup-2", DemoKind::Lookup, "lookup"),
    ]
}

// ---------------------------------------------------------------------------
// Echo
// ---------------------------------------------------------------------------

/// Returns the operation and input it was given.
pub struct EchoAgent {
    config: AgentConfig,
}

impl EchoAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn process(
        &self,
        request: AgentRequest,
        context: Option<serde_json::Value>,
    ) -> MeshResult<AgentResponse> {
        Ok(AgentResponse::success(
            self.id(),
            serde_json::json!({ "operation": request, "input": context }),
        ))
    }

    async fn capabilities(&self) -> MeshResult<Capabilities> {
        Ok(Capabilities::from_config(&self.config, &["echo"]))
    }

    async fn handle_message(&self, message: Message) -> MeshResult<Option<Message>> {
        match message.kind {
            MessageKind::CapabilityQuery => Ok(Some(message.reply(
                self.id(),
                MessageKind::CapabilityResponse,
                serde_json::json!(["echo"]),
            ))),
            MessageKind::HealthCheck => Ok(Some(message.reply(
                self.id(),
                MessageKind::StatusUpdate,
                serde_json::json!({ "status": "healthy" }),
            ))),
            _ => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Derives a deterministic record from its input and caches it.
pub struct LookupAgent {
    config: AgentConfig,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    stats: Mutex<AgentStats>,
}

impl LookupAgent {
    pub fn new(config: AgentConfig, cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            config,
            cache,
            ttl,
            stats: Mutex::new(AgentStats::default()),
        }
    }

    fn cache_key(operation: &str, input: &serde_json::Value) -> String {
        format!("{operation}:{input}")
    }
}

#[async_trait]
impl Agent for LookupAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn process(
        &self,
        request: AgentRequest,
        context: Option<serde_json::Value>,
    ) -> MeshResult<AgentResponse> {
        let started = Instant::now();
        if request.is_empty() {
            self.stats.lock().await.record(false, started.elapsed());
            return Ok(AgentResponse::failure(self.id(), "Empty lookup request"));
        }

        let operation = match &request {
            AgentRequest::Text(text) => text.clone(),
            AgentRequest::Structured(value) => value.to_string(),
        };
        let input = context.unwrap_or(serde_json::Value::Null);
        let key = Self::cache_key(&operation, &input);

        let (record, cached) = match self.cache.get(&key).await? {
            Some(record) => (record, true),
            None => {
                let record = serde_json::json!({
                    "operation": operation,
                    "input": input,
                    "checksum": key.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b))),
                });
                self.cache.set(&key, record.clone(), Some(self.ttl)).await?;
                (record, false)
            }
        };

        let elapsed = started.elapsed();
        self.stats.lock().await.record(true, elapsed);
        Ok(AgentResponse::success(self.id(), record)
            .with_metadata("cached", serde_json::Value::Bool(cached))
            .with_processing_time(elapsed))
    }

    async fn capabilities(&self) -> MeshResult<Capabilities> {
        Ok(Capabilities::from_config(&self.config, &["lookup"]))
    }

    async fn health_check(&self) -> MeshResult<HealthReport> {
        let stats = self.stats.lock().await.clone();
        Ok(HealthReport::new(&self.config, HealthState::Healthy)
            .with_details(serde_json::to_value(stats)?))
    }
}

// ---------------------------------------------------------------------------
// Flaky
// ---------------------------------------------------------------------------

/// Fails every `fail_every`-th request; unhealthy once most requests fail.
pub struct FlakyAgent {
    config: AgentConfig,
    fail_every: u64,
    stats: Mutex<AgentStats>,
}

impl FlakyAgent {
    pub fn new(config: AgentConfig, fail_every: u64) -> Self {
        Self {
            config,
            fail_every: fail_every.max(1),
            stats: Mutex::new(AgentStats::default()),
        }
    }
}

#[async_trait]
impl Agent for FlakyAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn process(
        &self,
        request: AgentRequest,
        _context: Option<serde_json::Value>,
    ) -> MeshResult<AgentResponse> {
        let started = Instant::now();
        let mut stats = self.stats.lock().await;
        let fails = (stats.total_requests + 1) % self.fail_every == 0;
        stats.record(!fails, started.elapsed());

        if fails {
            return Ok(AgentResponse::failure(
                self.id(),
                format!("Simulated failure on request {}", stats.total_requests),
            ));
        }
        Ok(AgentResponse::success(
            self.id(),
            serde_json::json!({ "operation": request, "attempt": stats.total_requests }),
        ))
    }

    async fn capabilities(&self) -> MeshResult<Capabilities> {
        Ok(Capabilities::from_config(&self.config, &["flaky"]))
    }

    async fn health_check(&self) -> MeshResult<HealthReport> {
        let stats = self.stats.lock().await.clone();
        let state = if stats.success_rate() < 0.5 {
            HealthState::Unhealthy
        } else {
            HealthState::Healthy
        };
        Ok(HealthReport::new(&self.config, state).with_details(serde_json::to_value(stats)?))
    }
}
