//! Integration tests for the agent contract as a downstream crate sees it.
//!
//! A caching lookup agent built only from public core types: default trait
//! methods, stats reporting through health checks, and wire formats.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use agentmesh_core::*;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Lookup agent: caches answers, tracks stats
// ---------------------------------------------------------------------------

struct LookupAgent {
    config: AgentConfig,
    cache: Arc<dyn CacheStore>,
    stats: Mutex<AgentStats>,
}

impl LookupAgent {
    fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self {
            config: AgentConfig::new("lookup")
                .with_id("lookup-1")
                .with_description("Looks up neighborhood data"),
            cache,
            stats: Mutex::new(AgentStats::default()),
        }
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
        _context: Option<serde_json::Value>,
    ) -> MeshResult<AgentResponse> {
        let started = Instant::now();
        let Some(key) = request.as_text().filter(|k| !k.trim().is_empty()) else {
            self.stats.lock().await.record(false, started.elapsed());
            return Ok(AgentResponse::failure(self.id(), "empty lookup key"));
        };

        let (value, cached) = match self.cache.get(key).await? {
            Some(value) => (value, true),
            None => {
                let value = serde_json::json!({ "key": key, "score": key.len() });
                self.cache
                    .set(key, value.clone(), Some(Duration::from_secs(60)))
                    .await?;
                (value, false)
            }
        };

        self.stats.lock().await.record(true, started.elapsed());
        Ok(AgentResponse::success(self.id(), value)
            .with_metadata("cached", serde_json::Value::Bool(cached))
            .with_processing_time(started.elapsed()))
    }

    async fn capabilities(&self) -> MeshResult<Capabilities> {
        Ok(Capabilities::from_config(&self.config, &["lookup"]))
    }

    async fn health_check(&self) -> MeshResult<HealthReport> {
        let stats = self.stats.lock().await.clone();
        let state = if stats.success_rate() >= 0.5 {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };
        Ok(HealthReport::new(&self.config, state).with_details(serde_json::to_value(stats)?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_lookup_uses_cache() {
    let cache = Arc::new(MemoryCache::new());
    let agent = LookupAgent::new(cache.clone());

    let first = agent.process("austin".into(), None).await.unwrap();
    assert!(first.success);
    assert_eq!(first.metadata["cached"], false);

    let second = agent.process("austin".into(), None).await.unwrap();
    assert_eq!(second.metadata["cached"], true);
    assert_eq!(second.data, first.data);
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn test_health_reflects_stats() {
    let agent = LookupAgent::new(Arc::new(MemoryCache::new()));
    assert!(agent.health_check().await.unwrap().is_healthy());

    agent.process("".into(), None).await.unwrap();
    agent.process(" ".into(), None).await.unwrap();
    agent.process("austin".into(), None).await.unwrap();

    let report = agent.health_check().await.unwrap();
    assert!(!report.is_healthy());
    assert_eq!(report.details["total_requests"], 3);
    assert_eq!(report.details["failed_requests"], 2);
    assert_eq!(report.agent_id, "lookup-1");
}

#[tokio::test]
async fn test_default_trait_methods() {
    let agent = LookupAgent::new(Arc::new(MemoryCache::new()));
    agent.shutdown().await.unwrap();

    let message = Message::direct(
        "peer",
        agent.id(),
        MessageKind::DataRequest,
        serde_json::json!({ "key": "austin" }),
    );
    assert!(agent.handle_message(message).await.unwrap().is_none());

    let caps = agent.capabilities().await.unwrap();
    assert!(caps.supports("lookup"));
    assert_eq!(caps.description, "Looks up neighborhood data");
}

#[tokio::test]
async fn test_agent_as_trait_object() {
    let agents: Vec<Arc<dyn Agent>> = vec![
        Arc::new(LookupAgent::new(Arc::new(MemoryCache::new()))),
        Arc::new(LookupAgent::new(Arc::new(MemoryCache::new()))),
    ];
    for agent in &agents {
        let response = agent
            .process(serde_json::json!("dallas").into(), None)
            .await
            .unwrap();
        assert_eq!(response.data.unwrap()["key"], "dallas");
    }
}

#[test]
fn test_message_wire_format() {
    let request = Message::direct(
        "market",
        "finance",
        MessageKind::TaskRequest,
        serde_json::json!({ "operation": "roi" }),
    )
    .with_priority(MessagePriority::Urgent);
    let reply = request.reply("finance", MessageKind::TaskResponse, serde_json::json!(0.12));

    let json = serde_json::to_value(&reply).unwrap();
    assert_eq!(json["kind"], "task_response");
    assert_eq!(json["priority"], "urgent");
    assert_eq!(json["recipient"], "market");
    assert_eq!(json["correlation_id"], request.id.to_string());

    let back: Message = serde_json::from_value(json).unwrap();
    assert_eq!(back.correlation_id, Some(request.id));
}

#[test]
fn test_error_messages() {
    let err = MeshError::Timeout {
        agent_id: "lookup-1".into(),
        timeout_ms: 250,
    };
    assert_eq!(err.to_string(), "Agent lookup-1 timed out after 250ms");

    let err: MeshError = serde_json::from_str::<serde_json::Value>("{")
        .unwrap_err()
        .into();
    assert!(matches!(err, MeshError::Json(_)));
}
