use crate::bus::{MessageBus, MessageHandler};
use crate::selection::{Candidate, RoundRobin, SelectionStrategy};
use crate::types::{AgentStatus, AgentStatusSnapshot};
use agentmesh_core::{
    Agent, AgentConfig, AgentRequest, AgentResponse, Message, MeshError, MeshResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Registration record for one live agent.
pub struct AgentRegistration {
    /// Registry key, taken from the agent's config.
    pub agent_id: String,
    /// Category the agent is routed under.
    pub category: String,
    /// The live instance.
    pub agent: Arc<dyn Agent>,
    /// Config captured at registration.
    pub config: AgentConfig,
    /// Declared operations.
    pub capabilities: Vec<String>,
    /// Current status; demoted by the health monitor.
    pub status: AgentStatus,
    /// When the agent was registered.
    pub registered_at: DateTime<Utc>,
    /// Last successful health check or query.
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentRegistration {
    fn snapshot(&self) -> AgentStatusSnapshot {
        AgentStatusSnapshot {
            agent_id: self.agent_id.clone(),
            category: self.category.clone(),
            status: self.status,
            capabilities: self.capabilities.clone(),
            registered_at: self.registered_at,
            last_heartbeat: self.last_heartbeat,
            config: self.config.clone(),
        }
    }
}

/// Binds an agent's message handling to its bus endpoint.
struct AgentEndpoint(Arc<dyn Agent>);

#[async_trait]
impl MessageHandler for AgentEndpoint {
    async fn handle_message(&self, message: Message) -> MeshResult<Option<Message>> {
        self.0.handle_message(message).await
    }
}

#[derive(Default)]
struct RegistryState {
    agents: HashMap<String, AgentRegistration>,
    /// category -> member ids, sorted so selection order is stable.
    categories: HashMap<String, BTreeSet<String>>,
}

/// Maps agent ids to registrations and routes queries by category.
///
/// Registrations and the category index share one lock, so register,
/// unregister and member selection are atomic with respect to each other.
/// The lock is never held while an agent is being called.
pub struct AgentRegistry {
    state: RwLock<RegistryState>,
    bus: MessageBus,
    strategy: Arc<dyn SelectionStrategy>,
    default_timeout: Duration,
}

impl AgentRegistry {
    /// Create a registry with round-robin selection.
    pub fn new(bus: MessageBus, default_timeout: Duration) -> Self {
        Self::with_strategy(bus, default_timeout, Arc::new(RoundRobin::new()))
    }

    /// Create a registry with a custom selection strategy.
    pub fn with_strategy(
        bus: MessageBus,
        default_timeout: Duration,
        strategy: Arc<dyn SelectionStrategy>,
    ) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            bus,
            strategy,
            default_timeout,
        }
    }

    /// The bus this registry opens endpoints on.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Register `agent` under `category` and open its bus endpoint.
    pub async fn register(&self, agent: Arc<dyn Agent>, category: &str) -> MeshResult<String> {
        let agent_id = agent.id().to_string();
        if self.state.read().await.agents.contains_key(&agent_id) {
            return Err(MeshError::DuplicateAgent(agent_id));
        }

        let capabilities = agent.capabilities().await?.supported_operations;

        let mut state = self.state.write().await;
        if state.agents.contains_key(&agent_id) {
            return Err(MeshError::DuplicateAgent(agent_id));
        }
        self.bus
            .register_endpoint(&agent_id, Arc::new(AgentEndpoint(agent.clone())))
            .await?;

        let now = Utc::now();
        state.agents.insert(
            agent_id.clone(),
            AgentRegistration {
                agent_id: agent_id.clone(),
                category: category.to_string(),
                config: agent.config().clone(),
                agent,
                capabilities: capabilities.clone(),
                status: AgentStatus::Active,
                registered_at: now,
                last_heartbeat: now,
            },
        );
        state
            .categories
            .entry(category.to_string())
            .or_default()
            .insert(agent_id.clone());

        info!(
            agent_id = %agent_id,
            agent_type = %category,
            capabilities = ?capabilities,
            "Agent registered"
        );
        Ok(agent_id)
    }

    /// Remove an agent: drop it from its category, close its endpoint and shut it down.
    ///
    /// Unknown ids are ignored. Returns whether an agent was removed.
    pub async fn unregister(&self, agent_id: &str) -> bool {
        let registration = {
            let mut state = self.state.write().await;
            let Some(registration) = state.agents.remove(agent_id) else {
                return false;
            };
            if let Some(members) = state.categories.get_mut(&registration.category) {
                members.remove(agent_id);
                if members.is_empty() {
                    state.categories.remove(&registration.category);
                }
            }
            registration
        };

        self.bus.unregister_endpoint(agent_id).await;
        if let Err(e) = registration.agent.shutdown().await {
            warn!(agent_id = %agent_id, error = %e, "Agent shutdown failed");
        }

        info!(agent_id = %agent_id, "Agent unregistered");
        true
    }

    /// Unregister every agent.
    pub async fn unregister_all(&self) -> usize {
        let ids = self.agent_ids().await;
        let mut removed = 0;
        for agent_id in &ids {
            if self.unregister(agent_id).await {
                removed += 1;
            }
        }
        removed
    }

    /// Route a request to one member of `category`.
    ///
    /// The deadline is `timeout`, else the agent's configured timeout, else the
    /// registry default. An error raised by the agent comes back as a failed
    /// [`AgentResponse`]; only routing failures and timeouts are `Err`.
    pub async fn query(
        &self,
        category: &str,
        request: impl Into<AgentRequest>,
        context: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> MeshResult<AgentResponse> {
        let (agent_id, agent, deadline) = {
            let state = self.state.read().await;
            let members = state
                .categories
                .get(category)
                .filter(|members| !members.is_empty())
                .ok_or_else(|| MeshError::NoAgentAvailable(category.to_string()))?;

            let registrations: Vec<&AgentRegistration> = members
                .iter()
                .filter_map(|id| state.agents.get(id))
                .collect();
            let candidates: Vec<Candidate<'_>> = registrations
                .iter()
                .map(|r| Candidate {
                    agent_id: &r.agent_id,
                    status: r.status,
                })
                .collect();

            let index = self
                .strategy
                .select(category, &candidates)
                .ok_or_else(|| MeshError::NoAgentAvailable(category.to_string()))?;
            let chosen = registrations
                .get(index)
                .copied()
                .ok_or_else(|| MeshError::NoAgentAvailable(category.to_string()))?;
            let deadline = timeout
                .or_else(|| chosen.config.timeout())
                .unwrap_or(self.default_timeout);
            (chosen.agent_id.clone(), chosen.agent.clone(), deadline)
        };

        debug!(
            agent_id = %agent_id,
            agent_type = %category,
            strategy = self.strategy.name(),
            timeout_ms = deadline.as_millis() as u64,
            "Dispatching query"
        );

        let started = Instant::now();
        let call = AssertUnwindSafe(agent.process(request.into(), context)).catch_unwind();
        let outcome = tokio::time::timeout(deadline, call).await;

        let response = match outcome {
            Err(_) => {
                warn!(agent_id = %agent_id, agent_type = %category, "Agent query timed out");
                return Err(MeshError::Timeout {
                    agent_id,
                    timeout_ms: deadline.as_millis() as u64,
                });
            }
            Ok(Ok(Ok(response))) => response,
            Ok(Ok(Err(e))) => {
                warn!(agent_id = %agent_id, error = %e, "Agent raised an error");
                AgentResponse::failure(agent_id.clone(), e.to_string())
            }
            Ok(Err(_)) => {
                error!(agent_id = %agent_id, agent_type = %category, "Agent panicked");
                AgentResponse::failure(agent_id.clone(), "agent panicked while processing")
            }
        };
        let response = if response.processing_time_ms.is_none() {
            response.with_processing_time(started.elapsed())
        } else {
            response
        };

        if response.success {
            let mut state = self.state.write().await;
            if let Some(registration) = state.agents.get_mut(&agent_id) {
                registration.last_heartbeat = Utc::now();
            }
        }
        Ok(response)
    }

    /// Snapshot of one registration.
    pub async fn status(&self, agent_id: &str) -> Option<AgentStatusSnapshot> {
        self.state
            .read()
            .await
            .agents
            .get(agent_id)
            .map(AgentRegistration::snapshot)
    }

    /// Snapshots of every registration, sorted by id.
    pub async fn snapshots(&self) -> Vec<AgentStatusSnapshot> {
        let state = self.state.read().await;
        let mut all: Vec<AgentStatusSnapshot> =
            state.agents.values().map(AgentRegistration::snapshot).collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    /// Record the outcome of a health check.
    ///
    /// Healthy agents become active with a fresh heartbeat; unhealthy ones are
    /// marked as errored and keep their stale heartbeat. Returns `false` if the
    /// agent is no longer registered.
    pub async fn record_health(&self, agent_id: &str, healthy: bool) -> bool {
        let mut state = self.state.write().await;
        let Some(registration) = state.agents.get_mut(agent_id) else {
            return false;
        };
        if healthy {
            registration.status = AgentStatus::Active;
            registration.last_heartbeat = Utc::now();
        } else {
            registration.status = AgentStatus::Error;
        }
        true
    }

    /// Every registered agent, for health probing outside the lock.
    pub async fn health_targets(&self) -> Vec<(String, Arc<dyn Agent>)> {
        self.state
            .read()
            .await
            .agents
            .values()
            .map(|r| (r.agent_id.clone(), r.agent.clone()))
            .collect()
    }

    /// Registered ids, sorted.
    pub async fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().await.agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of members per category.
    pub async fn category_counts(&self) -> HashMap<String, usize> {
        self.state
            .read()
            .await
            .categories
            .iter()
            .map(|(category, members)| (category.clone(), members.len()))
            .collect()
    }

    /// Number of registered agents.
    pub async fn len(&self) -> usize {
        self.state.read().await.agents.len()
    }

    /// Returns `true` when no agent is registered.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.agents.is_empty()
    }
}
