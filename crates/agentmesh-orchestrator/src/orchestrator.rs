use crate::bus::MessageBus;
use crate::config::OrchestratorConfig;
use crate::engine::WorkflowEngine;
use crate::monitor::{HealthMonitor, HealthSummary};
use crate::registry::AgentRegistry;
use crate::selection::SelectionStrategy;
use crate::types::{AgentStatusSnapshot, SystemStatus};
use crate::workflow::{StepDefinition, Workflow, WorkflowSummary};
use agentmesh_core::{Agent, AgentRequest, AgentResponse, Message, MeshResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

/// Entry point that owns the bus, registry, workflow engine and health monitor.
///
/// Construct one per process and share it behind an `Arc`.
pub struct Orchestrator {
    config: OrchestratorConfig,
    bus: MessageBus,
    registry: Arc<AgentRegistry>,
    engine: WorkflowEngine,
    monitor: Arc<HealthMonitor>,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Orchestrator {
    /// Create an orchestrator with round-robin agent selection.
    ///
    /// Fails with [`agentmesh_core::MeshError::Config`] when the config is invalid.
    pub fn new(config: OrchestratorConfig) -> MeshResult<Self> {
        config.validate()?;
        let bus = MessageBus::new(config.bus_poll_interval(), config.bus_shutdown_grace());
        let registry = Arc::new(AgentRegistry::new(
            bus.clone(),
            config.default_query_timeout(),
        ));
        Self::assemble(config, bus, registry)
    }

    /// Create an orchestrator with a custom selection strategy.
    pub fn with_strategy(
        config: OrchestratorConfig,
        strategy: Arc<dyn SelectionStrategy>,
    ) -> MeshResult<Self> {
        config.validate()?;
        let bus = MessageBus::new(config.bus_poll_interval(), config.bus_shutdown_grace());
        let registry = Arc::new(AgentRegistry::with_strategy(
            bus.clone(),
            config.default_query_timeout(),
            strategy,
        ));
        Self::assemble(config, bus, registry)
    }

    fn assemble(
        config: OrchestratorConfig,
        bus: MessageBus,
        registry: Arc<AgentRegistry>,
    ) -> MeshResult<Self> {
        let engine = WorkflowEngine::new(registry.clone(), config.scan_interval());
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            config.health_check_interval(),
            config.health_check_timeout(),
        )?);
        Ok(Self {
            config,
            bus,
            registry,
            engine,
            monitor,
            monitor_handle: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Start the health monitor. Calling it twice is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.monitor_handle.lock() = Some(self.monitor.clone().spawn());
        info!(
            interval_secs = self.config.health_check_interval_secs,
            "Orchestrator started"
        );
    }

    /// Stop the monitor, unregister every agent and close the bus.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.monitor_handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
        }
        let removed = self.registry.unregister_all().await;
        self.bus.shutdown().await;
        info!(agents_removed = removed, "Orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one health check pass immediately.
    pub async fn check_health(&self) -> HealthSummary {
        self.monitor.run_cycle().await
    }

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------

    pub async fn register_agent(&self, agent: Arc<dyn Agent>, category: &str) -> MeshResult<String> {
        self.registry.register(agent, category).await
    }

    pub async fn unregister_agent(&self, agent_id: &str) -> bool {
        self.registry.unregister(agent_id).await
    }

    pub async fn query_agent(
        &self,
        category: &str,
        request: impl Into<AgentRequest>,
        context: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> MeshResult<AgentResponse> {
        self.registry.query(category, request, context, timeout).await
    }

    pub async fn agent_status(&self, agent_id: &str) -> Option<AgentStatusSnapshot> {
        self.registry.status(agent_id).await
    }

    pub async fn agents(&self) -> Vec<AgentStatusSnapshot> {
        self.registry.snapshots().await
    }

    // ------------------------------------------------------------------
    // Workflows
    // ------------------------------------------------------------------

    pub async fn create_workflow(&self, definitions: Vec<StepDefinition>) -> Uuid {
        self.engine.create_workflow(definitions).await
    }

    pub async fn create_named_workflow(
        &self,
        name: &str,
        description: &str,
        definitions: Vec<StepDefinition>,
    ) -> Uuid {
        self.engine
            .create_named_workflow(name, description, definitions)
            .await
    }

    pub async fn submit_workflow(&self, workflow: Workflow) -> MeshResult<Uuid> {
        self.engine.submit(workflow).await
    }

    pub async fn execute_workflow(
        &self,
        workflow_id: Uuid,
    ) -> MeshResult<HashMap<Uuid, serde_json::Value>> {
        self.engine.execute(workflow_id).await
    }

    pub async fn workflow(&self, workflow_id: Uuid) -> Option<Workflow> {
        self.engine.get(workflow_id).await
    }

    pub async fn workflows(&self) -> Vec<WorkflowSummary> {
        self.engine.list().await
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    pub async fn send_message(&self, message: Message) -> bool {
        self.bus.send(message).await
    }

    pub async fn publish(&self, topic: &str, payload: serde_json::Value, sender_id: &str) -> usize {
        self.bus.publish(topic, payload, sender_id).await
    }

    pub async fn subscribe(&self, agent_id: &str, topic: &str) -> MeshResult<()> {
        self.bus.subscribe(agent_id, topic).await
    }

    pub async fn unsubscribe(&self, agent_id: &str, topic: &str) -> bool {
        self.bus.unsubscribe(agent_id, topic).await
    }

    /// Whole-system snapshot.
    pub async fn system_status(&self) -> SystemStatus {
        SystemStatus {
            running: self.is_running(),
            registered_agent_count: self.registry.len().await,
            per_category_counts: self.registry.category_counts().await,
            active_workflow_count: self.engine.active_count().await,
            bus: self.bus.status().await,
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor_handle.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use agentmesh_core::{AgentConfig, Capabilities, MeshError};
    use async_trait::async_trait;

    struct Echo(AgentConfig);

    #[async_trait]
    impl Agent for Echo {
        fn config(&self) -> &AgentConfig {
            &self.0
        }

        async fn process(
            &self,
            request: AgentRequest,
            _context: Option<serde_json::Value>,
        ) -> MeshResult<AgentResponse> {
            Ok(AgentResponse::success(
                self.id(),
                serde_json::to_value(request)?,
            ))
        }

        async fn capabilities(&self) -> MeshResult<Capabilities> {
            Ok(Capabilities::from_config(&self.0, &["echo"]))
        }
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            scan_interval_ms: 0,
            bus_poll_interval_ms: 20,
            bus_shutdown_grace_ms: 200,
            ..OrchestratorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let orchestrator = Orchestrator::new(fast_config()).unwrap();
        assert!(!orchestrator.is_running());

        orchestrator.start();
        orchestrator.start();
        assert!(orchestrator.is_running());

        orchestrator
            .register_agent(Arc::new(Echo(AgentConfig::new("echo").with_id("e-1"))), "echo")
            .await
            .unwrap();
        let status = orchestrator.system_status().await;
        assert!(status.running);
        assert_eq!(status.registered_agent_count, 1);
        assert_eq!(status.per_category_counts["echo"], 1);
        assert_eq!(status.bus.registered_agents, vec!["e-1"]);

        orchestrator.stop().await;
        let status = orchestrator.system_status().await;
        assert!(!status.running);
        assert_eq!(status.registered_agent_count, 0);
        assert!(status.bus.registered_agents.is_empty());
    }

    #[tokio::test]
    async fn test_workflow_passthrough() {
        let orchestrator = Orchestrator::new(fast_config()).unwrap();
        orchestrator
            .register_agent(Arc::new(Echo(AgentConfig::new("echo").with_id("e-1"))), "echo")
            .await
            .unwrap();

        let id = orchestrator
            .create_named_workflow(
                "echo-twice",
                "",
                vec![
                    StepDefinition::new("echo", "first"),
                    StepDefinition::new("echo", "second").with_dependencies(vec![0]),
                ],
            )
            .await;
        assert_eq!(orchestrator.system_status().await.active_workflow_count, 1);

        let results = orchestrator.execute_workflow(id).await.unwrap();
        let wf = orchestrator.workflow(id).await.unwrap();
        assert_eq!(results[&wf.steps[1].id], "second");
        assert_eq!(orchestrator.system_status().await.active_workflow_count, 0);
        assert_eq!(orchestrator.workflows().await.len(), 1);
    }

    #[tokio::test]
    async fn test_check_health_counts_agents() {
        let orchestrator = Orchestrator::new(fast_config()).unwrap();
        for id in ["e-1", "e-2"] {
            orchestrator
                .register_agent(Arc::new(Echo(AgentConfig::new("echo").with_id(id))), "echo")
                .await
                .unwrap();
        }
        let summary = orchestrator.check_health().await;
        assert_eq!(summary.healthy, 2);
        assert_eq!(summary.unhealthy, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let zero_interval = OrchestratorConfig {
            health_check_interval_secs: 0,
            ..fast_config()
        };
        assert!(matches!(
            Orchestrator::new(zero_interval),
            Err(MeshError::Config(_))
        ));

        let zero_poll = OrchestratorConfig {
            bus_poll_interval_ms: 0,
            ..fast_config()
        };
        let strategy: Arc<dyn SelectionStrategy> = Arc::new(crate::selection::RoundRobin::default());
        assert!(matches!(
            Orchestrator::with_strategy(zero_poll, strategy),
            Err(MeshError::Config(_))
        ));
    }
}
