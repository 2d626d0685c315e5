use crate::registry::AgentRegistry;
use crate::types::WorkflowStatus;
use crate::workflow::{StepDefinition, Workflow, WorkflowSummary};
use agentmesh_core::{MeshError, MeshResult};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A step pulled out of the store for dispatch.
struct Dispatch {
    step_id: Uuid,
    agent_category: String,
    operation: String,
    payload: serde_json::Value,
}

/// Builds workflows and executes them against the agent registry.
///
/// Workflow state lives here; only `execute` mutates it, in short write-lock
/// sections that are never held across an agent call.
pub struct WorkflowEngine {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    registry: Arc<AgentRegistry>,
    scan_interval: Duration,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<AgentRegistry>, scan_interval: Duration) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            registry,
            scan_interval,
        }
    }

    /// Build and store a workflow from index-based definitions.
    pub async fn create_workflow(&self, definitions: Vec<StepDefinition>) -> Uuid {
        self.create_named_workflow("workflow", "", definitions).await
    }

    /// Same as [`create_workflow`](Self::create_workflow) with a name and description.
    pub async fn create_named_workflow(
        &self,
        name: &str,
        description: &str,
        definitions: Vec<StepDefinition>,
    ) -> Uuid {
        let workflow = Workflow::from_definitions(name, definitions).with_description(description);
        self.store(workflow).await
    }

    /// Store a pre-built workflow whose steps already carry id dependencies.
    ///
    /// The workflow must be pending. Dependencies are not validated here: one
    /// that can never complete surfaces as a deadlock during execution.
    pub async fn submit(&self, workflow: Workflow) -> MeshResult<Uuid> {
        if workflow.status != WorkflowStatus::Pending {
            return Err(MeshError::InvalidWorkflowState {
                workflow_id: workflow.id,
                reason: format!("submitted workflow is {}", workflow.status),
            });
        }
        Ok(self.store(workflow).await)
    }

    async fn store(&self, workflow: Workflow) -> Uuid {
        let id = workflow.id;
        info!(
            workflow_id = %id,
            name = %workflow.name,
            steps = workflow.steps.len(),
            "Workflow created"
        );
        self.workflows.write().await.insert(id, workflow);
        id
    }

    /// Run a pending workflow to completion.
    ///
    /// Returns the result of every step keyed by step id. The first failing
    /// step fails the whole workflow; steps after it never start.
    pub async fn execute(&self, workflow_id: Uuid) -> MeshResult<HashMap<Uuid, serde_json::Value>> {
        let step_order = {
            let mut workflows = self.workflows.write().await;
            let workflow = workflows
                .get_mut(&workflow_id)
                .ok_or(MeshError::WorkflowNotFound(workflow_id))?;
            if workflow.status != WorkflowStatus::Pending {
                return Err(MeshError::InvalidWorkflowState {
                    workflow_id,
                    reason: format!("workflow is {}", workflow.status),
                });
            }
            workflow.status = WorkflowStatus::Running;
            workflow.started_at = Some(Utc::now());
            workflow.steps.iter().map(|s| s.id).collect::<Vec<_>>()
        };

        let started = Instant::now();
        info!(workflow_id = %workflow_id, steps = step_order.len(), "Executing workflow");

        loop {
            if self.with_workflow(workflow_id, Workflow::is_done).await? {
                break;
            }

            let mut started_this_scan = 0usize;
            for &step_id in &step_order {
                let Some(dispatch) = self.claim_if_ready(workflow_id, step_id).await? else {
                    continue;
                };
                started_this_scan += 1;
                self.run_step(workflow_id, dispatch).await?;
            }

            if started_this_scan == 0 {
                let pending = self.with_workflow(workflow_id, Workflow::pending_count).await?;
                if pending > 0 {
                    warn!(
                        workflow_id = %workflow_id,
                        pending,
                        "Workflow deadlock: pending steps with unmet dependencies"
                    );
                    self.finish(workflow_id, WorkflowStatus::Failed).await;
                    return Err(MeshError::WorkflowDeadlock {
                        workflow_id,
                        pending,
                    });
                }
            }

            if self.scan_interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.scan_interval).await;
            }
        }

        self.finish(workflow_id, WorkflowStatus::Completed).await;
        let results = self.with_workflow(workflow_id, Workflow::results).await?;
        info!(
            workflow_id = %workflow_id,
            duration_ms = started.elapsed().as_millis() as u64,
            "Workflow completed"
        );
        Ok(results)
    }

    /// Mark `step_id` running if it is ready against the current completed set.
    async fn claim_if_ready(&self, workflow_id: Uuid, step_id: Uuid) -> MeshResult<Option<Dispatch>> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or(MeshError::WorkflowNotFound(workflow_id))?;
        let completed = workflow.completed_ids();
        let Some(step) = workflow.step_mut(step_id) else {
            return Ok(None);
        };
        if !step.is_ready(&completed) {
            return Ok(None);
        }
        step.mark_running();
        Ok(Some(Dispatch {
            step_id,
            agent_category: step.agent_category.clone(),
            operation: step.operation.clone(),
            payload: step.payload.clone(),
        }))
    }

    async fn run_step(&self, workflow_id: Uuid, dispatch: Dispatch) -> MeshResult<()> {
        let Dispatch {
            step_id,
            agent_category,
            operation,
            payload,
        } = dispatch;
        debug!(
            workflow_id = %workflow_id,
            step_id = %step_id,
            agent_type = %agent_category,
            operation = %operation,
            "Dispatching step"
        );

        let outcome = self
            .registry
            .query(&agent_category, operation.as_str(), Some(payload), None)
            .await;

        let failure = match outcome {
            Ok(response) if response.success => {
                let result = response.data.unwrap_or(serde_json::Value::Null);
                let mut workflows = self.workflows.write().await;
                if let Some(step) = workflows
                    .get_mut(&workflow_id)
                    .and_then(|w| w.step_mut(step_id))
                {
                    step.mark_completed(result);
                }
                debug!(workflow_id = %workflow_id, step_id = %step_id, "Step completed");
                return Ok(());
            }
            Ok(response) => response
                .error
                .unwrap_or_else(|| "agent reported failure".to_string()),
            Err(e) => e.to_string(),
        };

        {
            let mut workflows = self.workflows.write().await;
            if let Some(workflow) = workflows.get_mut(&workflow_id) {
                if let Some(step) = workflow.step_mut(step_id) {
                    step.mark_failed(failure.clone());
                }
                workflow.status = WorkflowStatus::Failed;
                workflow.completed_at = Some(Utc::now());
            }
        }
        error!(
            workflow_id = %workflow_id,
            step_id = %step_id,
            agent_type = %agent_category,
            error = %failure,
            "Workflow step failed"
        );
        Err(MeshError::WorkflowStepFailure {
            workflow_id,
            step_id,
            reason: failure,
        })
    }

    async fn finish(&self, workflow_id: Uuid, status: WorkflowStatus) {
        let mut workflows = self.workflows.write().await;
        if let Some(workflow) = workflows.get_mut(&workflow_id) {
            workflow.status = status;
            workflow.completed_at = Some(Utc::now());
        }
    }

    async fn with_workflow<T>(&self, workflow_id: Uuid, f: impl FnOnce(&Workflow) -> T) -> MeshResult<T> {
        let workflows = self.workflows.read().await;
        workflows
            .get(&workflow_id)
            .map(f)
            .ok_or(MeshError::WorkflowNotFound(workflow_id))
    }

    /// Snapshot of a workflow.
    pub async fn get(&self, workflow_id: Uuid) -> Option<Workflow> {
        self.workflows.read().await.get(&workflow_id).cloned()
    }

    /// Summaries of every stored workflow, oldest first.
    pub async fn list(&self) -> Vec<WorkflowSummary> {
        let workflows = self.workflows.read().await;
        let mut all: Vec<WorkflowSummary> = workflows.values().map(Workflow::summary).collect();
        all.sort_by_key(|s| s.created_at);
        all
    }

    /// Workflows that are pending or running.
    pub async fn active_count(&self) -> usize {
        self.workflows
            .read()
            .await
            .values()
            .filter(|w| !w.status.is_terminal())
            .count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::types::StepStatus;
    use crate::workflow::WorkflowStep;
    use agentmesh_core::{Agent, AgentConfig, AgentRequest, AgentResponse, Capabilities};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every operation with `{ "op": <operation> }`, failing the ones
    /// listed. The `crash` operation panics.
    struct ScriptedAgent {
        config: AgentConfig,
        fail_ops: Vec<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn config(&self) -> &AgentConfig {
            &self.config
        }

        async fn process(
            &self,
            request: AgentRequest,
            _context: Option<serde_json::Value>,
        ) -> MeshResult<AgentResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let op = request.as_text().unwrap_or_default().to_string();
            if op == "crash" {
                panic!("scripted crash");
            }
            if self.fail_ops.contains(&op.as_str()) {
                return Ok(AgentResponse::failure(self.id(), format!("{op} failed")));
            }
            Ok(AgentResponse::success(self.id(), serde_json::json!({ "op": op })))
        }

        async fn capabilities(&self) -> MeshResult<Capabilities> {
            Ok(Capabilities::from_config(&self.config, &[]))
        }
    }

    async fn engine_with(fail_ops: Vec<&'static str>) -> (WorkflowEngine, Arc<AtomicUsize>) {
        let bus = MessageBus::new(Duration::from_millis(20), Duration::from_millis(200));
        let registry = Arc::new(AgentRegistry::new(bus, Duration::from_secs(5)));
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .register(
                Arc::new(ScriptedAgent {
                    config: AgentConfig::new("scripted").with_id("s-1"),
                    fail_ops,
                    calls: calls.clone(),
                }),
                "market",
            )
            .await
            .unwrap();
        (WorkflowEngine::new(registry, Duration::ZERO), calls)
    }

    fn step(op: &str, deps: Vec<i64>) -> StepDefinition {
        StepDefinition::new("market", op).with_dependencies(deps)
    }

    #[tokio::test]
    async fn test_execute_chain() {
        let (engine, _) = engine_with(vec![]).await;
        let id = engine
            .create_workflow(vec![step("a", vec![]), step("b", vec![0]), step("c", vec![1])])
            .await;

        let results = engine.execute(id).await.unwrap();
        assert_eq!(results.len(), 3);

        let wf = engine.get(id).await.unwrap();
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert!(wf.completed_at.is_some());
        assert_eq!(results[&wf.steps[2].id]["op"], "c");
        for pair in wf.steps.windows(2) {
            assert!(pair[0].completed_at.unwrap() <= pair[1].started_at.unwrap());
        }
        assert_eq!(engine.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_failure_aborts() {
        let (engine, calls) = engine_with(vec!["b"]).await;
        let id = engine
            .create_workflow(vec![step("a", vec![]), step("b", vec![]), step("c", vec![1])])
            .await;

        let err = engine.execute(id).await.unwrap_err();
        let wf = engine.get(id).await.unwrap();
        match err {
            MeshError::WorkflowStepFailure {
                workflow_id,
                step_id,
                reason,
            } => {
                assert_eq!(workflow_id, id);
                assert_eq!(step_id, wf.steps[1].id);
                assert_eq!(reason, "b failed");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(wf.status, WorkflowStatus::Failed);
        assert_eq!(wf.steps[0].status, StepStatus::Completed);
        assert!(wf.steps[0].result.is_some());
        assert_eq!(wf.steps[1].status, StepStatus::Failed);
        assert_eq!(wf.steps[2].status, StepStatus::Pending);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_step_fails_workflow() {
        let (engine, calls) = engine_with(vec![]).await;
        let id = engine
            .create_workflow(vec![step("a", vec![]), step("crash", vec![0]), step("c", vec![1])])
            .await;

        let err = engine.execute(id).await.unwrap_err();
        let wf = engine.get(id).await.unwrap();
        assert!(matches!(
            err,
            MeshError::WorkflowStepFailure { step_id, ref reason, .. }
                if step_id == wf.steps[1].id && reason.contains("panicked")
        ));
        assert_eq!(wf.status, WorkflowStatus::Failed);
        assert_eq!(wf.steps[1].status, StepStatus::Failed);
        assert_eq!(wf.steps[2].status, StepStatus::Pending);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_category_fails_step() {
        let (engine, _) = engine_with(vec![]).await;
        let id = engine
            .create_workflow(vec![StepDefinition::new("finance", "roi")])
            .await;
        let err = engine.execute(id).await.unwrap_err();
        assert!(
            matches!(err, MeshError::WorkflowStepFailure { ref reason, .. } if reason.contains("finance"))
        );
    }

    #[tokio::test]
    async fn test_dangling_dependency_deadlocks() {
        let (engine, calls) = engine_with(vec![]).await;
        let mut wf = Workflow::new("dangling");
        wf.add_step(WorkflowStep::new("market", "a"));
        wf.add_step(WorkflowStep::new("market", "b").with_dependencies(vec![Uuid::new_v4()]));
        let id = engine.submit(wf).await.unwrap();

        let err = engine.execute(id).await.unwrap_err();
        assert!(matches!(err, MeshError::WorkflowDeadlock { pending: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.get(id).await.unwrap().status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_execute_twice_rejected() {
        let (engine, _) = engine_with(vec![]).await;
        let id = engine.create_workflow(vec![step("a", vec![])]).await;
        engine.execute(id).await.unwrap();
        let err = engine.execute(id).await.unwrap_err();
        assert!(matches!(err, MeshError::InvalidWorkflowState { .. }));
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let (engine, _) = engine_with(vec![]).await;
        let missing = Uuid::new_v4();
        let err = engine.execute(missing).await.unwrap_err();
        assert!(matches!(err, MeshError::WorkflowNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_empty_workflow_completes() {
        let (engine, _) = engine_with(vec![]).await;
        let id = engine.create_workflow(Vec::new()).await;
        assert!(engine.execute(id).await.unwrap().is_empty());
        assert_eq!(engine.get(id).await.unwrap().status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_list_and_active_count() {
        let (engine, _) = engine_with(vec![]).await;
        let first = engine
            .create_named_workflow("first", "pending one", vec![step("a", vec![])])
            .await;
        let second = engine.create_workflow(vec![step("a", vec![])]).await;
        assert_eq!(engine.active_count().await, 2);

        engine.execute(second).await.unwrap();
        assert_eq!(engine.active_count().await, 1);

        let list = engine.list().await;
        assert_eq!(list.len(), 2);
        let entry = list.iter().find(|s| s.id == first).unwrap();
        assert_eq!(entry.name, "first");
        assert_eq!(entry.status, WorkflowStatus::Pending);
    }
}
