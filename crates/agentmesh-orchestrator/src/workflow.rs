use crate::types::{StepStatus, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;
use uuid::Uuid;

/// One step as submitted by a caller, before ids are assigned.
///
/// `dependencies` are positions of earlier definitions in the same list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Category of agent that runs the step.
    #[serde(alias = "agent")]
    pub agent_category: String,
    /// Operation name passed to the agent as its request.
    #[serde(alias = "task")]
    pub operation: String,
    /// Input payload passed to the agent as context.
    #[serde(default, alias = "data")]
    pub payload: serde_json::Value,
    /// Indices of earlier definitions this step waits on.
    #[serde(default)]
    pub dependencies: Vec<i64>,
}

impl StepDefinition {
    pub fn new(agent_category: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            agent_category: agent_category.into(),
            operation: operation.into(),
            payload: serde_json::Value::Null,
            dependencies: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<i64>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// A step of a built workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub agent_category: String,
    pub operation: String,
    pub payload: serde_json::Value,
    pub dependencies: Vec<Uuid>,
    pub status: StepStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStep {
    pub fn new(agent_category: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_category: agent_category.into(),
            operation: operation.into(),
            payload: serde_json::Value::Null,
            dependencies: Vec::new(),
            status: StepStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Pending with every dependency completed.
    pub fn is_ready(&self, completed_ids: &HashSet<Uuid>) -> bool {
        self.status == StepStatus::Pending
            && self
                .dependencies
                .iter()
                .all(|dep| completed_ids.contains(dep))
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn mark_completed(&mut self, result: serde_json::Value) {
        self.status = StepStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, reason: String) {
        self.status = StepStatus::Failed;
        self.error = Some(reason);
        self.completed_at = Some(Utc::now());
    }
}

/// A directed graph of steps with all-or-nothing failure semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub steps: Vec<WorkflowStep>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// An empty pending workflow.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            metadata: HashMap::new(),
            steps: Vec::new(),
            status: WorkflowStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Append a step whose dependencies are already step ids.
    pub fn add_step(&mut self, step: WorkflowStep) -> Uuid {
        let id = step.id;
        self.steps.push(step);
        id
    }

    /// Build a workflow from index-based definitions.
    ///
    /// Every step gets a fresh id first; then each dependency index is
    /// rewritten into the id of the step at that position. Indices that do not
    /// point at an earlier step are dropped with a warning, so the resulting
    /// graph is always acyclic.
    pub fn from_definitions(name: impl Into<String>, definitions: Vec<StepDefinition>) -> Self {
        let mut workflow = Self::new(name);
        let ids: Vec<Uuid> = definitions.iter().map(|_| Uuid::new_v4()).collect();

        for (position, (definition, id)) in definitions.into_iter().zip(&ids).enumerate() {
            let mut dependencies = Vec::with_capacity(definition.dependencies.len());
            for index in definition.dependencies {
                match usize::try_from(index).ok().filter(|&i| i < position) {
                    Some(i) => {
                        let dep = ids[i];
                        if !dependencies.contains(&dep) {
                            dependencies.push(dep);
                        }
                    }
                    None => warn!(
                        workflow_id = %workflow.id,
                        step = position,
                        dependency = index,
                        "Dropping dependency index that does not name an earlier step"
                    ),
                }
            }

            let mut step = WorkflowStep::new(definition.agent_category, definition.operation)
                .with_payload(definition.payload)
                .with_dependencies(dependencies);
            step.id = *id;
            workflow.steps.push(step);
        }
        workflow
    }

    pub fn step(&self, id: Uuid) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub(crate) fn step_mut(&mut self, id: Uuid) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Ids of completed steps.
    pub fn completed_ids(&self) -> HashSet<Uuid> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.id)
            .collect()
    }

    /// Ids of pending steps whose dependencies are all completed, in step order.
    pub fn ready_steps(&self) -> Vec<Uuid> {
        let completed = self.completed_ids();
        self.steps
            .iter()
            .filter(|s| s.is_ready(&completed))
            .map(|s| s.id)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .count()
    }

    pub fn terminal_count(&self) -> usize {
        self.steps.iter().filter(|s| s.status.is_terminal()).count()
    }

    /// Every step has reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.terminal_count() == self.steps.len()
    }

    /// Results of completed steps keyed by step id.
    pub fn results(&self) -> HashMap<Uuid, serde_json::Value> {
        self.steps
            .iter()
            .filter_map(|s| s.result.clone().map(|r| (s.id, r)))
            .collect()
    }

    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            total_steps: self.steps.len(),
            completed_steps: self
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Completed)
                .count(),
            failed_steps: self
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Failed)
                .count(),
            created_at: self.created_at,
        }
    }
}

/// Compact listing entry for a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn defs(deps: &[&[i64]]) -> Vec<StepDefinition> {
        deps.iter()
            .enumerate()
            .map(|(i, d)| StepDefinition::new("market", format!("op-{i}")).with_dependencies(d.to_vec()))
            .collect()
    }

    #[test]
    fn test_definition_aliases() {
        let json = r#"[
            {"agent": "market", "task": "comps", "data": {"zip": "78701"}},
            {"agent_category": "finance", "operation": "roi", "dependencies": [0]}
        ]"#;
        let definitions: Vec<StepDefinition> = serde_json::from_str(json).unwrap();
        assert_eq!(definitions[0].agent_category, "market");
        assert_eq!(definitions[0].operation, "comps");
        assert_eq!(definitions[0].payload["zip"], "78701");
        assert!(definitions[0].dependencies.is_empty());
        assert_eq!(definitions[1].dependencies, vec![0]);
        assert!(definitions[1].payload.is_null());
    }

    #[test]
    fn test_index_dependencies_resolved() {
        let wf = Workflow::from_definitions("chain", defs(&[&[], &[0], &[0, 1]]));
        assert_eq!(wf.status, WorkflowStatus::Pending);
        assert_eq!(wf.steps.len(), 3);
        assert!(wf.steps[0].dependencies.is_empty());
        assert_eq!(wf.steps[1].dependencies, vec![wf.steps[0].id]);
        assert_eq!(
            wf.steps[2].dependencies,
            vec![wf.steps[0].id, wf.steps[1].id]
        );
    }

    #[test]
    fn test_invalid_indices_dropped() {
        // self, forward, negative and out-of-range references
        let wf = Workflow::from_definitions("lenient", defs(&[&[0], &[1, 2], &[-1, 99, 0]]));
        assert!(wf.steps[0].dependencies.is_empty());
        assert!(wf.steps[1].dependencies.is_empty());
        assert_eq!(wf.steps[2].dependencies, vec![wf.steps[0].id]);
    }

    #[test]
    fn test_duplicate_indices_collapsed() {
        let wf = Workflow::from_definitions("dups", defs(&[&[], &[0, 0]]));
        assert_eq!(wf.steps[1].dependencies.len(), 1);
    }

    #[test]
    fn test_ready_steps_follow_completion() {
        let mut wf = Workflow::from_definitions("chain", defs(&[&[], &[0], &[1]]));
        let ids: Vec<Uuid> = wf.steps.iter().map(|s| s.id).collect();
        assert_eq!(wf.ready_steps(), vec![ids[0]]);

        wf.step_mut(ids[0]).unwrap().mark_running();
        assert!(wf.ready_steps().is_empty());

        wf.step_mut(ids[0])
            .unwrap()
            .mark_completed(serde_json::json!("ok"));
        assert_eq!(wf.ready_steps(), vec![ids[1]]);
        assert_eq!(wf.terminal_count(), 1);
        assert_eq!(wf.pending_count(), 2);
        assert!(!wf.is_done());
    }

    #[test]
    fn test_failed_dependency_blocks() {
        let mut wf = Workflow::from_definitions("blocked", defs(&[&[], &[0]]));
        let first = wf.steps[0].id;
        wf.step_mut(first).unwrap().mark_failed("boom".into());
        assert!(wf.ready_steps().is_empty());
        let step = wf.step(first).unwrap();
        assert_eq!(step.error.as_deref(), Some("boom"));
        assert!(step.completed_at.is_some());
    }

    #[test]
    fn test_results_and_summary() {
        let mut wf = Workflow::from_definitions("pair", defs(&[&[], &[]]));
        let first = wf.steps[0].id;
        wf.step_mut(first)
            .unwrap()
            .mark_completed(serde_json::json!({"roi": 0.12}));

        let results = wf.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[&first]["roi"], 0.12);

        let summary = wf.summary();
        assert_eq!(summary.total_steps, 2);
        assert_eq!(summary.completed_steps, 1);
        assert_eq!(summary.failed_steps, 0);
    }

    #[test]
    fn test_empty_workflow_is_done() {
        let wf = Workflow::from_definitions("empty", Vec::new());
        assert!(wf.is_done());
    }
}
