//! Core types and error definitions for the agentmesh orchestration engine.
//!
//! This crate provides the foundational types shared across all agentmesh crates,
//! including error handling, the agent contract, and inter-agent message types.
//!
//! # Main types
//!
//! - [`MeshError`]: Unified error enum for all agentmesh subsystems.
//! - [`MeshResult`]: Convenience alias for `Result<T, MeshError>`.
//! - [`Agent`]: The contract every orchestrated unit implements.
//! - [`AgentResponse`]: Structured success/failure result of an agent call.
//! - [`Message`]: A message routed through the message bus.
//! - [`CacheStore`]: Opaque key-value cache boundary used by agents.

/// The agent contract and its request/response types.
pub mod agent;
/// Key-value cache boundary and an in-memory implementation.
pub mod cache;
/// Inter-agent message types.
pub mod message;
/// Per-agent request statistics.
pub mod stats;

pub use agent::{
    Agent, AgentConfig, AgentRequest, AgentResponse, Capabilities, HealthReport, HealthState,
};
pub use cache::{CacheStore, MemoryCache};
pub use message::{Message, MessageKind, MessagePriority};
pub use stats::AgentStats;

use uuid::Uuid;

// --- Error types ---

/// Top-level error type for the agentmesh engine.
///
/// Each variant corresponds to a failure the orchestration layer can
/// report to its callers.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// No agent is registered under the given id.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// The category has no member eligible to serve a request.
    #[error("No agents of type '{0}' available")]
    NoAgentAvailable(String),

    /// An agent did not answer before the deadline.
    #[error("Agent {agent_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// The agent that was being waited on.
        agent_id: String,
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// An agent with the same id is already registered.
    #[error("Agent {0} is already registered")]
    DuplicateAgent(String),

    /// No workflow exists with the given id.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// The workflow is not in a state that allows the requested operation.
    #[error("Workflow {workflow_id} cannot be executed: {reason}")]
    InvalidWorkflowState {
        /// The workflow concerned.
        workflow_id: Uuid,
        /// Why the operation was refused.
        reason: String,
    },

    /// No pending step can ever become ready.
    #[error("Workflow {workflow_id} deadlocked with {pending} pending step(s)")]
    WorkflowDeadlock {
        /// The deadlocked workflow.
        workflow_id: Uuid,
        /// Number of steps left pending.
        pending: usize,
    },

    /// A step failed and aborted its workflow.
    #[error("Workflow {workflow_id} failed at step {step_id}: {reason}")]
    WorkflowStepFailure {
        /// The aborted workflow.
        workflow_id: Uuid,
        /// The step that failed.
        step_id: Uuid,
        /// The underlying agent error.
        reason: String,
    },

    /// A message could not be delivered.
    #[error("Communication error: {0}")]
    Communication(String),

    /// An error raised by an agent implementation.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`MeshError`].
pub type MeshResult<T> = Result<T, MeshError>;
