//! Agent orchestration: registry, message bus, workflow engine and health monitoring.
//!
//! Agents implementing [`agentmesh_core::Agent`] are registered under a category.
//! Workflows are graphs of steps, each routed to one member of its category
//! once every step it depends on has completed. A message bus gives each agent
//! an inbound queue plus topic subscriptions, and a background monitor demotes
//! agents whose health checks fail.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Owns every component; the entry point for callers.
//! - [`AgentRegistry`]: Agent registrations and category routing.
//! - [`WorkflowEngine`]: Builds and executes dependency-ordered workflows.
//! - [`MessageBus`]: Per-agent queues, broadcast and publish/subscribe.
//! - [`HealthMonitor`]: Periodic health checks with status demotion.
//! - [`OrchestratorConfig`]: Intervals and deadlines, loadable from TOML.

/// Message bus with per-agent queues and topic subscriptions.
pub mod bus;
/// Orchestrator configuration.
pub mod config;
/// Workflow execution.
pub mod engine;
/// Health monitoring loop.
pub mod monitor;
/// Top-level orchestrator facade.
pub mod orchestrator;
/// Agent registry and query routing.
pub mod registry;
/// Member selection strategies.
pub mod selection;
/// Shared status types.
pub mod types;
/// Workflow and step model.
pub mod workflow;

pub use bus::{BusStatus, MessageBus, MessageHandler};
pub use config::OrchestratorConfig;
pub use engine::WorkflowEngine;
pub use monitor::{HealthMonitor, HealthSummary};
pub use orchestrator::Orchestrator;
pub use registry::{AgentRegistration, AgentRegistry};
pub use selection::{Candidate, RoundRobin, SelectionStrategy};
pub use types::{AgentStatus, AgentStatusSnapshot, StepStatus, SystemStatus, WorkflowStatus};
pub use workflow::{StepDefinition, Workflow, WorkflowStep, WorkflowSummary};
