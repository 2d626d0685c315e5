use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// What a [`Message`] is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Ask an agent to perform a task.
    TaskRequest,
    /// Answer to a [`MessageKind::TaskRequest`].
    TaskResponse,
    /// Progress report for a running task.
    TaskUpdate,
    /// A task finished successfully.
    TaskComplete,
    /// A task finished with an error.
    TaskFailed,
    /// Ask peers to coordinate on shared work.
    CoordinationRequest,
    /// Answer to a [`MessageKind::CoordinationRequest`].
    CoordinationResponse,
    /// A workflow started.
    WorkflowStart,
    /// A workflow step changed state.
    WorkflowStep,
    /// A workflow finished.
    WorkflowComplete,
    /// Generic status change; also used for published topic events.
    StatusUpdate,
    /// Liveness check.
    HealthCheck,
    /// Ask an agent what it can do.
    CapabilityQuery,
    /// Answer to a [`MessageKind::CapabilityQuery`].
    CapabilityResponse,
    /// Ask an agent for data.
    DataRequest,
    /// Answer to a [`MessageKind::DataRequest`].
    DataResponse,
    /// Ask for a shared resource.
    ResourceRequest,
    /// Answer to a [`MessageKind::ResourceRequest`].
    ResourceResponse,
    /// Report an error to interested parties.
    ErrorNotification,
    /// Report an unexpected exception with details.
    ExceptionReport,
    /// The system is shutting down.
    SystemShutdown,
    /// An agent joined the system.
    AgentRegistration,
    /// An agent left the system.
    AgentDeregistration,
}

/// Delivery priority of a [`Message`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    /// Background traffic.
    Low,
    /// The default.
    #[default]
    Normal,
    /// Should be handled soon.
    High,
    /// Should be handled before anything else queued.
    Urgent,
    /// System-critical.
    Critical,
}

/// A message routed between agents by the message bus.
///
/// A message without a recipient is a broadcast: the bus delivers one copy to
/// every registered endpoint, each with `recipient` set to that endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// The agent (or system component) that sent the message.
    pub sender: String,
    /// Target agent, or `None` for a broadcast.
    pub recipient: Option<String>,
    /// What the message is about.
    pub kind: MessageKind,
    /// Delivery priority.
    #[serde(default)]
    pub priority: MessagePriority,
    /// Pairs requests with their responses.
    pub correlation_id: Option<Uuid>,
    /// Message body.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Arbitrary key-value metadata attached to the message.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// UTC timestamp of when the message was created.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a broadcast message of the given kind.
    pub fn new(sender: impl Into<String>, kind: MessageKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            recipient: None,
            kind,
            priority: MessagePriority::Normal,
            correlation_id: None,
            payload,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a message addressed to a single recipient.
    pub fn direct(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(sender, kind, payload).to(recipient)
    }

    /// Sets the recipient.
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Builds a reply addressed to this message's sender.
    ///
    /// The reply carries this message's correlation id, or its id when it had none.
    pub fn reply(&self, sender: impl Into<String>, kind: MessageKind, payload: serde_json::Value) -> Self {
        Self::direct(sender, self.sender.clone(), kind, payload)
            .with_priority(self.priority)
            .with_correlation(self.correlation_id.unwrap_or(self.id))
    }

    /// Returns `true` when the message has no recipient.
    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }
}
