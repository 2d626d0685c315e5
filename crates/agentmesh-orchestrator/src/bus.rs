//! Inter-agent message bus.
//!
//! Every endpoint owns an unbounded FIFO inbox drained by a dedicated consumer
//! task. Any component holding a [`MessageBus`] may enqueue; only the
//! endpoint's own task dequeues. Topic subscriptions layer pub/sub on top of
//! the same inboxes.

use agentmesh_core::{Message, MessageKind, MeshError, MeshResult};
use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Receives messages delivered to an endpoint.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message. A returned message is sent back through the bus.
    async fn handle_message(&self, message: Message) -> MeshResult<Option<Message>>;
}

/// Snapshot of the bus for status reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusStatus {
    pub registered_agents: Vec<String>,
    pub subscriptions: HashMap<String, Vec<String>>,
    pub queue_sizes: HashMap<String, usize>,
}

struct Endpoint {
    sender: mpsc::UnboundedSender<Message>,
    queued: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Endpoint {
    fn enqueue(&self, message: Message) -> bool {
        self.queued.fetch_add(1, Ordering::AcqRel);
        match self.sender.send(message) {
            Ok(()) => true,
            Err(_) => {
                self.queued.fetch_sub(1, Ordering::AcqRel);
                false
            }
        }
    }
}

#[derive(Default)]
struct BusState {
    endpoints: HashMap<String, Endpoint>,
    subscriptions: HashMap<String, HashSet<String>>,
}

impl BusState {
    fn prune_subscriber(&mut self, agent_id: &str) {
        self.subscriptions.retain(|_, subscribers| {
            subscribers.remove(agent_id);
            !subscribers.is_empty()
        });
    }
}

struct BusShared {
    state: RwLock<BusState>,
    poll_interval: Duration,
    shutdown_grace: Duration,
}

/// Direct, broadcast and topic delivery between registered agents.
///
/// Cloning is cheap; clones share the same endpoints and subscriptions.
#[derive(Clone)]
pub struct MessageBus {
    shared: Arc<BusShared>,
}

impl MessageBus {
    /// Create a bus whose consumer loops re-check for shutdown every `poll_interval`.
    pub fn new(poll_interval: Duration, shutdown_grace: Duration) -> Self {
        Self {
            shared: Arc::new(BusShared {
                state: RwLock::new(BusState::default()),
                poll_interval,
                shutdown_grace,
            }),
        }
    }

    /// Open an inbox for `agent_id` and start its consumer loop bound to `handler`.
    pub async fn register_endpoint(
        &self,
        agent_id: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> MeshResult<()> {
        let mut state = self.shared.state.write().await;
        if state.endpoints.contains_key(agent_id) {
            return Err(MeshError::DuplicateAgent(agent_id.to_string()));
        }

        let (sender, inbox) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(consume(
            agent_id.to_string(),
            handler,
            inbox,
            queued.clone(),
            running.clone(),
            Arc::downgrade(&self.shared),
            self.shared.poll_interval,
        ));

        state.endpoints.insert(
            agent_id.to_string(),
            Endpoint {
                sender,
                queued,
                running,
                task,
            },
        );
        info!(agent_id = %agent_id, "Bus endpoint registered");
        Ok(())
    }

    /// Close an endpoint: stop its loop, drop its inbox and its subscriptions.
    ///
    /// Returns `false` if the endpoint was unknown.
    pub async fn unregister_endpoint(&self, agent_id: &str) -> bool {
        let endpoint = {
            let mut state = self.shared.state.write().await;
            let Some(endpoint) = state.endpoints.remove(agent_id) else {
                return false;
            };
            state.prune_subscriber(agent_id);
            endpoint
        };
        self.close(agent_id, endpoint).await;
        info!(agent_id = %agent_id, "Bus endpoint unregistered");
        true
    }

    /// Close every endpoint and forget all subscriptions.
    pub async fn shutdown(&self) {
        let endpoints: Vec<(String, Endpoint)> = {
            let mut state = self.shared.state.write().await;
            state.subscriptions.clear();
            state.endpoints.drain().collect()
        };
        let count = endpoints.len();
        join_all(
            endpoints
                .into_iter()
                .map(|(agent_id, endpoint)| async move { self.close(&agent_id, endpoint).await }),
        )
        .await;
        info!(endpoints = count, "Message bus stopped");
    }

    async fn close(&self, agent_id: &str, endpoint: Endpoint) {
        let Endpoint {
            sender,
            running,
            mut task,
            ..
        } = endpoint;
        running.store(false, Ordering::Release);
        drop(sender);

        if tokio::time::timeout(self.shared.shutdown_grace, &mut task)
            .await
            .is_err()
        {
            warn!(agent_id = %agent_id, "Message processor did not stop in time, aborting");
            task.abort();
        }
        debug!(agent_id = %agent_id, "Message processor stopped");
    }

    /// Deliver a message.
    ///
    /// With a recipient, the message goes to that inbox only; `false` if the
    /// recipient is unknown. Without one, a copy addressed to each registered
    /// endpoint is enqueued.
    pub async fn send(&self, message: Message) -> bool {
        let state = self.shared.state.read().await;
        match &message.recipient {
            Some(recipient) => {
                let Some(endpoint) = state.endpoints.get(recipient) else {
                    warn!(
                        recipient = %recipient,
                        message_id = %message.id,
                        "Recipient not found"
                    );
                    return false;
                };
                let message_id = message.id;
                let recipient = recipient.clone();
                let delivered = endpoint.enqueue(message);
                if delivered {
                    debug!(message_id = %message_id, recipient = %recipient, "Message queued for delivery");
                } else {
                    warn!(message_id = %message_id, recipient = %recipient, "Recipient inbox closed");
                }
                delivered
            }
            None => {
                for (agent_id, endpoint) in &state.endpoints {
                    let mut copy = message.clone();
                    copy.recipient = Some(agent_id.clone());
                    if !endpoint.enqueue(copy) {
                        warn!(agent_id = %agent_id, message_id = %message.id, "Broadcast copy dropped");
                    }
                }
                debug!(
                    message_id = %message.id,
                    recipient_count = state.endpoints.len(),
                    "Broadcast message queued"
                );
                true
            }
        }
    }

    /// Like [`MessageBus::send`], but an undeliverable message is an error.
    pub async fn try_send(&self, message: Message) -> MeshResult<()> {
        let target = message.recipient.clone();
        if self.send(message).await {
            Ok(())
        } else {
            Err(MeshError::Communication(format!(
                "message could not be delivered to {}",
                target.as_deref().unwrap_or("broadcast")
            )))
        }
    }

    /// Publish `payload` on `topic` to every subscriber except `sender_id`.
    ///
    /// Subscribers receive a [`MessageKind::StatusUpdate`] whose payload is
    /// `{"event_type": topic, "data": payload}`. Returns the number of copies enqueued.
    pub async fn publish(&self, topic: &str, payload: serde_json::Value, sender_id: &str) -> usize {
        let state = self.shared.state.read().await;
        let Some(subscribers) = state.subscriptions.get(topic) else {
            return 0;
        };

        let mut event = Message::new(
            sender_id,
            MessageKind::StatusUpdate,
            serde_json::json!({ "event_type": topic, "data": payload }),
        );
        event
            .metadata
            .insert("is_event".to_string(), serde_json::Value::Bool(true));

        let mut delivered = 0;
        for agent_id in subscribers {
            if agent_id == sender_id {
                continue;
            }
            let Some(endpoint) = state.endpoints.get(agent_id) else {
                continue;
            };
            let mut copy = event.clone();
            copy.recipient = Some(agent_id.clone());
            if endpoint.enqueue(copy) {
                delivered += 1;
            }
        }

        debug!(
            topic = %topic,
            subscriber_count = subscribers.len(),
            delivered,
            "Event published"
        );
        delivered
    }

    /// Subscribe a registered endpoint to `topic`.
    pub async fn subscribe(&self, agent_id: &str, topic: &str) -> MeshResult<()> {
        let mut state = self.shared.state.write().await;
        if !state.endpoints.contains_key(agent_id) {
            return Err(MeshError::AgentNotFound(agent_id.to_string()));
        }
        state
            .subscriptions
            .entry(topic.to_string())
            .or_default()
            .insert(agent_id.to_string());
        debug!(agent_id = %agent_id, topic = %topic, "Agent subscribed to topic");
        Ok(())
    }

    /// Remove a subscription. Topics left without subscribers are dropped.
    pub async fn unsubscribe(&self, agent_id: &str, topic: &str) -> bool {
        let mut state = self.shared.state.write().await;
        let Some(subscribers) = state.subscriptions.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.remove(agent_id);
        if subscribers.is_empty() {
            state.subscriptions.remove(topic);
        }
        if removed {
            debug!(agent_id = %agent_id, topic = %topic, "Agent unsubscribed from topic");
        }
        removed
    }

    /// Subscribers of `topic`, sorted.
    pub async fn subscribers(&self, topic: &str) -> Vec<String> {
        let state = self.shared.state.read().await;
        let mut ids: Vec<String> = state
            .subscriptions
            .get(topic)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Whether `agent_id` has an open endpoint.
    pub async fn is_registered(&self, agent_id: &str) -> bool {
        self.shared.state.read().await.endpoints.contains_key(agent_id)
    }

    /// Number of open endpoints.
    pub async fn endpoint_count(&self) -> usize {
        self.shared.state.read().await.endpoints.len()
    }

    /// Registered endpoints, subscriptions and queue depths.
    pub async fn status(&self) -> BusStatus {
        let state = self.shared.state.read().await;
        let mut registered_agents: Vec<String> = state.endpoints.keys().cloned().collect();
        registered_agents.sort();

        let subscriptions = state
            .subscriptions
            .iter()
            .map(|(topic, subscribers)| {
                let mut ids: Vec<String> = subscribers.iter().cloned().collect();
                ids.sort();
                (topic.clone(), ids)
            })
            .collect();

        let queue_sizes = state
            .endpoints
            .iter()
            .map(|(id, endpoint)| (id.clone(), endpoint.queued.load(Ordering::Acquire)))
            .collect();

        BusStatus {
            registered_agents,
            subscriptions,
            queue_sizes,
        }
    }
}

async fn consume(
    agent_id: String,
    handler: Arc<dyn MessageHandler>,
    mut inbox: mpsc::UnboundedReceiver<Message>,
    queued: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
    bus: Weak<BusShared>,
    poll_interval: Duration,
) {
    debug!(agent_id = %agent_id, "Message processor started");

    while running.load(Ordering::Acquire) {
        let message = match tokio::time::timeout(poll_interval, inbox.recv()).await {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(message)) => message,
        };
        queued.fetch_sub(1, Ordering::AcqRel);

        let message_id = message.id;
        let outcome = AssertUnwindSafe(handler.handle_message(message))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(Some(response))) => {
                let Some(shared) = bus.upgrade() else {
                    break;
                };
                MessageBus { shared }.send(response).await;
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                error!(
                    agent_id = %agent_id,
                    message_id = %message_id,
                    error = %e,
                    "Error processing message"
                );
            }
            Err(_) => {
                error!(
                    agent_id = %agent_id,
                    message_id = %message_id,
                    "Message handler panicked"
                );
            }
        }
    }
}
