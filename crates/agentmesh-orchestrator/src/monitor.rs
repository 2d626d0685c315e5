use crate::registry::AgentRegistry;
use agentmesh_core::{MeshError, MeshResult};
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// Outcome of one health monitor pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub healthy: usize,
    pub unhealthy: usize,
}

/// Periodically health-checks every registered agent.
///
/// A healthy report reactivates the agent and refreshes its heartbeat; an
/// unhealthy report, an error, or a check that overruns `check_timeout`
/// demotes it to `error`, as does a check that panics. Agents are checked
/// concurrently and one agent's failure never affects another's check.
pub struct HealthMonitor {
    registry: Arc<AgentRegistry>,
    interval: Duration,
    check_timeout: Duration,
}

impl HealthMonitor {
    /// Fails with [`MeshError::Config`] when `interval` is zero.
    pub fn new(
        registry: Arc<AgentRegistry>,
        interval: Duration,
        check_timeout: Duration,
    ) -> MeshResult<Self> {
        if interval.is_zero() {
            return Err(MeshError::Config(
                "health check interval must be greater than zero".into(),
            ));
        }
        Ok(Self {
            registry,
            interval,
            check_timeout,
        })
    }

    /// Check every agent once.
    pub async fn run_cycle(&self) -> HealthSummary {
        let targets = self.registry.health_targets().await;
        let checks = targets.into_iter().map(move |(agent_id, agent)| async move {
            let check = AssertUnwindSafe(agent.health_check()).catch_unwind();
            let healthy = match tokio::time::timeout(self.check_timeout, check).await {
                Ok(Ok(Ok(report))) if report.is_healthy() => true,
                Ok(Ok(Ok(report))) => {
                    warn!(agent_id = %agent_id, details = %report.details, "Agent reported unhealthy");
                    false
                }
                Ok(Ok(Err(e))) => {
                    warn!(agent_id = %agent_id, error = %e, "Health check failed");
                    false
                }
                Ok(Err(_)) => {
                    error!(agent_id = %agent_id, "Health check panicked");
                    false
                }
                Err(_) => {
                    warn!(
                        agent_id = %agent_id,
                        timeout_ms = self.check_timeout.as_millis() as u64,
                        "Health check timed out"
                    );
                    false
                }
            };
            (agent_id, healthy)
        });

        let mut summary = HealthSummary::default();
        for (agent_id, healthy) in join_all(checks).await {
            // the agent may have been unregistered while its check ran
            if !self.registry.record_health(&agent_id, healthy).await {
                continue;
            }
            if healthy {
                summary.healthy += 1;
            } else {
                summary.unhealthy += 1;
            }
        }

        debug!(
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            "Health check cycle finished"
        );
        summary
    }

    /// Start the monitor loop.
    ///
    /// The first pass runs immediately. Returns the
    /// [`tokio::task::JoinHandle`]; abort it to stop the loop.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_cycle().await;
            }
        })
    }
}
