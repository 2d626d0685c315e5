use crate::types::AgentStatus;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A category member offered to a [`SelectionStrategy`].
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub agent_id: &'a str,
    pub status: AgentStatus,
}

/// Picks which member of a category serves a query.
///
/// Candidates are always offered in the same (id-sorted) order, so stateful
/// strategies can keep a cursor per category.
pub trait SelectionStrategy: Send + Sync {
    /// Index into `candidates`, or `None` if no member is eligible.
    fn select(&self, category: &str, candidates: &[Candidate<'_>]) -> Option<usize>;

    /// Strategy name for logging.
    fn name(&self) -> &'static str;
}

/// Rotates through a category's members.
///
/// By default members whose status is not [`AgentStatus::Active`] are skipped.
pub struct RoundRobin {
    cursors: Mutex<HashMap<String, usize>>,
    skip_unhealthy: bool,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            cursors: Mutex::new(HashMap::new()),
            skip_unhealthy: true,
        }
    }

    /// Route to members regardless of status.
    pub fn including_unhealthy() -> Self {
        Self {
            cursors: Mutex::new(HashMap::new()),
            skip_unhealthy: false,
        }
    }

    fn eligible(&self, candidate: &Candidate<'_>) -> bool {
        !self.skip_unhealthy || candidate.status == AgentStatus::Active
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStrategy for RoundRobin {
    fn select(&self, category: &str, candidates: &[Candidate<'_>]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(category.to_string()).or_insert(0);
        let len = candidates.len();
        let start = *cursor % len;

        for offset in 0..len {
            let index = (start + offset) % len;
            if self.eligible(&candidates[index]) {
                *cursor = index + 1;
                return Some(index);
            }
        }
        None
    }

    fn name(&self) -> &'static str {
        if self.skip_unhealthy {
            "round_robin"
        } else {
            "round_robin_including_unhealthy"
        }
    }
}
