use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request statistics an agent keeps about itself and reports in its health check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStats {
    /// Requests seen.
    pub total_requests: u64,
    /// Requests that produced a successful response.
    pub successful_requests: u64,
    /// Requests that failed.
    pub failed_requests: u64,
    /// Running mean of processing time.
    pub average_response_ms: f64,
    /// When the last request finished.
    pub last_request_at: Option<DateTime<Utc>>,
}

impl AgentStats {
    /// Records one finished request.
    pub fn record(&mut self, success: bool, elapsed: Duration) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        self.last_request_at = Some(Utc::now());

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let n = self.total_requests as f64;
        self.average_response_ms = (self.average_response_ms * (n - 1.0) + elapsed_ms) / n;
    }

    /// Fraction of requests that succeeded, `1.0` when none were seen.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_running_average() {
        let mut stats = AgentStats::default();
        stats.record(true, Duration::from_millis(100));
        stats.record(false, Duration::from_millis(300));

        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.successful_requests, 1);
        assert_eq!(stats.failed_requests, 1);
        assert!((stats.average_response_ms - 200.0).abs() < 1e-6);
        assert!(stats.last_request_at.is_some());
        assert!((stats.success_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_success_rate() {
        assert_eq!(AgentStats::default().success_rate(), 1.0);
    }
}
