//! Connection health tracking
//!
//! A single failed check only degrades the connection. It is declared stale
//! after `failure_threshold` consecutive failures.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Last check passed
    Healthy,
    /// Failed checks below the threshold
    Degraded,
    /// Failed checks reached the threshold
    Stale,
    /// No check has run yet
    #[default]
    Unknown,
}

/// Connection health information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthInfo {
    /// Current health status
    pub status: HealthStatus,
    /// Last health check time
    pub last_check: Option<SystemTime>,
    /// Consecutive successful checks
    pub consecutive_successes: u32,
    /// Consecutive failed checks
    pub consecutive_failures: u32,
}

impl Default for HealthInfo {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_check: None,
            consecutive_successes: 0,
            consecutive_failures: 0,
        }
    }
}

/// Decides whether one probe passed.
///
/// Any inbound frame since the probe was sent passes it. Without one, work
/// still in flight means the server is probably busy on a long tool call,
/// which also passes.
pub fn probe_passed(inbound_since_probe: bool, requests_in_flight: usize) -> bool {
    inbound_since_probe || requests_in_flight > 0
}

/// Consecutive-failure health tracker
#[derive(Debug)]
pub struct HealthMonitor {
    failure_threshold: u32,
    info: HealthInfo,
}

impl HealthMonitor {
    /// Create a monitor that declares staleness after `failure_threshold` failures
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            info: HealthInfo::default(),
        }
    }

    /// Records a check outcome and returns the resulting status.
    pub fn record(&mut self, passed: bool) -> HealthStatus {
        self.info.last_check = Some(SystemTime::now());
        if passed {
            self.info.consecutive_successes = self.info.consecutive_successes.saturating_add(1);
            self.info.consecutive_failures = 0;
            self.info.status = HealthStatus::Healthy;
        } else {
            self.info.consecutive_failures = self.info.consecutive_failures.saturating_add(1);
            self.info.consecutive_successes = 0;
            self.info.status = if self.info.consecutive_failures >= self.failure_threshold {
                HealthStatus::Stale
            } else {
                HealthStatus::Degraded
            };
        }
        self.info.status
    }

    /// Get current health information
    pub fn info(&self) -> HealthInfo {
        self.info.clone()
    }

    /// Forget history, e.g. after a new connection opens
    pub fn reset(&mut self) {
        self.info = HealthInfo::default();
    }
}
