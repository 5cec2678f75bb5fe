//! Member health state machine.
//!
//! # States
//! - Healthy: member may receive traffic
//! - Unhealthy: member excluded from the routing table (initial state)
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - Thresholds are independent; recovery is usually the stricter one
//! - Counters reset on state transition

use serde::Serialize;

/// Current verdict of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Healthy,
    Unhealthy,
}

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub healthy: u32,
    pub unhealthy: u32,
}

/// Consecutive probe results for one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthRecord {
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub verdict: Verdict,
}

impl HealthRecord {
    pub fn new() -> Self {
        Self {
            consecutive_successes: 0,
            consecutive_failures: 0,
            verdict: Verdict::Unhealthy,
        }
    }

    /// Apply a probe outcome. Returns the new verdict if it changed.
    pub fn observe(&mut self, outcome: ProbeOutcome, thresholds: Thresholds) -> Option<Verdict> {
        match outcome {
            ProbeOutcome::Success => {
                self.consecutive_failures = 0;
                self.consecutive_successes += 1;
                if self.verdict == Verdict::Unhealthy && self.consecutive_successes >= thresholds.healthy {
                    self.verdict = Verdict::Healthy;
                    self.consecutive_successes = 0;
                    return Some(Verdict::Healthy);
                }
            }
            ProbeOutcome::Failure => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;
                if self.verdict == Verdict::Healthy && self.consecutive_failures >= thresholds.unhealthy {
                    self.verdict = Verdict::Unhealthy;
                    self.consecutive_failures = 0;
                    return Some(Verdict::Unhealthy);
                }
            }
        }
        None
    }
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self::new()
    }
}
