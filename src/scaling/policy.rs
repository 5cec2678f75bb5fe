//! Simple scaling policies with a per-policy cooldown.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::PolicyConfig;

#[derive(Debug, Clone)]
pub struct ScalingPolicy {
    name: String,
    adjustment: i32,
    cooldown: Duration,
    last_applied: Option<Instant>,
}

impl ScalingPolicy {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            name: config.name.clone(),
            adjustment: config.adjustment,
            cooldown: Duration::from_secs(config.cooldown_secs),
            last_applied: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn adjustment(&self) -> i32 {
        self.adjustment
    }

    /// Time left before this policy may apply again, if any.
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last_applied?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < self.cooldown {
            Some(self.cooldown - elapsed)
        } else {
            None
        }
    }

    /// Desired capacity after applying the adjustment, clamped to bounds.
    pub fn target(&self, current: u32, min: u32, max: u32) -> u32 {
        let raw = i64::from(current) + i64::from(self.adjustment);
        raw.clamp(i64::from(min), i64::from(max)) as u32
    }

    pub fn stamp(&mut self, now: Instant) {
        self.last_applied = Some(now);
    }

    pub fn status(&self, now: Instant) -> PolicyStatus {
        PolicyStatus {
            name: self.name.clone(),
            adjustment: self.adjustment,
            cooldown_secs: self.cooldown.as_secs(),
            cooldown_remaining_secs: self.cooldown_remaining(now).map(|d| d.as_secs()),
            applied: self.last_applied.is_some(),
        }
    }
}

/// Reporting view of a policy.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyStatus {
    pub name: String,
    pub adjustment: i32,
    pub cooldown_secs: u64,
    pub cooldown_remaining_secs: Option<u64>,
    pub applied: bool,
}
