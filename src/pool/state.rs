//! The pool aggregate.
//!
//! Plain synchronous state owned by [`PoolManager`](super::PoolManager)
//! behind a single lock. Every mutation that changes a member's lifecycle
//! appends a [`MemberEvent`] to the caller's buffer; the manager publishes
//! the buffer together with a recomputed routing table before releasing
//! the lock.
//!
//! Invariant: `min <= desired <= max` after every call.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::compute::MemberHandle;
use crate::load_balancer::Endpoint;
use crate::pool::member::{Member, MemberEvent, MemberId, MemberSnapshot, MemberState, TerminationReason};
use crate::resilience::backoff::calculate_backoff;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("member {0} not found")]
    NotFound(MemberId),

    #[error("member {id} is {state}, not draining")]
    NotDraining { id: MemberId, state: MemberState },

    #[error("grace period of member {0} has expired")]
    GracePeriodExpired(MemberId),

    #[error("pool is already at maximum capacity {0}")]
    AtMaximum(u32),
}

/// Persistent fleet-level health, raised when launches keep failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FleetHealth {
    Ok,
    LaunchFailing {
        consecutive_failures: u32,
        last_error: String,
    },
}

/// Member counts by lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemberCounts {
    pub pending: usize,
    pub launching: usize,
    pub in_service: usize,
    pub draining: usize,
}

#[derive(Debug)]
pub struct Pool {
    name: String,
    members: Vec<Member>,
    /// Launches in flight, counted as active capacity.
    pending: Vec<MemberId>,
    /// Members whose current verdict is Healthy.
    healthy: HashSet<MemberId>,
    desired: u32,
    min: u32,
    max: u32,
    scale_in_cursor: usize,
    launch_failures: u32,
    retry_after: Option<Instant>,
    fleet_health: FleetHealth,
}

impl Pool {
    pub fn new(name: impl Into<String>, min: u32, desired: u32, max: u32) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            pending: Vec::new(),
            healthy: HashSet::new(),
            desired: desired.clamp(min, max),
            min,
            max,
            scale_in_cursor: 0,
            launch_failures: 0,
            retry_after: None,
            fleet_health: FleetHealth::Ok,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desired(&self) -> u32 {
        self.desired
    }

    pub fn bounds(&self) -> (u32, u32) {
        (self.min, self.max)
    }

    pub fn clamp(&self, n: u32) -> u32 {
        n.clamp(self.min, self.max)
    }

    /// Clamp and store a new desired capacity, returning the stored value.
    pub fn set_desired(&mut self, n: u32) -> u32 {
        self.desired = self.clamp(n);
        self.desired
    }

    /// Pending launches plus Launching and InService members.
    pub fn active_count(&self) -> usize {
        self.pending.len() + self.members.iter().filter(|m| m.state.is_active()).count()
    }

    pub fn counts(&self) -> MemberCounts {
        let mut counts = MemberCounts {
            pending: self.pending.len(),
            ..MemberCounts::default()
        };
        for member in &self.members {
            match member.state {
                MemberState::Launching => counts.launching += 1,
                MemberState::InService => counts.in_service += 1,
                MemberState::Draining => counts.draining += 1,
                MemberState::Terminated => {}
            }
        }
        counts
    }

    pub fn member(&self, id: &MemberId) -> Option<&Member> {
        self.members.iter().find(|m| &m.id == id)
    }

    fn member_mut(&mut self, id: &MemberId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| &m.id == id)
    }

    pub fn is_healthy(&self, id: &MemberId) -> bool {
        self.healthy.contains(id)
    }

    pub fn fleet_health(&self) -> &FleetHealth {
        &self.fleet_health
    }

    /// Endpoints eligible for traffic: InService with a Healthy verdict.
    pub fn routable(&self) -> Vec<Arc<Endpoint>> {
        self.members
            .iter()
            .filter(|m| m.state == MemberState::InService && self.healthy.contains(&m.id))
            .map(|m| m.endpoint.clone())
            .collect()
    }

    pub fn snapshots(&self, now: Instant) -> Vec<MemberSnapshot> {
        self.members
            .iter()
            .map(|m| m.snapshot(now, self.healthy.contains(&m.id)))
            .collect()
    }

    fn transition(&mut self, id: &MemberId, to: MemberState, events: &mut Vec<MemberEvent>) -> bool {
        let Some(member) = self.member_mut(id) else {
            return false;
        };
        let from = member.state;
        if from == to {
            return false;
        }
        member.state = to;
        if to == MemberState::Draining {
            member.drained_from = Some(from);
        } else {
            member.drain_deadline = None;
            member.drained_from = None;
        }
        tracing::info!(member = %id, from = %from, to = %to, "Member state changed");
        events.push(MemberEvent::StateChanged { id: id.clone(), from, to });
        true
    }

    /// Reserve ids for `count` new launches.
    pub fn reserve_launches(&mut self, count: usize) -> Vec<MemberId> {
        let ids: Vec<MemberId> = (0..count).map(|_| MemberId::generate()).collect();
        self.pending.extend(ids.iter().cloned());
        ids
    }

    /// Add a launched member in state Launching.
    pub fn register(&mut self, member: Member, assume_healthy: bool, events: &mut Vec<MemberEvent>) {
        self.pending.retain(|p| p != &member.id);
        if assume_healthy {
            self.healthy.insert(member.id.clone());
        }
        events.push(MemberEvent::Registered {
            id: member.id.clone(),
            addr: member.addr(),
        });
        self.members.push(member);
    }

    /// Drop a reserved launch that never produced a member.
    pub fn abandon_launch(&mut self, id: &MemberId, events: &mut Vec<MemberEvent>) {
        self.pending.retain(|p| p != id);
        events.push(MemberEvent::Terminated {
            id: id.clone(),
            reason: TerminationReason::LaunchFailed,
        });
    }

    /// Record a member's verdict. Returns true if it changed.
    pub fn set_healthy(&mut self, id: &MemberId, healthy: bool) -> bool {
        if self.member(id).is_none() {
            return false;
        }
        if healthy {
            self.healthy.insert(id.clone())
        } else {
            self.healthy.remove(id)
        }
    }

    /// Move Launching members that are ready and Healthy to InService.
    pub fn promote_ready(&mut self, now: Instant, readiness_delay: Duration, events: &mut Vec<MemberEvent>) -> usize {
        let ready: Vec<MemberId> = self
            .members
            .iter()
            .filter(|m| {
                m.state == MemberState::Launching
                    && now.saturating_duration_since(m.launched_at) >= readiness_delay
                    && self.healthy.contains(&m.id)
            })
            .map(|m| m.id.clone())
            .collect();

        for id in &ready {
            self.transition(id, MemberState::InService, events);
        }
        ready.len()
    }

    /// Choose `count` members to retire.
    ///
    /// Oldest Launching members go first; the rest rotate through InService
    /// members ordered by age, starting where the previous scale-in stopped.
    pub fn select_for_removal(&mut self, count: usize) -> Vec<MemberId> {
        let mut launching: Vec<(Instant, MemberId)> = self
            .members
            .iter()
            .filter(|m| m.state == MemberState::Launching)
            .map(|m| (m.launched_at, m.id.clone()))
            .collect();
        launching.sort();

        let mut chosen: Vec<MemberId> = launching.into_iter().take(count).map(|(_, id)| id).collect();
        let remaining = count - chosen.len();
        if remaining == 0 {
            return chosen;
        }

        let mut in_service: Vec<(Instant, MemberId)> = self
            .members
            .iter()
            .filter(|m| m.state == MemberState::InService)
            .map(|m| (m.launched_at, m.id.clone()))
            .collect();
        in_service.sort();

        let len = in_service.len();
        if len > 0 {
            let take = remaining.min(len);
            let start = self.scale_in_cursor % len;
            for i in 0..take {
                chosen.push(in_service[(start + i) % len].1.clone());
            }
            self.scale_in_cursor = self.scale_in_cursor.wrapping_add(take);
        }
        chosen
    }

    pub fn begin_drain(&mut self, id: &MemberId, deadline: Instant, events: &mut Vec<MemberEvent>) {
        if self.transition(id, MemberState::Draining, events) {
            if let Some(member) = self.member_mut(id) {
                member.drain_deadline = Some(deadline);
            }
        }
    }

    /// Check that a member is Draining with its grace period still running.
    pub fn check_cancellable(&self, id: &MemberId, now: Instant) -> Result<(), PoolError> {
        let (state, deadline) = self
            .member(id)
            .map(|m| (m.state, m.drain_deadline))
            .ok_or_else(|| PoolError::NotFound(id.clone()))?;
        if state != MemberState::Draining {
            return Err(PoolError::NotDraining { id: id.clone(), state });
        }
        match deadline {
            Some(deadline) if now < deadline => Ok(()),
            _ => Err(PoolError::GracePeriodExpired(id.clone())),
        }
    }

    /// Return a Draining member to the state it was drained from if its
    /// grace period is still running.
    ///
    /// A member drained while Launching goes back to Launching and must
    /// still pass readiness and health before it takes traffic.
    pub fn cancel_drain(&mut self, id: &MemberId, now: Instant, events: &mut Vec<MemberEvent>) -> Result<(), PoolError> {
        self.check_cancellable(id, now)?;
        let restore = self
            .member(id)
            .and_then(|m| m.drained_from)
            .unwrap_or(MemberState::InService);
        self.transition(id, restore, events);
        Ok(())
    }

    /// Cancel up to `count` drains, most recently started first.
    pub fn reclaim_draining(&mut self, count: usize, now: Instant, events: &mut Vec<MemberEvent>) -> usize {
        let mut candidates: Vec<(Instant, MemberId)> = self
            .members
            .iter()
            .filter_map(|m| match (m.state, m.drain_deadline) {
                (MemberState::Draining, Some(deadline)) if now < deadline => Some((deadline, m.id.clone())),
                _ => None,
            })
            .collect();
        candidates.sort_by(|a, b| b.cmp(a));

        let mut reclaimed = 0;
        for (_, id) in candidates.into_iter().take(count) {
            if self.cancel_drain(&id, now, events).is_ok() {
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Draining members whose grace deadline has passed.
    pub fn expired_drains(&self, now: Instant) -> Vec<(MemberId, MemberHandle)> {
        self.members
            .iter()
            .filter(|m| m.state == MemberState::Draining && m.drain_deadline.is_some_and(|d| now >= d))
            .map(|m| (m.id.clone(), m.handle.clone()))
            .collect()
    }

    /// Mark a member Terminated and drop it from the pool.
    pub fn remove(&mut self, id: &MemberId, reason: TerminationReason, events: &mut Vec<MemberEvent>) -> Option<Member> {
        self.transition(id, MemberState::Terminated, events);
        let idx = self.members.iter().position(|m| &m.id == id)?;
        let member = self.members.remove(idx);
        self.healthy.remove(id);
        events.push(MemberEvent::Terminated {
            id: id.clone(),
            reason,
        });
        Some(member)
    }

    pub fn record_launch_success(&mut self) {
        self.launch_failures = 0;
        self.retry_after = None;
        if self.fleet_health != FleetHealth::Ok {
            tracing::info!(pool = %self.name, "Launches recovered, clearing fleet alarm");
            self.fleet_health = FleetHealth::Ok;
        }
    }

    /// Count a failed launch and schedule the retry.
    /// Returns true when the failure raised the fleet alarm.
    pub fn record_launch_failure(
        &mut self,
        now: Instant,
        retry_limit: u32,
        backoff_base_ms: u64,
        backoff_max_ms: u64,
        error: String,
    ) -> bool {
        self.launch_failures += 1;
        self.retry_after = Some(now + calculate_backoff(self.launch_failures, backoff_base_ms, backoff_max_ms));

        if let FleetHealth::LaunchFailing {
            consecutive_failures,
            last_error,
        } = &mut self.fleet_health
        {
            *consecutive_failures = self.launch_failures;
            *last_error = error;
            return false;
        }

        if self.launch_failures >= retry_limit {
            self.fleet_health = FleetHealth::LaunchFailing {
                consecutive_failures: self.launch_failures,
                last_error: error,
            };
            return true;
        }
        false
    }

    /// Launches are allowed when no fleet alarm is raised and the backoff has passed.
    pub fn launches_allowed(&self, now: Instant) -> bool {
        self.fleet_health == FleetHealth::Ok && self.retry_after.map_or(true, |t| now >= t)
    }

    /// Reset the launch failure budget.
    pub fn clear_fleet_alarm(&mut self) {
        self.launch_failures = 0;
        self.retry_after = None;
        self.fleet_health = FleetHealth::Ok;
    }
}
