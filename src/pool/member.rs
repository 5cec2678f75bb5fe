//! Pool members and their lifecycle.
//!
//! # State Transitions
//! ```text
//! Launching → InService     readiness delay elapsed and verdict Healthy
//! Launching → Draining      selected for scale-in
//! Launching → Terminated    launch failure / startup window exceeded
//! InService → Draining      selected for scale-in
//! Draining  → Launching     drain cancelled before the grace deadline,
//!                           member was Launching when drained
//! Draining  → InService     drain cancelled before the grace deadline,
//!                           member was InService when drained
//! Draining  → Terminated    grace deadline reached
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::compute::MemberHandle;
use crate::load_balancer::Endpoint;

/// Unique identifier of a pool member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    /// Generate a fresh random member id.
    pub fn generate() -> Self {
        Self(format!("m-{:012x}", fastrand::u64(..) >> 16))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MemberId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberState {
    Launching,
    InService,
    Draining,
    Terminated,
}

impl MemberState {
    /// Launching and InService members count toward desired capacity.
    pub fn is_active(&self) -> bool {
        matches!(self, MemberState::Launching | MemberState::InService)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberState::Launching => "launching",
            MemberState::InService => "in_service",
            MemberState::Draining => "draining",
            MemberState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker owned by the pool.
#[derive(Debug)]
pub struct Member {
    pub id: MemberId,
    pub endpoint: Arc<Endpoint>,
    pub handle: MemberHandle,
    pub state: MemberState,
    pub launched_at: Instant,
    /// Set while Draining.
    pub drain_deadline: Option<Instant>,
    /// State the member left when its drain began.
    pub drained_from: Option<MemberState>,
}

impl Member {
    pub fn new(id: MemberId, endpoint: Arc<Endpoint>, handle: MemberHandle, launched_at: Instant) -> Self {
        Self {
            id,
            endpoint,
            handle,
            state: MemberState::Launching,
            launched_at,
            drain_deadline: None,
            drained_from: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.endpoint.addr
    }

    pub fn snapshot(&self, now: Instant, healthy: bool) -> MemberSnapshot {
        MemberSnapshot {
            id: self.id.clone(),
            addr: self.addr(),
            state: self.state,
            healthy,
            active_connections: self.endpoint.connection_count(),
            age_secs: now.saturating_duration_since(self.launched_at).as_secs(),
            drain_remaining_secs: self
                .drain_deadline
                .map(|d| d.saturating_duration_since(now).as_secs()),
            launched_at: self.launched_at,
        }
    }
}

/// Consistent read-only copy of a member, taken under the pool lock.
#[derive(Debug, Clone, Serialize)]
pub struct MemberSnapshot {
    pub id: MemberId,
    pub addr: SocketAddr,
    pub state: MemberState,
    pub healthy: bool,
    pub active_connections: usize,
    pub age_secs: u64,
    pub drain_remaining_secs: Option<u64>,
    #[serde(skip)]
    pub launched_at: Instant,
}

/// Why a member left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    ScaledIn,
    LaunchFailed,
    StartupTimeout,
}

/// Published on every membership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberEvent {
    Registered {
        id: MemberId,
        addr: SocketAddr,
    },
    StateChanged {
        id: MemberId,
        from: MemberState,
        to: MemberState,
    },
    Terminated {
        id: MemberId,
        reason: TerminationReason,
    },
}

impl MemberEvent {
    pub fn member_id(&self) -> &MemberId {
        match self {
            MemberEvent::Registered { id, .. }
            | MemberEvent::StateChanged { id, .. }
            | MemberEvent::Terminated { id, .. } => id,
        }
    }
}
