//! Routable endpoint of a pool member.
//!
//! # Responsibilities
//! - Represent the traffic address of a single member
//! - Track active connections (for Least Connections LB)
//! - Enforce max connection limits
//!
//! The endpoint is created once per member and shared between the pool and
//! every routing table snapshot, so connection counts survive recomputation.

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::pool::MemberId;

/// The traffic address of one member.
#[derive(Debug)]
pub struct Endpoint {
    /// Owning member.
    pub member_id: MemberId,
    /// The address of the member.
    pub addr: SocketAddr,
    /// Maximum concurrent connections allowed.
    pub max_connections: usize,
    /// Number of currently active connections.
    pub active_connections: AtomicUsize,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(member_id: MemberId, addr: SocketAddr, max_connections: usize) -> Self {
        Self {
            member_id,
            addr,
            max_connections,
            active_connections: AtomicUsize::new(0),
        }
    }

    /// Get the current number of active connections.
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Whether another connection fits under the limit.
    pub fn has_capacity(&self) -> bool {
        self.connection_count() < self.max_connections
    }

    /// Increment active connection count.
    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connection count.
    pub fn dec_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Try to create a connection guard that increments count.
    pub fn try_create_guard(self: &Arc<Self>) -> Option<EndpointGuard> {
        let mut prev = self.active_connections.load(Ordering::Relaxed);
        loop {
            if prev >= self.max_connections {
                return None;
            }
            match self.active_connections.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(EndpointGuard {
            endpoint: self.clone(),
        })
    }
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct EndpointGuard {
    pub endpoint: Arc<Endpoint>,
}

impl Deref for EndpointGuard {
    type Target = Endpoint;
    fn deref(&self) -> &Self::Target {
        &self.endpoint
    }
}

impl Drop for EndpointGuard {
    fn drop(&mut self) {
        self.endpoint.dec_connections();
    }
}
