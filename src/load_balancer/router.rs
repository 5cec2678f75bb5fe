//! Traffic router.
//!
//! # Responsibilities
//! - Pick an endpoint from the current routing table snapshot
//! - Apply the configured load balancing algorithm
//! - Provide connection guards for tracking

use std::sync::Arc;

use thiserror::Error;

use crate::config::{Balancing, RoutingConfig};
use crate::load_balancer::{
    endpoint::EndpointGuard, least_conn::LeastConnections, round_robin::RoundRobin,
    table::RoutingTable, LoadBalancer,
};

/// Why a request could not be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The routing table is empty: no healthy member is in service.
    #[error("no healthy members available")]
    Unavailable,
    /// Every healthy member is at its connection limit.
    #[error("all healthy members are saturated")]
    Saturated,
}

/// Selects a member for each inbound request.
#[derive(Debug)]
pub struct TrafficRouter {
    table: Arc<RoutingTable>,
    balancer: Box<dyn LoadBalancer>,
}

impl TrafficRouter {
    pub fn new(table: Arc<RoutingTable>, config: &RoutingConfig) -> Self {
        let balancer: Box<dyn LoadBalancer> = match config.algorithm {
            Balancing::RoundRobin => Box::new(RoundRobin::new()),
            Balancing::LeastConnections => Box::new(LeastConnections::new()),
        };
        Self { table, balancer }
    }

    /// Select an endpoint.
    /// Returns a guard that decrements the connection count on drop.
    pub fn route(&self) -> Result<EndpointGuard, RouteError> {
        let snapshot = self.table.snapshot();
        if snapshot.is_empty() {
            return Err(RouteError::Unavailable);
        }

        match self.balancer.next_server(&snapshot) {
            Some(endpoint) => endpoint.try_create_guard().ok_or(RouteError::Saturated),
            None => {
                tracing::debug!(endpoint_count = snapshot.len(), "All endpoints saturated");
                Err(RouteError::Saturated)
            }
        }
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }
}
