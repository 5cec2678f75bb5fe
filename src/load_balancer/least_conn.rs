//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{endpoint::Endpoint, LoadBalancer};

/// Least connections selector.
/// Selects the endpoint with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        // In case of tie, the first one is selected (stability)
        endpoints
            .iter()
            .filter(|e| e.has_capacity())
            .min_by_key(|e| e.connection_count())
            .cloned()
    }
}
