//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{endpoint::Endpoint, LoadBalancer};

/// Round-robin selector.
/// Stores an internal counter to rotate through endpoints.
///
/// Over any `len` consecutive calls against the same snapshot, every
/// endpoint with free capacity is the first choice exactly once.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        if endpoints.is_empty() {
            return None;
        }

        let start_count = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = endpoints.len();

        // Skip saturated endpoints, at most one full lap.
        for i in 0..len {
            let index = (start_count + i) % len;
            let endpoint = &endpoints[index];
            if endpoint.has_capacity() {
                return Some(endpoint.clone());
            }
        }
        None
    }
}
