//! Routing table: the live set of endpoints eligible for traffic.
//!
//! Writers (the pool manager, while holding its write lock) publish a fresh
//! snapshot; readers load the current snapshot without blocking.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::load_balancer::endpoint::Endpoint;
use crate::observability::metrics;
use crate::pool::MemberId;

/// Immutable list of routable endpoints.
pub type Snapshot = Arc<Vec<Arc<Endpoint>>>;

#[derive(Debug)]
pub struct RoutingTable {
    current: ArcSwap<Vec<Arc<Endpoint>>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Load the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.current.load_full()
    }

    /// Replace the table contents.
    pub(crate) fn publish(&self, endpoints: Vec<Arc<Endpoint>>) {
        metrics::set_routing_table_size(endpoints.len());
        self.current.store(Arc::new(endpoints));
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.current.load().iter().any(|e| &e.member_id == id)
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}
