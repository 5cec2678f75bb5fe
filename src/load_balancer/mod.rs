//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Pool state + health verdicts
//!     → table.rs (routing table snapshot, recomputed on every change)
//!
//! Inbound request
//!     → router.rs (load current snapshot)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through endpoints)
//!         - least_conn.rs (pick endpoint with fewest connections)
//!     → endpoint.rs (acquire connection guard)
//!     → Return endpoint guard or RouteError
//! ```
//!
//! # Design Decisions
//! - Load balancer is stateless; endpoints track connections
//! - Only healthy in-service members ever enter the table, so balancers
//!   never see an unhealthy member and there is no unhealthy fallback
//! - Routing reads an atomic snapshot and never waits for writers

pub mod endpoint;
pub mod least_conn;
pub mod round_robin;
pub mod router;
pub mod table;

use std::sync::Arc;

pub use endpoint::{Endpoint, EndpointGuard};
pub use router::{RouteError, TrafficRouter};
pub use table::RoutingTable;

/// Strategy for choosing one endpoint out of a snapshot.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_server(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>>;
}
