//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each Launching / InService member (concurrently, bounded)
//!     → Update state.rs record
//!     → On verdict change: PoolManager::set_verdict
//!         → routing table recomputed immediately
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures
//! - Health state is per-member; records live exactly as long as the member
//! - Probe failures never reach the pool until the threshold is crossed

pub mod active;
pub mod state;

pub use active::HealthChecker;
pub use state::{HealthRecord, ProbeOutcome, Thresholds, Verdict};
