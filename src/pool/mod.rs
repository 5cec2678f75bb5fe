//! Pool management subsystem.
//!
//! # Data Flow
//! ```text
//! set_desired_capacity(n) / periodic tick
//!     → manager.rs (clamp, reconcile)
//!     → state.rs (select launches / drains under one lock)
//!     → compute substrate (launch / terminate, lock released)
//!     → state.rs (register results)
//!     → routing table + member events published before unlock
//! ```
//!
//! # Design Decisions
//! - The pool is one aggregate with a single writer discipline
//! - Reconcile passes are idempotent and serialized
//! - Draining members leave the routing table immediately but keep their
//!   process until the grace deadline

pub mod manager;
pub mod member;
pub mod state;

pub use manager::{PoolManager, PoolStatus, ReconcileReport};
pub use member::{Member, MemberEvent, MemberId, MemberSnapshot, MemberState, TerminationReason};
pub use state::{FleetHealth, MemberCounts, Pool, PoolError};
