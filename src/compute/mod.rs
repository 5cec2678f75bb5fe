//! Compute substrate abstraction.
//!
//! # Data Flow
//! ```text
//! PoolManager reconcile
//!     → ComputeSubstrate::launch(LaunchSpec)   → MemberHandle (id, address)
//!     → ComputeSubstrate::terminate(handle)
//! ```
//!
//! # Design Decisions
//! - The substrate is an external collaborator; the pool only sees handles
//! - Every call is bounded by a timeout applied by the caller
//! - Two local implementations: a static address inventory and a
//!   process-per-member launcher

pub mod process;
pub mod static_pool;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::{ComputeConfig, SubstrateKind};

pub use process::ProcessSubstrate;
pub use static_pool::StaticSubstrate;

/// Errors returned by a compute substrate.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("no capacity left in substrate")]
    Exhausted,

    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("launch timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("unknown member handle '{0}'")]
    UnknownHandle(String),
}

/// Everything the substrate needs to start one member.
///
/// Passed through verbatim from configuration.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchSpec {
    pub pool: String,
    pub region: String,
    pub image: String,
    pub instance_type: String,
    pub subnet_cidrs: Vec<String>,
}

impl LaunchSpec {
    pub fn from_config(pool: &str, config: &ComputeConfig) -> Self {
        Self {
            pool: pool.to_string(),
            region: config.region.clone(),
            image: config.image.clone(),
            instance_type: config.instance_type.clone(),
            subnet_cidrs: config.network.subnet_cidrs.clone(),
        }
    }
}

/// Opaque reference to a launched worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberHandle {
    /// Substrate-specific identifier.
    pub id: String,
    /// Address the worker serves traffic on.
    pub addr: SocketAddr,
}

/// Launches and terminates workers.
#[async_trait]
pub trait ComputeSubstrate: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<MemberHandle, ComputeError>;

    async fn terminate(&self, handle: &MemberHandle) -> Result<(), ComputeError>;
}

/// Build the substrate selected in configuration.
pub fn build_substrate(config: &ComputeConfig) -> Arc<dyn ComputeSubstrate> {
    match config.kind {
        SubstrateKind::Static => {
            let addrs = config
                .static_workers
                .iter()
                .filter_map(|w| match w.parse() {
                    Ok(addr) => Some(addr),
                    Err(_) => {
                        tracing::warn!(worker = %w, "Invalid static worker address");
                        None
                    }
                })
                .collect();
            Arc::new(StaticSubstrate::new(addrs))
        }
        SubstrateKind::Process => Arc::new(ProcessSubstrate::new(config.process.clone())),
    }
}
