//! Static inventory substrate.
//!
//! Hands out addresses of workers that are already running. A "launch"
//! leases the next free address; a "terminate" returns it to the inventory.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::compute::{ComputeError, ComputeSubstrate, LaunchSpec, MemberHandle};

#[derive(Debug, Default)]
struct Inventory {
    free: VecDeque<SocketAddr>,
    leased: HashMap<String, SocketAddr>,
}

/// Substrate backed by a fixed list of worker addresses.
#[derive(Debug)]
pub struct StaticSubstrate {
    inventory: Mutex<Inventory>,
}

impl StaticSubstrate {
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        Self {
            inventory: Mutex::new(Inventory {
                free: addrs.into(),
                leased: HashMap::new(),
            }),
        }
    }

    /// Number of addresses not currently leased.
    pub fn free_count(&self) -> usize {
        self.inventory.lock().free.len()
    }
}

#[async_trait]
impl ComputeSubstrate for StaticSubstrate {
    async fn launch(&self, spec: &LaunchSpec) -> Result<MemberHandle, ComputeError> {
        let mut inventory = self.inventory.lock();
        let addr = inventory.free.pop_front().ok_or(ComputeError::Exhausted)?;
        let handle = MemberHandle {
            id: format!("static-{}", addr),
            addr,
        };
        inventory.leased.insert(handle.id.clone(), addr);
        tracing::debug!(pool = %spec.pool, addr = %addr, "Leased static worker");
        Ok(handle)
    }

    async fn terminate(&self, handle: &MemberHandle) -> Result<(), ComputeError> {
        let mut inventory = self.inventory.lock();
        let addr = inventory
            .leased
            .remove(&handle.id)
            .ok_or_else(|| ComputeError::UnknownHandle(handle.id.clone()))?;
        inventory.free.push_back(addr);
        Ok(())
    }
}
