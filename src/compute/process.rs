//! Process-per-member substrate.
//!
//! Spawns the configured program once per member on a port taken from the
//! configured range. Terminating a member kills its process and frees the port.

use std::collections::{BTreeSet, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};

use crate::compute::{ComputeError, ComputeSubstrate, LaunchSpec, MemberHandle};
use crate::config::ProcessConfig;

/// A port taken from the range. Returned to the range on drop.
struct PortLease {
    port: u16,
    free: Arc<Mutex<BTreeSet<u16>>>,
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.free.lock().insert(self.port);
    }
}

struct Running {
    child: Child,
    _lease: PortLease,
}

/// Launches each member as a child process.
pub struct ProcessSubstrate {
    config: ProcessConfig,
    free_ports: Arc<Mutex<BTreeSet<u16>>>,
    children: Mutex<HashMap<String, Running>>,
}

impl ProcessSubstrate {
    pub fn new(config: ProcessConfig) -> Self {
        let free_ports = (config.port_range_start..=config.port_range_end).collect();
        Self {
            config,
            free_ports: Arc::new(Mutex::new(free_ports)),
            children: Mutex::new(HashMap::new()),
        }
    }

    fn args_for(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.config
            .args
            .iter()
            .map(|a| a.replace("{port}", &port))
            .collect()
    }

    fn lease_port(&self) -> Option<PortLease> {
        let port = self.free_ports.lock().pop_first()?;
        Some(PortLease {
            port,
            free: self.free_ports.clone(),
        })
    }
}

#[async_trait]
impl ComputeSubstrate for ProcessSubstrate {
    async fn launch(&self, spec: &LaunchSpec) -> Result<MemberHandle, ComputeError> {
        let host: IpAddr = self
            .config
            .host
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let lease = self.lease_port().ok_or(ComputeError::Exhausted)?;
        let port = lease.port;

        let child = Command::new(&self.config.program)
            .args(self.args_for(port))
            .env("POOL_NAME", &spec.pool)
            .env("INSTANCE_TYPE", &spec.instance_type)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let id = match child.id() {
            Some(pid) => format!("pid-{}", pid),
            None => format!("port-{}", port),
        };
        let addr = SocketAddr::new(host, port);
        tracing::info!(pool = %spec.pool, handle = %id, addr = %addr, "Spawned worker process");

        self.children
            .lock()
            .insert(id.clone(), Running { child, _lease: lease });

        Ok(MemberHandle { id, addr })
    }

    async fn terminate(&self, handle: &MemberHandle) -> Result<(), ComputeError> {
        let mut running = self
            .children
            .lock()
            .remove(&handle.id)
            .ok_or_else(|| ComputeError::UnknownHandle(handle.id.clone()))?;

        if let Err(e) = running.child.kill().await {
            tracing::warn!(handle = %handle.id, error = %e, "Failed to kill worker process");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            pool: "p".into(),
            region: "r".into(),
            image: "i".into(),
            instance_type: "t".into(),
            subnet_cidrs: vec![],
        }
    }

    fn single_port(program: &str, args: Vec<String>) -> ProcessSubstrate {
        ProcessSubstrate::new(ProcessConfig {
            program: program.into(),
            args,
            port_range_start: 9500,
            port_range_end: 9500,
            ..ProcessConfig::default()
        })
    }

    #[test]
    fn substitutes_port_placeholder() {
        let substrate = ProcessSubstrate::new(ProcessConfig {
            program: "worker".into(),
            args: vec!["--listen".into(), "0.0.0.0:{port}".into()],
            ..ProcessConfig::default()
        });
        assert_eq!(substrate.args_for(9105), vec!["--listen", "0.0.0.0:9105"]);
    }

    #[tokio::test]
    async fn spawn_failure_releases_port() {
        let substrate = single_port("/nonexistent/worker-binary", Vec::new());

        assert!(matches!(substrate.launch(&spec()).await, Err(ComputeError::Spawn(_))));
        assert_eq!(substrate.free_ports.lock().len(), 1);
    }

    #[test]
    fn dropped_lease_returns_port() {
        let substrate = single_port("worker", Vec::new());
        let lease = substrate.lease_port().unwrap();
        assert!(substrate.lease_port().is_none());

        drop(lease);
        assert_eq!(substrate.free_ports.lock().iter().copied().collect::<Vec<_>>(), vec![9500]);
    }

    #[tokio::test]
    async fn terminate_frees_port() {
        let substrate = single_port("sleep", vec!["30".into()]);

        let handle = substrate.launch(&spec()).await.unwrap();
        assert_eq!(handle.addr.port(), 9500);
        assert!(matches!(substrate.launch(&spec()).await, Err(ComputeError::Exhausted)));

        substrate.terminate(&handle).await.unwrap();
        assert_eq!(substrate.free_ports.lock().len(), 1);
        assert!(matches!(
            substrate.terminate(&handle).await,
            Err(ComputeError::UnknownHandle(_))
        ));
    }
}
