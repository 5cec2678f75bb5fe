//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use elastic_pool::compute::StaticSubstrate;
use elastic_pool::config::FleetConfig;
use elastic_pool::lifecycle::{Fleet, Shutdown};
use elastic_pool::monitor::{MetricError, MetricMonitor, MetricQuery, MetricSource};
use elastic_pool::pool::PoolManager;

/// Start a worker that answers every request with 200 and a fixed body.
pub async fn start_mock_worker(body: &'static str) -> SocketAddr {
    start_programmable_worker(move || async move { (200, body.to_string()) }).await
}

/// Start a worker whose status and body are decided per request.
pub async fn start_programmable_worker<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                // Read the request head; bodies are not used by these workers.
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;

                let (status, body) = f().await;
                let status_text = match status {
                    200 => "200 OK",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Metric source replaying a fixed script; `None` entries and an empty
/// script are gaps.
pub struct ScriptedSource {
    values: Mutex<VecDeque<Option<f64>>>,
}

impl ScriptedSource {
    pub fn new(values: Vec<Option<f64>>) -> Self {
        Self {
            values: Mutex::new(values.into()),
        }
    }
}

#[async_trait]
impl MetricSource for ScriptedSource {
    async fn sample(&self, _query: &MetricQuery) -> Result<Option<f64>, MetricError> {
        Ok(self.values.lock().pop_front().flatten())
    }
}

/// Config tuned for fast convergence in tests.
pub fn test_config(workers: usize) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.pool.min_capacity = 1;
    config.pool.desired_capacity = workers.max(1) as u32;
    config.pool.max_capacity = 4;
    config.pool.readiness_delay_secs = 0;
    config.pool.reconcile_interval_secs = 1;
    config.pool.drain_grace_secs = 1;
    config.health_check.interval_secs = 1;
    config.health_check.timeout_secs = 1;
    config.health_check.healthy_threshold = 1;
    config.health_check.unhealthy_threshold = 1;
    config.monitor.period_secs = 3600;
    config.admin.enabled = true;
    config.admin.api_key = "test-key".to_string();
    config.observability.metrics_enabled = false;
    config
}

pub struct TestFleet {
    pub proxy: SocketAddr,
    pub admin: SocketAddr,
    pub pool: Arc<PoolManager>,
    pub monitor: Option<Arc<MetricMonitor>>,
    pub shutdown: Shutdown,
    pub task: JoinHandle<()>,
}

impl TestFleet {
    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = self.task.await;
    }
}

/// Build and run a fleet over a fixed set of worker addresses.
pub async fn start_fleet(
    config: FleetConfig,
    workers: Vec<SocketAddr>,
    source: Option<Arc<dyn MetricSource>>,
) -> TestFleet {
    let substrate = Arc::new(StaticSubstrate::new(workers));
    let fleet = Fleet::with_parts(config, substrate, source);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy = listener.local_addr().unwrap();
    let admin = admin_listener.local_addr().unwrap();

    let pool = fleet.pool().clone();
    let monitor = fleet.monitor().cloned();
    let shutdown = fleet.shutdown_handle();

    let task = tokio::spawn(async move {
        let _ = fleet
            .run(listener, Some(admin_listener), std::future::pending::<()>())
            .await;
    });

    TestFleet {
        proxy,
        admin,
        pool,
        monitor,
        shutdown,
        task,
    }
}

/// Poll `condition` every 50ms until it holds or `timeout` passes.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
