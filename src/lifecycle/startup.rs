//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Start background tasks (reconciler, health checks, monitor, scaling)
//! - Bind listeners and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Ingress starts last; the routing table is empty until a member is healthy
//! - On shutdown every loop exits before `run` returns

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::compute::{build_substrate, ComputeSubstrate};
use crate::config::FleetConfig;
use crate::health::HealthChecker;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::load_balancer::{RoutingTable, TrafficRouter};
use crate::monitor::{AlarmFiring, HttpMetricSource, MetricError, MetricMonitor, MetricSource};
use crate::pool::PoolManager;
use crate::scaling::ScalingController;

const FIRING_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("metric source: {0}")]
    MetricSource(#[from] MetricError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Every subsystem, wired together.
pub struct Fleet {
    config: FleetConfig,
    pool: Arc<PoolManager>,
    health: Arc<HealthChecker>,
    monitor: Option<Arc<MetricMonitor>>,
    scaling: Arc<ScalingController>,
    traffic: Arc<TrafficRouter>,
    firings: mpsc::Receiver<AlarmFiring>,
    shutdown: Shutdown,
}

impl Fleet {
    /// Build from configuration, using the configured substrate and metric source.
    pub fn build(config: FleetConfig) -> Result<Self, StartupError> {
        let substrate = build_substrate(&config.compute);
        let source: Option<Arc<dyn MetricSource>> = match (&config.monitor.source_url, config.monitor.enabled) {
            (Some(url), true) => Some(Arc::new(HttpMetricSource::new(url, config.monitor.sample_timeout())?)),
            (None, true) => {
                tracing::warn!("No metric source configured, alarms will not be evaluated");
                None
            }
            (_, false) => None,
        };
        Ok(Self::with_parts(config, substrate, source))
    }

    /// Build with explicit collaborators.
    pub fn with_parts(
        config: FleetConfig,
        substrate: Arc<dyn ComputeSubstrate>,
        source: Option<Arc<dyn MetricSource>>,
    ) -> Self {
        let table = Arc::new(RoutingTable::new());
        let pool = Arc::new(PoolManager::new(&config, substrate, table.clone()));
        let health = Arc::new(HealthChecker::new(pool.clone(), config.health_check.clone()));
        let traffic = Arc::new(TrafficRouter::new(table, &config.routing));

        let (tx, firings) = mpsc::channel(FIRING_QUEUE_CAPACITY);
        let monitor = source.map(|source| {
            Arc::new(MetricMonitor::new(
                pool.clone(),
                source,
                config.monitor.clone(),
                &config.alarms,
                tx,
            ))
        });
        let scaling = Arc::new(ScalingController::new(pool.clone(), &config.policies));

        Self {
            config,
            pool,
            health,
            monitor,
            scaling,
            traffic,
            firings,
            shutdown: Shutdown::new(),
        }
    }

    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    pub fn monitor(&self) -> Option<&Arc<MetricMonitor>> {
        self.monitor.as_ref()
    }

    pub fn scaling(&self) -> &Arc<ScalingController> {
        &self.scaling
    }

    pub fn traffic(&self) -> &Arc<TrafficRouter> {
        &self.traffic
    }

    /// Handle that stops the fleet when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn admin_state(&self) -> AdminState {
        AdminState {
            pool: self.pool.clone(),
            monitor: self.monitor.clone(),
            scaling: self.scaling.clone(),
            api_key: Arc::from(self.config.admin.api_key.as_str()),
        }
    }

    /// Start background tasks and serve ingress until `signal` resolves
    /// or the shutdown handle is triggered.
    pub async fn run<F>(self, listener: TcpListener, admin: Option<TcpListener>, signal: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(
            pool = %self.pool.name(),
            desired = self.pool.desired(),
            alarms = self.config.alarms.len(),
            policies = self.config.policies.len(),
            "Fleet starting"
        );

        let admin_state = self.admin_state();
        let Fleet {
            config,
            pool,
            health,
            monitor,
            scaling,
            traffic,
            firings,
            shutdown,
        } = self;

        let mut tasks: Vec<JoinHandle<()>> = vec![
            tokio::spawn(pool.clone().run(shutdown.subscribe())),
            tokio::spawn(health.run(shutdown.subscribe())),
            tokio::spawn(scaling.run(firings, shutdown.subscribe())),
        ];
        if let Some(monitor) = monitor {
            tasks.push(tokio::spawn(monitor.run(shutdown.subscribe())));
        }

        if let Some(admin_listener) = admin {
            let router = setup_admin_router(admin_state);
            let stop = shutdown.signalled();
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
            tasks.push(tokio::spawn(async move {
                if let Err(e) = axum::serve(admin_listener, router).with_graceful_shutdown(stop).await {
                    tracing::error!(error = %e, "Admin server failed");
                }
            }));
        }

        let stop = shutdown.signalled();
        let trigger = shutdown.clone();
        let server_shutdown = async move {
            tokio::select! {
                _ = signal => trigger.trigger(),
                _ = stop => {}
            }
        };
        let result = HttpServer::new(&config, traffic).run(listener, server_shutdown).await;

        shutdown.trigger();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        tracing::info!(pool = %pool.name(), members = pool.members().len(), "Fleet stopped");
        result.map_err(StartupError::from)
    }
}
