//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every Launching and InService member
//! - Keep one health record per registered member
//! - Push verdict changes to the pool manager
//! - Report members stuck in Launching past the startup window

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use dashmap::DashMap;
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{self, Instant};

use crate::config::HealthCheckConfig;
use crate::health::state::{HealthRecord, ProbeOutcome, Thresholds, Verdict};
use crate::observability::metrics;
use crate::pool::{MemberEvent, MemberId, MemberSnapshot, MemberState, PoolManager};

pub struct HealthChecker {
    pool: Arc<PoolManager>,
    records: DashMap<MemberId, HealthRecord>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthChecker {
    pub fn new(pool: Arc<PoolManager>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            pool,
            records: DashMap::new(),
            config,
            client,
        }
    }

    fn thresholds(&self) -> Thresholds {
        Thresholds {
            healthy: self.config.healthy_threshold,
            unhealthy: self.config.unhealthy_threshold,
        }
    }

    /// Current record for a member, if registered.
    pub fn record(&self, id: &MemberId) -> Option<HealthRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    pub fn records(&self) -> Vec<(MemberId, HealthRecord)> {
        self.records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            healthy_threshold = self.config.healthy_threshold,
            unhealthy_threshold = self.config.unhealthy_threshold,
            "Health checker starting"
        );

        let mut events = self.pool.subscribe();
        self.sync_records(&self.pool.members());
        let mut ticker = time::interval(self.config.interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Health checker lagged behind member events, resyncing");
                        self.sync_records(&self.pool.members());
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Health checker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Create or destroy records as members come and go.
    pub fn handle_event(&self, event: &MemberEvent) {
        match event {
            MemberEvent::Registered { id, .. } => {
                self.records.entry(id.clone()).or_default();
            }
            MemberEvent::Terminated { id, .. } => {
                self.records.remove(id);
            }
            MemberEvent::StateChanged { .. } => {}
        }
    }

    /// Align records with live pool membership.
    fn sync_records(&self, members: &[MemberSnapshot]) {
        for member in members {
            self.records.entry(member.id.clone()).or_default();
        }
        self.records.retain(|id, _| members.iter().any(|m| &m.id == id));
    }

    /// Probe every Launching and InService member concurrently.
    ///
    /// Each member's verdict is applied as soon as its own probe returns.
    pub async fn check_all(&self) {
        let members = self.pool.members();
        self.sync_records(&members);

        let checks = members
            .into_iter()
            .filter(|m| m.state.is_active())
            .map(|member| async move {
                let outcome = self.probe(member.addr).await;
                self.apply(&member, outcome).await;
            });
        join_all(checks).await;
    }

    async fn apply(&self, member: &MemberSnapshot, outcome: ProbeOutcome) {
        metrics::record_probe(outcome == ProbeOutcome::Success);

        let (change, verdict) = {
            let mut record = self.records.entry(member.id.clone()).or_default();
            let change = record.observe(outcome, self.thresholds());
            (change, record.verdict)
        };

        if let Some(verdict) = change {
            tracing::info!(member = %member.id, addr = %member.addr, verdict = ?verdict, "Health verdict changed");
            metrics::record_verdict_change(verdict == Verdict::Healthy);
            self.pool.set_verdict(&member.id, verdict);
        }

        if member.state == MemberState::Launching
            && verdict != Verdict::Healthy
            && Instant::now().saturating_duration_since(member.launched_at) > self.config.startup_window()
        {
            self.pool.report_launch_failure(&member.id).await;
        }
    }

    async fn probe(&self, addr: SocketAddr) -> ProbeOutcome {
        let port = self.config.port.unwrap_or(addr.port());
        let uri_string = format!("http://{}:{}{}", addr.ip(), port, self.config.path);

        let request = match Request::builder()
            .method("GET")
            .uri(&uri_string)
            .header("user-agent", "elastic-pool-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(uri = %uri_string, "Failed to build health check request: {}", e);
                return ProbeOutcome::Failure;
            }
        };

        match time::timeout(self.config.timeout(), self.client.request(request)).await {
            Ok(Ok(response)) => {
                let status = response.status();
                if self.config.success_codes.contains(status.as_u16()) {
                    ProbeOutcome::Success
                } else {
                    tracing::debug!(addr = %addr, status = %status, "Health check failed: status out of range");
                    ProbeOutcome::Failure
                }
            }
            Ok(Err(e)) => {
                tracing::debug!(addr = %addr, error = %e, "Health check failed: connection error");
                ProbeOutcome::Failure
            }
            Err(_) => {
                tracing::debug!(addr = %addr, "Health check failed: timeout");
                ProbeOutcome::Failure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::StaticSubstrate;
    use crate::config::FleetConfig;
    use crate::load_balancer::RoutingTable;
    use axum::{routing::get, Router};
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn spawn_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", get(|| async { "ok" }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn checker(workers: Vec<SocketAddr>) -> (Arc<PoolManager>, HealthChecker) {
        let mut config = FleetConfig::default();
        config.pool.desired_capacity = workers.len() as u32;
        config.pool.readiness_delay_secs = 0;
        config.health_check.healthy_threshold = 1;
        config.health_check.timeout_secs = 1;
        let substrate = Arc::new(StaticSubstrate::new(workers));
        let pool = Arc::new(PoolManager::new(&config, substrate, Arc::new(RoutingTable::new())));
        let checker = HealthChecker::new(pool.clone(), config.health_check.clone());
        (pool, checker)
    }

    #[tokio::test]
    async fn healthy_probe_puts_member_in_service() {
        let addr = spawn_backend().await;
        let (pool, checker) = checker(vec![addr]);
        pool.reconcile().await;
        let id = pool.members()[0].id.clone();
        assert!(!pool.routing_table().contains(&id));

        checker.check_all().await;

        assert_eq!(checker.record(&id).unwrap().verdict, Verdict::Healthy);
        assert_eq!(pool.members()[0].state, MemberState::InService);
        assert!(pool.routing_table().contains(&id));
    }

    #[tokio::test]
    async fn unreachable_member_stays_out_of_rotation() {
        // Reserved port, nothing listens there.
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let (pool, checker) = checker(vec![addr]);
        pool.reconcile().await;
        let id = pool.members()[0].id.clone();

        checker.check_all().await;

        let record = checker.record(&id).unwrap();
        assert_eq!(record.verdict, Verdict::Unhealthy);
        assert_eq!(record.consecutive_failures, 1);
        assert_eq!(pool.members()[0].state, MemberState::Launching);
        assert!(pool.routing_table().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn member_past_startup_window_is_reported() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut config = FleetConfig::default();
        config.pool.desired_capacity = 1;
        config.pool.launch_retry_limit = 1;
        config.health_check.startup_window_secs = 10;
        config.health_check.timeout_secs = 1;
        let substrate = Arc::new(StaticSubstrate::new(vec![addr]));
        let pool = Arc::new(PoolManager::new(&config, substrate, Arc::new(RoutingTable::new())));
        let checker = HealthChecker::new(pool.clone(), config.health_check.clone());
        pool.reconcile().await;

        // Inside the window the member is left alone.
        checker.check_all().await;
        assert_eq!(pool.members().len(), 1);

        time::advance(Duration::from_secs(11)).await;
        checker.check_all().await;

        assert!(pool.members().is_empty());
        assert!(matches!(
            pool.fleet_health(),
            crate::pool::FleetHealth::LaunchFailing { consecutive_failures: 1, .. }
        ));
    }

    #[tokio::test]
    async fn records_follow_member_events() {
        let (_pool, checker) = checker(Vec::new());
        let id = MemberId::from("m-1");

        checker.handle_event(&MemberEvent::Registered {
            id: id.clone(),
            addr: "127.0.0.1:1".parse().unwrap(),
        });
        assert!(checker.record(&id).is_some());

        checker.handle_event(&MemberEvent::Terminated {
            id: id.clone(),
            reason: crate::pool::TerminationReason::ScaledIn,
        });
        assert!(checker.record(&id).is_none());
    }
}
