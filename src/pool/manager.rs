//! Pool manager: the single writer of pool state.
//!
//! # Responsibilities
//! - Own the [`Pool`] aggregate behind one lock
//! - Reconcile member count toward desired capacity
//! - Launch and terminate members through the compute substrate
//! - Publish member events and routing table snapshots atomically with
//!   every mutation

use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{self, Instant};

use crate::compute::{ComputeError, ComputeSubstrate, LaunchSpec};
use crate::config::{FleetConfig, PoolConfig};
use crate::health::state::Verdict;
use crate::load_balancer::{Endpoint, RoutingTable};
use crate::observability::metrics;
use crate::pool::member::{Member, MemberEvent, MemberId, MemberSnapshot, MemberState, TerminationReason};
use crate::pool::state::{FleetHealth, MemberCounts, Pool, PoolError};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What a single reconcile pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub promoted: usize,
    pub launched: usize,
    pub launch_failed: usize,
    pub drained: usize,
    pub reclaimed: usize,
    pub terminated: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Point-in-time view of the pool for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub name: String,
    pub desired: u32,
    pub min: u32,
    pub max: u32,
    pub counts: MemberCounts,
    pub routable: usize,
    pub fleet_health: FleetHealth,
}

pub struct PoolManager {
    pool: RwLock<Pool>,
    table: Arc<RoutingTable>,
    substrate: Arc<dyn ComputeSubstrate>,
    events: broadcast::Sender<MemberEvent>,
    config: PoolConfig,
    launch_spec: LaunchSpec,
    max_connections_per_member: usize,
    /// When health checks are off every member is treated as Healthy.
    health_gated: bool,
    /// Serializes capacity changes.
    reconcile_lock: Mutex<()>,
}

impl PoolManager {
    pub fn new(config: &FleetConfig, substrate: Arc<dyn ComputeSubstrate>, table: Arc<RoutingTable>) -> Self {
        let pool_config = config.pool.clone();
        let pool = Pool::new(
            pool_config.name.clone(),
            pool_config.min_capacity,
            pool_config.desired_capacity,
            pool_config.max_capacity,
        );
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            launch_spec: LaunchSpec::from_config(&pool_config.name, &config.compute),
            pool: RwLock::new(pool),
            table,
            substrate,
            events,
            config: pool_config,
            max_connections_per_member: config.routing.max_connections_per_member,
            health_gated: config.health_check.enabled,
            reconcile_lock: Mutex::new(()),
        }
    }

    /// Subscribe to member lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<MemberEvent> {
        self.events.subscribe()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    pub fn desired(&self) -> u32 {
        self.pool.read().desired()
    }

    pub fn bounds(&self) -> (u32, u32) {
        self.pool.read().bounds()
    }

    pub fn active_count(&self) -> usize {
        self.pool.read().active_count()
    }

    pub fn fleet_health(&self) -> FleetHealth {
        self.pool.read().fleet_health().clone()
    }

    pub fn members(&self) -> Vec<MemberSnapshot> {
        self.pool.read().snapshots(Instant::now())
    }

    pub fn member(&self, id: &MemberId) -> Option<MemberSnapshot> {
        let pool = self.pool.read();
        pool.member(id).map(|m| m.snapshot(Instant::now(), pool.is_healthy(id)))
    }

    pub fn status(&self) -> PoolStatus {
        let pool = self.pool.read();
        let (min, max) = pool.bounds();
        PoolStatus {
            name: pool.name().to_string(),
            desired: pool.desired(),
            min,
            max,
            counts: pool.counts(),
            routable: self.table.len(),
            fleet_health: pool.fleet_health().clone(),
        }
    }

    /// Set the desired capacity (clamped to bounds) and reconcile toward it.
    /// Returns the stored value.
    pub async fn set_desired_capacity(&self, requested: u32) -> u32 {
        let stored = {
            let mut pool = self.pool.write();
            let previous = pool.desired();
            let stored = pool.set_desired(requested);
            if stored != requested {
                tracing::info!(requested, stored, "Desired capacity clamped to bounds");
            }
            if stored != previous {
                tracing::info!(pool = %pool.name(), from = previous, to = stored, "Desired capacity changed");
            }
            self.commit(&pool, Vec::new());
            stored
        };

        self.reconcile().await;
        stored
    }

    /// Reset the launch failure budget and clear the fleet alarm.
    pub fn clear_fleet_alarm(&self) {
        let mut pool = self.pool.write();
        if *pool.fleet_health() != FleetHealth::Ok {
            tracing::info!(pool = %pool.name(), "Fleet alarm cleared by operator");
        }
        pool.clear_fleet_alarm();
        self.commit(&pool, Vec::new());
    }

    /// Record a health verdict change for a member.
    pub fn set_verdict(&self, id: &MemberId, verdict: Verdict) {
        let mut pool = self.pool.write();
        if !pool.set_healthy(id, verdict == Verdict::Healthy) {
            return;
        }
        let mut events = Vec::new();
        if verdict == Verdict::Healthy {
            pool.promote_ready(Instant::now(), self.config.readiness_delay(), &mut events);
        }
        self.commit(&pool, events);
    }

    /// Put a Draining member back into service if its grace period is still running.
    ///
    /// Desired capacity grows by one so the member is not drained again on
    /// the next reconcile pass.
    pub fn cancel_drain(&self, id: &MemberId) -> Result<(), PoolError> {
        let now = Instant::now();
        let mut pool = self.pool.write();
        pool.check_cancellable(id, now)?;
        let (_, max) = pool.bounds();
        if pool.active_count() >= max as usize {
            return Err(PoolError::AtMaximum(max));
        }

        let mut events = Vec::new();
        pool.cancel_drain(id, now, &mut events)?;
        let active = pool.active_count() as u32;
        if active > pool.desired() {
            pool.set_desired(active);
        }
        self.commit(&pool, events);
        Ok(())
    }

    /// A Launching member never became Healthy within its startup window.
    pub async fn report_launch_failure(&self, id: &MemberId) {
        let removed = {
            let mut pool = self.pool.write();
            if pool.member(id).map(|m| m.state) != Some(MemberState::Launching) {
                return;
            }
            let mut events = Vec::new();
            let removed = pool.remove(id, TerminationReason::StartupTimeout, &mut events);
            let raised = pool.record_launch_failure(
                Instant::now(),
                self.config.launch_retry_limit,
                self.config.launch_backoff_base_ms,
                self.config.launch_backoff_max_ms,
                format!("member {} did not become healthy", id),
            );
            if raised {
                self.raise_fleet_alarm(&pool);
            }
            self.commit(&pool, events);
            removed
        };

        metrics::record_launch_failure("startup_timeout");
        tracing::warn!(member = %id, "Member exceeded startup window, terminating");

        if let Some(member) = removed {
            if let Err(e) = self.substrate.terminate(&member.handle).await {
                tracing::warn!(member = %id, error = %e, "Failed to terminate timed-out member");
            }
        }
    }

    /// One idempotent pass toward desired capacity.
    pub async fn reconcile(&self) -> ReconcileReport {
        let _serial = self.reconcile_lock.lock().await;
        let now = Instant::now();
        let mut report = ReconcileReport::default();

        let (launch_ids, expired) = {
            let mut pool = self.pool.write();
            let mut events = Vec::new();
            report.promoted = pool.promote_ready(now, self.config.readiness_delay(), &mut events);

            let desired = pool.desired() as usize;
            let active = pool.active_count();
            let mut launch_ids = Vec::new();

            if active > desired {
                let ids = pool.select_for_removal(active - desired);
                let deadline = now + self.config.drain_grace();
                for id in &ids {
                    pool.begin_drain(id, deadline, &mut events);
                }
                report.drained = ids.len();
            } else if active < desired {
                let deficit = desired - active;
                report.reclaimed = pool.reclaim_draining(deficit, now, &mut events);
                let remaining = deficit - report.reclaimed;
                if remaining > 0 {
                    if pool.launches_allowed(now) {
                        launch_ids = pool.reserve_launches(remaining);
                    } else {
                        tracing::debug!(pool = %pool.name(), deficit = remaining, "Launches suspended");
                    }
                }
            }

            let expired = pool.expired_drains(now);
            self.commit(&pool, events);
            (launch_ids, expired)
        };

        if !launch_ids.is_empty() {
            self.launch_members(launch_ids, &mut report).await;
        }

        if !expired.is_empty() {
            let results = join_all(expired.iter().map(|(_, handle)| self.substrate.terminate(handle))).await;

            let mut pool = self.pool.write();
            let mut events = Vec::new();
            for ((id, _), result) in expired.iter().zip(results) {
                if let Err(e) = result {
                    tracing::warn!(member = %id, error = %e, "Substrate terminate failed, dropping member anyway");
                }
                if pool.remove(id, TerminationReason::ScaledIn, &mut events).is_some() {
                    report.terminated += 1;
                }
            }
            self.commit(&pool, events);
        }

        report
    }

    async fn launch_members(&self, ids: Vec<MemberId>, report: &mut ReconcileReport) {
        let timeout = self.config.launch_timeout();
        let launches = ids.iter().map(|id| async move {
            tracing::debug!(member = %id, "Launching member");
            match time::timeout(timeout, self.substrate.launch(&self.launch_spec)).await {
                Ok(result) => result,
                Err(_) => Err(ComputeError::Timeout(timeout)),
            }
        });
        let results = join_all(launches).await;

        let now = Instant::now();
        let mut pool = self.pool.write();
        let mut events = Vec::new();

        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(handle) => {
                    tracing::info!(member = %id, addr = %handle.addr, handle = %handle.id, "Member launched");
                    let endpoint = Arc::new(Endpoint::new(id.clone(), handle.addr, self.max_connections_per_member));
                    pool.register(Member::new(id, endpoint, handle, now), !self.health_gated, &mut events);
                    pool.record_launch_success();
                    report.launched += 1;
                }
                Err(e) => {
                    tracing::warn!(member = %id, error = %e, "Member launch failed");
                    metrics::record_launch_failure("launch_error");
                    pool.abandon_launch(&id, &mut events);
                    let raised = pool.record_launch_failure(
                        now,
                        self.config.launch_retry_limit,
                        self.config.launch_backoff_base_ms,
                        self.config.launch_backoff_max_ms,
                        e.to_string(),
                    );
                    if raised {
                        self.raise_fleet_alarm(&pool);
                    }
                    report.launch_failed += 1;
                }
            }
        }

        // Members registered as healthy may already be ready.
        report.promoted += pool.promote_ready(now, self.config.readiness_delay(), &mut events);
        self.commit(&pool, events);
    }

    fn raise_fleet_alarm(&self, pool: &Pool) {
        if let FleetHealth::LaunchFailing {
            consecutive_failures,
            last_error,
        } = pool.fleet_health()
        {
            tracing::error!(
                pool = %pool.name(),
                consecutive_failures,
                last_error = %last_error,
                "Launch retry budget exhausted, suspending launches"
            );
        }
    }

    /// Publish routing table, gauges and events. Called with the write lock held.
    fn commit(&self, pool: &Pool, events: Vec<MemberEvent>) {
        self.table.publish(pool.routable());
        metrics::set_desired_capacity(pool.desired());
        metrics::set_member_counts(&pool.counts());
        metrics::set_fleet_launch_failing(*pool.fleet_health() != FleetHealth::Ok);
        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }

    /// Run the periodic reconcile loop.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            pool = %self.config.name,
            interval_secs = self.config.reconcile_interval_secs,
            "Pool reconciler starting"
        );

        let mut ticker = time::interval(self.config.reconcile_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.reconcile().await;
                    if !report.is_noop() {
                        tracing::debug!(?report, "Reconcile pass");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Pool reconciler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{MemberHandle, StaticSubstrate};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Launches that never complete.
    struct StalledSubstrate;

    #[async_trait]
    impl ComputeSubstrate for StalledSubstrate {
        async fn launch(&self, _spec: &LaunchSpec) -> Result<MemberHandle, ComputeError> {
            std::future::pending().await
        }

        async fn terminate(&self, _handle: &MemberHandle) -> Result<(), ComputeError> {
            Ok(())
        }
    }

    fn workers(n: u16) -> Vec<std::net::SocketAddr> {
        (0..n).map(|i| format!("127.0.0.1:{}", 19000 + i).parse().unwrap()).collect()
    }

    fn manager(config: FleetConfig, worker_count: u16) -> PoolManager {
        let substrate = Arc::new(StaticSubstrate::new(workers(worker_count)));
        PoolManager::new(&config, substrate, Arc::new(RoutingTable::new()))
    }

    fn ungated_config() -> FleetConfig {
        let mut config = FleetConfig::default();
        config.health_check.enabled = false;
        config.pool.readiness_delay_secs = 0;
        config.pool.drain_grace_secs = 30;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_launches_up_to_desired() {
        let mut config = ungated_config();
        config.pool.desired_capacity = 2;
        let pool = manager(config, 4);

        let report = pool.reconcile().await;
        assert_eq!(report.launched, 2);
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.routing_table().len(), 2);

        // Idempotent.
        assert!(pool.reconcile().await.is_noop());
    }

    #[tokio::test(start_paused = true)]
    async fn scale_in_drains_then_terminates_after_grace() {
        let mut config = ungated_config();
        config.pool.desired_capacity = 3;
        let pool = manager(config, 4);
        pool.reconcile().await;
        let mut events = pool.subscribe();

        assert_eq!(pool.set_desired_capacity(1).await, 1);
        assert_eq!(pool.routing_table().len(), 1);
        let draining = pool.members().iter().filter(|m| m.state == MemberState::Draining).count();
        assert_eq!(draining, 2);

        time::advance(Duration::from_secs(29)).await;
        assert_eq!(pool.reconcile().await.terminated, 0);

        time::advance(Duration::from_secs(1)).await;
        assert_eq!(pool.reconcile().await.terminated, 2);
        assert_eq!(pool.members().len(), 1);

        let mut terminated = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, MemberEvent::Terminated { reason: TerminationReason::ScaledIn, .. }) {
                terminated += 1;
            }
        }
        assert_eq!(terminated, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scale_out_reclaims_draining_members_first() {
        let mut config = ungated_config();
        config.pool.desired_capacity = 2;
        let pool = manager(config, 2);
        pool.reconcile().await;

        pool.set_desired_capacity(1).await;
        time::advance(Duration::from_secs(5)).await;
        let report = {
            pool.pool.write().set_desired(2);
            pool.reconcile().await
        };
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.launched, 0);
        assert_eq!(pool.routing_table().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_requests_are_clamped() {
        let pool = manager(ungated_config(), 8);
        assert_eq!(pool.set_desired_capacity(50).await, 4);
        assert_eq!(pool.set_desired_capacity(0).await, 1);
        assert_eq!(pool.desired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_substrate_raises_fleet_alarm() {
        let mut config = ungated_config();
        config.pool.desired_capacity = 1;
        config.pool.launch_retry_limit = 2;
        config.pool.launch_backoff_base_ms = 100;
        config.pool.launch_backoff_max_ms = 100;
        let pool = manager(config, 0);

        assert_eq!(pool.reconcile().await.launch_failed, 1);
        // Still in backoff.
        assert!(pool.reconcile().await.is_noop());

        time::advance(Duration::from_secs(1)).await;
        assert_eq!(pool.reconcile().await.launch_failed, 1);
        assert!(matches!(pool.fleet_health(), FleetHealth::LaunchFailing { consecutive_failures: 2, .. }));

        // Suspended: no further launch attempts.
        time::advance(Duration::from_secs(60)).await;
        assert!(pool.reconcile().await.is_noop());
        assert_eq!(pool.active_count(), 0);

        pool.clear_fleet_alarm();
        assert_eq!(pool.reconcile().await.launch_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn health_gated_members_wait_for_verdict() {
        let mut config = FleetConfig::default();
        config.pool.desired_capacity = 1;
        config.pool.readiness_delay_secs = 10;
        let pool = manager(config, 1);
        pool.reconcile().await;

        let id = pool.members()[0].id.clone();
        pool.set_verdict(&id, Verdict::Healthy);
        assert_eq!(pool.members()[0].state, MemberState::Launching);

        time::advance(Duration::from_secs(10)).await;
        assert_eq!(pool.reconcile().await.promoted, 1);
        assert!(pool.routing_table().contains(&id));

        pool.set_verdict(&id, Verdict::Unhealthy);
        assert!(!pool.routing_table().contains(&id));
        assert_eq!(pool.members()[0].state, MemberState::InService);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_timeout_removes_launching_member() {
        let mut config = FleetConfig::default();
        config.pool.desired_capacity = 1;
        let pool = manager(config, 1);
        pool.reconcile().await;
        let id = pool.members()[0].id.clone();

        pool.report_launch_failure(&id).await;
        assert!(pool.members().is_empty());
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reclaimed_launching_member_stays_gated() {
        let mut config = FleetConfig::default();
        config.pool.desired_capacity = 2;
        config.pool.readiness_delay_secs = 60;
        let pool = manager(config, 2);
        pool.reconcile().await;

        pool.set_desired_capacity(1).await;
        time::advance(Duration::from_secs(5)).await;
        pool.set_desired_capacity(2).await;

        let members = pool.members();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|m| m.state == MemberState::Launching));
        assert!(pool.routing_table().is_empty());

        // Startup window still applies to the reclaimed member.
        let id = members[0].id.clone();
        pool.report_launch_failure(&id).await;
        assert!(pool.member(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drain_checks_member_before_capacity() {
        let mut config = ungated_config();
        config.pool.desired_capacity = 4;
        let pool = manager(config, 4);
        pool.reconcile().await;
        assert_eq!(pool.active_count(), 4);

        let unknown = MemberId::from("nope");
        assert_eq!(pool.cancel_drain(&unknown), Err(PoolError::NotFound(unknown.clone())));

        let id = pool.members()[0].id.clone();
        assert_eq!(
            pool.cancel_drain(&id),
            Err(PoolError::NotDraining { id: id.clone(), state: MemberState::InService })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drain_returns_member_and_raises_desired() {
        let mut config = ungated_config();
        config.pool.desired_capacity = 3;
        let pool = manager(config, 4);
        pool.reconcile().await;

        pool.set_desired_capacity(1).await;
        time::advance(Duration::from_secs(5)).await;
        let id = pool
            .members()
            .into_iter()
            .find(|m| m.state == MemberState::Draining)
            .map(|m| m.id)
            .unwrap();

        assert_eq!(pool.cancel_drain(&id), Ok(()));
        assert_eq!(pool.desired(), 2);
        assert_eq!(pool.member(&id).unwrap().state, MemberState::InService);
        assert!(pool.routing_table().contains(&id));

        // Not drained again.
        assert!(pool.reconcile().await.is_noop());
    }

    #[tokio::test(start_paused = true)]
    async fn launch_timeout_counts_as_failure() {
        let mut config = ungated_config();
        config.pool.desired_capacity = 1;
        config.pool.launch_timeout_secs = 1;
        config.pool.launch_retry_limit = 1;
        let pool = PoolManager::new(&config, Arc::new(StalledSubstrate), Arc::new(RoutingTable::new()));

        let report = pool.reconcile().await;
        assert_eq!(report.launch_failed, 1);
        assert_eq!(report.launched, 0);
        assert_eq!(pool.active_count(), 0);
        match pool.fleet_health() {
            FleetHealth::LaunchFailing { last_error, .. } => assert!(last_error.contains("timed out")),
            other => panic!("unexpected fleet health {:?}", other),
        }
    }
}
