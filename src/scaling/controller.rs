//! Scaling controller: turns alarm firings into capacity changes.
//!
//! # Responsibilities
//! - Look up the policy bound to each firing
//! - Enforce the per-policy cooldown
//! - Compute the clamped target and hand it to the pool manager
//!
//! Firings are processed strictly one at a time in arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::config::PolicyConfig;
use crate::monitor::AlarmFiring;
use crate::observability::metrics;
use crate::pool::PoolManager;
use crate::scaling::policy::{PolicyStatus, ScalingPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingOutcome {
    Applied { from: u32, to: u32 },
    CooldownActive { remaining: Duration },
}

#[derive(Debug, thiserror::Error)]
pub enum ScalingError {
    #[error("unknown scaling policy: {0}")]
    UnknownPolicy(String),
}

pub struct ScalingController {
    pool: Arc<PoolManager>,
    /// Cooldown state. Never held across an await.
    policies: Mutex<HashMap<String, ScalingPolicy>>,
    /// Serializes firings while the pool reconciles.
    apply_lock: tokio::sync::Mutex<()>,
}

impl ScalingController {
    pub fn new(pool: Arc<PoolManager>, policies: &[PolicyConfig]) -> Self {
        let policies = policies
            .iter()
            .map(|p| (p.name.clone(), ScalingPolicy::new(p)))
            .collect();

        Self {
            pool,
            policies: Mutex::new(policies),
            apply_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn policies(&self) -> Vec<PolicyStatus> {
        let now = Instant::now();
        let mut statuses: Vec<PolicyStatus> = self.policies.lock().values().map(|p| p.status(now)).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Apply a policy at `now`, unless it is still cooling down.
    pub async fn apply(&self, name: &str, now: Instant) -> Result<ScalingOutcome, ScalingError> {
        let _serial = self.apply_lock.lock().await;

        let (from, target, adjustment) = {
            let policies = self.policies.lock();
            let policy = policies
                .get(name)
                .ok_or_else(|| ScalingError::UnknownPolicy(name.to_string()))?;

            if let Some(remaining) = policy.cooldown_remaining(now) {
                tracing::info!(
                    policy = %name,
                    remaining_secs = remaining.as_secs(),
                    "Scaling policy in cooldown, ignoring firing"
                );
                metrics::record_scaling(name, "cooldown");
                return Ok(ScalingOutcome::CooldownActive { remaining });
            }

            let from = self.pool.desired();
            let (min, max) = self.pool.bounds();
            (from, policy.target(from, min, max), policy.adjustment())
        };

        let to = self.pool.set_desired_capacity(target).await;
        if let Some(policy) = self.policies.lock().get_mut(name) {
            policy.stamp(now);
        }

        tracing::info!(policy = %name, adjustment, from, to, "Scaling policy applied");
        metrics::record_scaling(name, "applied");
        Ok(ScalingOutcome::Applied { from, to })
    }

    pub async fn run(self: Arc<Self>, mut firings: mpsc::Receiver<AlarmFiring>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(policies = self.policies.lock().len(), "Scaling controller starting");

        loop {
            tokio::select! {
                firing = firings.recv() => {
                    let Some(firing) = firing else { break };
                    if let Err(e) = self.apply(&firing.policy, Instant::now()).await {
                        tracing::error!(alarm = %firing.alarm, error = %e, "Alarm firing dropped");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Scaling controller received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{ComputeError, ComputeSubstrate, LaunchSpec, MemberHandle, StaticSubstrate};
    use crate::config::FleetConfig;
    use crate::load_balancer::RoutingTable;
    use tokio::time;

    fn controller(cooldown_secs: u64) -> (Arc<PoolManager>, ScalingController) {
        let mut config = FleetConfig::default();
        config.health_check.enabled = false;
        config.pool.readiness_delay_secs = 0;
        config.pool.drain_grace_secs = 30;
        for policy in &mut config.policies {
            policy.cooldown_secs = cooldown_secs;
        }

        let workers: Vec<std::net::SocketAddr> = (0..4).map(|i| format!("127.0.0.1:{}", 19200 + i).parse().unwrap()).collect();
        let pool = Arc::new(PoolManager::new(
            &config,
            Arc::new(StaticSubstrate::new(workers)),
            Arc::new(RoutingTable::new()),
        ));
        let controller = ScalingController::new(pool.clone(), &config.policies);
        (pool, controller)
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_allows_a_single_increase() {
        let (pool, controller) = controller(300);
        pool.reconcile().await;

        let start = Instant::now();
        assert_eq!(
            controller.apply("scale-out", start).await.unwrap(),
            ScalingOutcome::Applied { from: 1, to: 2 }
        );

        let second = controller.apply("scale-out", start + Duration::from_secs(120)).await.unwrap();
        assert_eq!(
            second,
            ScalingOutcome::CooldownActive {
                remaining: Duration::from_secs(180)
            }
        );
        assert_eq!(pool.desired(), 2);
        assert_eq!(pool.active_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_load_converges_to_maximum() {
        let (pool, controller) = controller(300);
        pool.reconcile().await;

        let mut outcomes = Vec::new();
        for _ in 0..4 {
            outcomes.push(controller.apply("scale-out", Instant::now()).await.unwrap());
            time::advance(Duration::from_secs(300)).await;
        }

        assert_eq!(
            outcomes,
            vec![
                ScalingOutcome::Applied { from: 1, to: 2 },
                ScalingOutcome::Applied { from: 2, to: 3 },
                ScalingOutcome::Applied { from: 3, to: 4 },
                ScalingOutcome::Applied { from: 4, to: 4 },
            ]
        );
        assert_eq!(pool.active_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn policies_have_independent_timers() {
        let (pool, controller) = controller(300);
        pool.set_desired_capacity(2).await;

        let now = Instant::now();
        assert!(matches!(
            controller.apply("scale-out", now).await.unwrap(),
            ScalingOutcome::Applied { from: 2, to: 3 }
        ));
        assert!(matches!(
            controller.apply("scale-in", now + Duration::from_secs(1)).await.unwrap(),
            ScalingOutcome::Applied { from: 3, to: 2 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn opposing_alarms_with_short_cooldowns_oscillate() {
        let (pool, controller) = controller(60);
        pool.reconcile().await;

        let mut desired = Vec::new();
        for policy in ["scale-out", "scale-in", "scale-out", "scale-in"] {
            controller.apply(policy, Instant::now()).await.unwrap();
            desired.push(pool.desired());
            time::advance(Duration::from_secs(60)).await;
        }
        assert_eq!(desired, vec![2, 1, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_policy_is_rejected() {
        let (_pool, controller) = controller(300);
        assert!(matches!(
            controller.apply("nope", Instant::now()).await,
            Err(ScalingError::UnknownPolicy(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn run_processes_queued_firings() {
        let (pool, controller) = controller(300);
        let controller = Arc::new(controller);
        let (tx, rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(controller.clone().run(rx, shutdown_rx));

        for _ in 0..2 {
            tx.send(AlarmFiring {
                alarm: "cpu-high".into(),
                policy: "scale-out".into(),
                value: 90.0,
            })
            .await
            .unwrap();
        }
        drop(tx);
        task.await.unwrap();
        drop(shutdown_tx);

        assert_eq!(pool.desired(), 2);
    }

    struct StalledSubstrate;

    #[async_trait::async_trait]
    impl ComputeSubstrate for StalledSubstrate {
        async fn launch(&self, _spec: &LaunchSpec) -> Result<MemberHandle, ComputeError> {
            std::future::pending().await
        }

        async fn terminate(&self, _handle: &MemberHandle) -> Result<(), ComputeError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn policy_status_is_readable_during_slow_launch() {
        let mut config = FleetConfig::default();
        config.health_check.enabled = false;
        let pool = Arc::new(PoolManager::new(
            &config,
            Arc::new(StalledSubstrate),
            Arc::new(RoutingTable::new()),
        ));
        let controller = Arc::new(ScalingController::new(pool.clone(), &config.policies));

        let applying = tokio::spawn({
            let controller = controller.clone();
            async move { controller.apply("scale-out", Instant::now()).await }
        });
        while pool.status().counts.pending == 0 {
            tokio::task::yield_now().await;
        }

        let statuses = controller.policies();
        assert_eq!(statuses.len(), config.policies.len());
        assert!(statuses.iter().all(|p| p.cooldown_remaining_secs.is_none()));

        applying.abort();
    }
}
