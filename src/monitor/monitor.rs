//! Periodic metric sampling and alarm evaluation.
//!
//! # Responsibilities
//! - Sample every alarm's statistic once per period, concurrently
//! - Feed samples through each alarm's streak state machine
//! - Queue firings for the scaling controller
//! - Treat an empty in-service set as a gap rather than a reading

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, broadcast::error::RecvError, mpsc};
use tokio::time;

use crate::config::{AlarmConfig, MonitorConfig};
use crate::monitor::alarm::{Alarm, AlarmStatus, AlarmTransition};
use crate::monitor::source::{MetricQuery, MetricSource};
use crate::observability::metrics;
use crate::pool::{MemberEvent, MemberId, MemberState, PoolManager};

/// An alarm reached its evaluation window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmFiring {
    pub alarm: String,
    pub policy: String,
    pub value: f64,
}

pub struct MetricMonitor {
    pool: Arc<PoolManager>,
    source: Arc<dyn MetricSource>,
    alarms: Mutex<Vec<Alarm>>,
    in_service: Mutex<HashSet<MemberId>>,
    config: MonitorConfig,
    firings: mpsc::Sender<AlarmFiring>,
}

impl MetricMonitor {
    pub fn new(
        pool: Arc<PoolManager>,
        source: Arc<dyn MetricSource>,
        config: MonitorConfig,
        alarms: &[AlarmConfig],
        firings: mpsc::Sender<AlarmFiring>,
    ) -> Self {
        let monitor = Self {
            pool,
            source,
            alarms: Mutex::new(alarms.iter().map(Alarm::new).collect()),
            in_service: Mutex::new(HashSet::new()),
            config,
            firings,
        };
        monitor.reseed();
        monitor
    }

    pub fn alarms(&self) -> Vec<AlarmStatus> {
        self.alarms.lock().iter().map(Alarm::status).collect()
    }

    pub fn in_service_count(&self) -> usize {
        self.in_service.lock().len()
    }

    /// Rebuild the in-service set from the pool.
    fn reseed(&self) {
        let members = self.pool.members();
        let mut in_service = self.in_service.lock();
        in_service.clear();
        in_service.extend(
            members
                .into_iter()
                .filter(|m| m.state == MemberState::InService)
                .map(|m| m.id),
        );
    }

    pub fn handle_event(&self, event: &MemberEvent) {
        let mut in_service = self.in_service.lock();
        match event {
            MemberEvent::StateChanged { id, to, .. } => {
                if *to == MemberState::InService {
                    in_service.insert(id.clone());
                } else {
                    in_service.remove(id);
                }
            }
            MemberEvent::Terminated { id, .. } => {
                in_service.remove(id);
            }
            MemberEvent::Registered { .. } => {}
        }
    }

    fn query(&self, alarm: &Alarm) -> MetricQuery {
        MetricQuery {
            namespace: self.config.namespace.clone(),
            metric_name: self.config.metric_name.clone(),
            statistic: alarm.statistic(),
            dimension: self.pool.name().to_string(),
        }
    }

    async fn sample(&self, query: MetricQuery) -> Option<f64> {
        match time::timeout(self.config.sample_timeout(), self.source.sample(&query)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                tracing::warn!(metric = %query.metric_name, statistic = query.statistic.as_str(), error = %e, "Metric sample failed");
                None
            }
            Err(_) => {
                tracing::warn!(metric = %query.metric_name, statistic = query.statistic.as_str(), "Metric sample timed out");
                None
            }
        }
    }

    /// Run one sampling period. Returns the firings that were queued.
    pub async fn evaluate(&self) -> Vec<AlarmFiring> {
        let queries: Vec<MetricQuery> = self.alarms.lock().iter().map(|a| self.query(a)).collect();

        let samples: Vec<Option<f64>> = if self.in_service_count() == 0 {
            tracing::debug!(pool = %self.pool.name(), "No in-service members, skipping sample");
            vec![None; queries.len()]
        } else {
            join_all(queries.into_iter().map(|q| self.sample(q))).await
        };

        let mut fired = Vec::new();
        {
            let mut alarms = self.alarms.lock();
            for (alarm, sample) in alarms.iter_mut().zip(samples) {
                match alarm.observe(sample) {
                    AlarmTransition::Fired { value } => {
                        tracing::info!(alarm = %alarm.name(), policy = %alarm.policy(), value, "Alarm fired");
                        metrics::record_alarm_fired(alarm.name());
                        fired.push(AlarmFiring {
                            alarm: alarm.name().to_string(),
                            policy: alarm.policy().to_string(),
                            value,
                        });
                    }
                    AlarmTransition::Accumulating { streak } => {
                        tracing::debug!(alarm = %alarm.name(), streak, "Alarm breaching");
                    }
                    AlarmTransition::Reset => {
                        tracing::debug!(alarm = %alarm.name(), "Alarm streak reset");
                    }
                    AlarmTransition::NoData => {
                        metrics::record_metric_gap(alarm.name());
                    }
                    AlarmTransition::Quiet => {}
                }
            }
        }

        for firing in &fired {
            if self.firings.send(firing.clone()).await.is_err() {
                tracing::warn!(alarm = %firing.alarm, "Scaling controller gone, dropping firing");
            }
        }
        fired
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            period_secs = self.config.period_secs,
            alarms = self.alarms.lock().len(),
            "Metric monitor starting"
        );

        let mut events = self.pool.subscribe();
        self.reseed();
        let mut ticker = time::interval(self.config.period());
        // The first tick completes immediately; sample after one full period.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evaluate().await;
                }
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Metric monitor lagged behind member events, resyncing");
                        self.reseed();
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Metric monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
