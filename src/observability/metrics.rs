//! Metrics collection and exposition.
//!
//! # Metrics
//! - `fleet_desired_capacity` (gauge)
//! - `fleet_members` (gauge): members by `state`
//! - `fleet_verdict_changes_total` (counter): by `verdict`
//! - `fleet_routing_table_size` (gauge)
//! - `fleet_launch_failing` (gauge): 1 while launches are suspended
//! - `fleet_launch_failures_total` (counter): by `reason`
//! - `fleet_health_probes_total` (counter): by `result`
//! - `fleet_alarm_firings_total` (counter): by `alarm`
//! - `fleet_metric_gaps_total` (counter): by `alarm`
//! - `fleet_scaling_actions_total` (counter): by `policy`, `outcome`
//! - `proxy_requests_total` (counter): by `method`, `status`
//! - `proxy_request_duration_seconds` (histogram)
//!
//! Member ids are never used as labels: they are minted per launch and
//! would leave one stale series behind for every terminated member.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::pool::MemberCounts;

/// Start the Prometheus scrape listener and install the global recorder.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn set_desired_capacity(desired: u32) {
    metrics::gauge!("fleet_desired_capacity").set(f64::from(desired));
}

pub fn set_member_counts(counts: &MemberCounts) {
    metrics::gauge!("fleet_members", "state" => "pending").set(counts.pending as f64);
    metrics::gauge!("fleet_members", "state" => "launching").set(counts.launching as f64);
    metrics::gauge!("fleet_members", "state" => "in_service").set(counts.in_service as f64);
    metrics::gauge!("fleet_members", "state" => "draining").set(counts.draining as f64);
}

pub fn set_routing_table_size(size: usize) {
    metrics::gauge!("fleet_routing_table_size").set(size as f64);
}

pub fn set_fleet_launch_failing(failing: bool) {
    metrics::gauge!("fleet_launch_failing").set(if failing { 1.0 } else { 0.0 });
}

pub fn record_launch_failure(reason: &'static str) {
    metrics::counter!("fleet_launch_failures_total", "reason" => reason).increment(1);
}

pub fn record_verdict_change(healthy: bool) {
    let verdict = if healthy { "healthy" } else { "unhealthy" };
    metrics::counter!("fleet_verdict_changes_total", "verdict" => verdict).increment(1);
}

pub fn record_probe(success: bool) {
    let result = if success { "success" } else { "failure" };
    metrics::counter!("fleet_health_probes_total", "result" => result).increment(1);
}

pub fn record_alarm_fired(alarm: &str) {
    metrics::counter!("fleet_alarm_firings_total", "alarm" => alarm.to_string()).increment(1);
}

pub fn record_metric_gap(alarm: &str) {
    metrics::counter!("fleet_metric_gaps_total", "alarm" => alarm.to_string()).increment(1);
}

pub fn record_scaling(policy: &str, outcome: &'static str) {
    metrics::counter!(
        "fleet_scaling_actions_total",
        "policy" => policy.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}
