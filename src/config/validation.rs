//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (alarms reference existing policies)
//! - Validate value ranges (capacity bounds, thresholds, periods)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FleetConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{FleetConfig, SubstrateKind};

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid address for {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("capacity bounds violated: min {min} <= desired {desired} <= max {max} does not hold")]
    CapacityBounds { min: u32, desired: u32, max: u32 },

    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("status range {min}-{max} is empty or out of range")]
    StatusRange { min: u16, max: u16 },

    #[error("alarm '{alarm}' references unknown policy '{policy}'")]
    UnknownPolicy { alarm: String, policy: String },

    #[error("duplicate {kind} name '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("policy '{0}' has a zero adjustment")]
    ZeroAdjustment(String),

    #[error("health_check.startup_window_secs {window} is shorter than the {needed}s needed to reach the healthy threshold")]
    StartupWindow { window: u64, needed: u64 },

    #[error("compute substrate '{0}' is not usable: {1}")]
    Substrate(&'static str, String),
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &FleetConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }

    let pool = &config.pool;
    if !(pool.min_capacity <= pool.desired_capacity && pool.desired_capacity <= pool.max_capacity) {
        errors.push(ValidationError::CapacityBounds {
            min: pool.min_capacity,
            desired: pool.desired_capacity,
            max: pool.max_capacity,
        });
    }
    check_positive(&mut errors, "pool.max_capacity", pool.max_capacity as u64);
    check_positive(&mut errors, "pool.reconcile_interval_secs", pool.reconcile_interval_secs);
    check_positive(&mut errors, "pool.launch_timeout_secs", pool.launch_timeout_secs);
    check_positive(&mut errors, "pool.launch_retry_limit", pool.launch_retry_limit as u64);

    let hc = &config.health_check;
    check_positive(&mut errors, "health_check.interval_secs", hc.interval_secs);
    check_positive(&mut errors, "health_check.timeout_secs", hc.timeout_secs);
    check_positive(&mut errors, "health_check.healthy_threshold", hc.healthy_threshold as u64);
    check_positive(&mut errors, "health_check.unhealthy_threshold", hc.unhealthy_threshold as u64);
    check_positive(&mut errors, "health_check.startup_window_secs", hc.startup_window_secs);
    // A member reaches Healthy no sooner than `healthy_threshold` probe intervals after launch.
    let needed = u64::from(hc.healthy_threshold).saturating_mul(hc.interval_secs);
    if hc.enabled && hc.startup_window_secs > 0 && hc.startup_window_secs < needed {
        errors.push(ValidationError::StartupWindow { window: hc.startup_window_secs, needed });
    }
    let codes = hc.success_codes;
    if codes.min > codes.max || codes.min < 100 || codes.max > 599 {
        errors.push(ValidationError::StatusRange { min: codes.min, max: codes.max });
    }

    check_positive(&mut errors, "routing.max_connections_per_member", config.routing.max_connections_per_member as u64);
    check_positive(&mut errors, "monitor.period_secs", config.monitor.period_secs);

    let mut policy_names = HashSet::new();
    for policy in &config.policies {
        if !policy_names.insert(policy.name.as_str()) {
            errors.push(ValidationError::Duplicate { kind: "policy", name: policy.name.clone() });
        }
        if policy.adjustment == 0 {
            errors.push(ValidationError::ZeroAdjustment(policy.name.clone()));
        }
    }

    let mut alarm_names = HashSet::new();
    for alarm in &config.alarms {
        if !alarm_names.insert(alarm.name.as_str()) {
            errors.push(ValidationError::Duplicate { kind: "alarm", name: alarm.name.clone() });
        }
        if alarm.evaluation_periods == 0 {
            errors.push(ValidationError::Zero { field: format!("alarms.{}.evaluation_periods", alarm.name) });
        }
        if !policy_names.contains(alarm.policy.as_str()) {
            errors.push(ValidationError::UnknownPolicy {
                alarm: alarm.name.clone(),
                policy: alarm.policy.clone(),
            });
        }
    }

    match config.compute.kind {
        SubstrateKind::Static => {
            for worker in &config.compute.static_workers {
                check_addr(&mut errors, "compute.static_workers", worker);
            }
        }
        SubstrateKind::Process => {
            let process = &config.compute.process;
            if process.program.is_empty() {
                errors.push(ValidationError::Substrate("process", "program is empty".to_string()));
            }
            if process.port_range_start > process.port_range_end {
                errors.push(ValidationError::Substrate(
                    "process",
                    format!("port range {}-{} is empty", process.port_range_start, process.port_range_end),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress { field, value: value.to_string() });
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero { field: field.to_string() });
    }
}
