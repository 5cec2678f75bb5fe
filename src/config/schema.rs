//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the fleet
//! manager. All types derive Serde traits for deserialization from config files.
//! The configuration is loaded once at startup and never re-read.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the fleet manager.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Traffic ingress listener.
    pub listener: ListenerConfig,

    /// Pool bounds and lifecycle timings.
    pub pool: PoolConfig,

    /// Compute substrate used to launch and terminate members.
    pub compute: ComputeConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Load distribution across healthy members.
    pub routing: RoutingConfig,

    /// Metric sampling settings.
    pub monitor: MonitorConfig,

    /// Alarm definitions evaluated by the metric monitor.
    pub alarms: Vec<AlarmConfig>,

    /// Scaling policies referenced by alarms.
    pub policies: Vec<PolicyConfig>,

    /// Timeout configuration for proxied requests.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API configuration.
    pub admin: AdminConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            pool: PoolConfig::default(),
            compute: ComputeConfig::default(),
            health_check: HealthCheckConfig::default(),
            routing: RoutingConfig::default(),
            monitor: MonitorConfig::default(),
            alarms: vec![
                AlarmConfig {
                    name: "cpu-high".to_string(),
                    comparison: Comparison::GreaterThan,
                    threshold: 70.0,
                    evaluation_periods: 2,
                    statistic: Statistic::Average,
                    policy: "scale-out".to_string(),
                },
                AlarmConfig {
                    name: "cpu-low".to_string(),
                    comparison: Comparison::LessThan,
                    threshold: 30.0,
                    evaluation_periods: 2,
                    statistic: Statistic::Average,
                    policy: "scale-in".to_string(),
                },
            ],
            policies: vec![
                PolicyConfig {
                    name: "scale-out".to_string(),
                    adjustment: 1,
                    cooldown_secs: 300,
                },
                PolicyConfig {
                    name: "scale-in".to_string(),
                    adjustment: -1,
                    cooldown_secs: 300,
                },
            ],
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address for inbound traffic (e.g., "0.0.0.0:80").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:80".to_string(),
        }
    }
}

/// Pool bounds and member lifecycle timings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool identifier, also used as the metric dimension.
    pub name: String,

    /// Minimum number of members.
    pub min_capacity: u32,

    /// Maximum number of members.
    pub max_capacity: u32,

    /// Initial desired capacity.
    pub desired_capacity: u32,

    /// Minimum time a member stays Launching before it can go InService.
    pub readiness_delay_secs: u64,

    /// Grace period a Draining member keeps before termination.
    pub drain_grace_secs: u64,

    /// Interval between reconciliation passes.
    pub reconcile_interval_secs: u64,

    /// Upper bound for a single launch call.
    pub launch_timeout_secs: u64,

    /// Consecutive launch failures tolerated before launches are suspended.
    pub launch_retry_limit: u32,

    /// Base delay for launch retry backoff in milliseconds.
    pub launch_backoff_base_ms: u64,

    /// Maximum delay for launch retry backoff in milliseconds.
    pub launch_backoff_max_ms: u64,
}

impl PoolConfig {
    pub fn readiness_delay(&self) -> Duration {
        Duration::from_secs(self.readiness_delay_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "web-pool".to_string(),
            min_capacity: 1,
            max_capacity: 4,
            desired_capacity: 1,
            readiness_delay_secs: 10,
            drain_grace_secs: 30,
            reconcile_interval_secs: 5,
            launch_timeout_secs: 120,
            launch_retry_limit: 3,
            launch_backoff_base_ms: 1_000,
            launch_backoff_max_ms: 30_000,
        }
    }
}

/// Which compute substrate implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstrateKind {
    /// A fixed inventory of already-running worker addresses.
    Static,
    /// Spawn one local process per member.
    Process,
}

/// Compute substrate configuration.
///
/// Image, instance type, region and network fields are passed through to the
/// substrate untouched; provisioning details are the substrate's business.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub kind: SubstrateKind,
    pub region: String,
    pub image: String,
    pub instance_type: String,
    pub network: NetworkConfig,

    /// Worker addresses handed out by the static substrate.
    pub static_workers: Vec<String>,

    /// Settings for the process substrate.
    pub process: ProcessConfig,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            kind: SubstrateKind::Static,
            region: "us-east-1".to_string(),
            image: "web-worker".to_string(),
            instance_type: "t2.micro".to_string(),
            network: NetworkConfig::default(),
            static_workers: Vec::new(),
            process: ProcessConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub vpc_cidr: String,
    pub subnet_cidrs: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            vpc_cidr: "10.0.0.0/16".to_string(),
            subnet_cidrs: vec!["10.0.1.0/24".to_string(), "10.0.2.0/24".to_string()],
        }
    }
}

/// Local process substrate settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Program to execute for each member.
    pub program: String,

    /// Arguments; `{port}` is replaced with the member's allocated port.
    pub args: Vec<String>,

    /// Host the spawned workers listen on.
    pub host: String,

    /// First port of the allocation range (inclusive).
    pub port_range_start: u16,

    /// Last port of the allocation range (inclusive).
    pub port_range_end: u16,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: vec!["--port".to_string(), "{port}".to_string()],
            host: "127.0.0.1".to_string(),
            port_range_start: 9100,
            port_range_end: 9199,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Port to probe; defaults to the member's traffic port.
    pub port: Option<u16>,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,

    /// Accepted response status codes.
    pub success_codes: StatusRange,

    /// A Launching member not Healthy after this long is a failed launch.
    pub startup_window_secs: u64,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn startup_window(&self) -> Duration {
        Duration::from_secs(self.startup_window_secs)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
            path: "/".to_string(),
            port: None,
            unhealthy_threshold: 2,
            healthy_threshold: 5,
            success_codes: StatusRange::default(),
            startup_window_secs: 300,
        }
    }
}

/// Inclusive range of HTTP status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct StatusRange {
    pub min: u16,
    pub max: u16,
}

impl StatusRange {
    pub fn contains(&self, status: u16) -> bool {
        (self.min..=self.max).contains(&status)
    }
}

impl Default for StatusRange {
    fn default() -> Self {
        Self { min: 200, max: 399 }
    }
}

/// Load distribution algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Balancing {
    RoundRobin,
    LeastConnections,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub algorithm: Balancing,

    /// Maximum concurrent proxied requests per member.
    pub max_connections_per_member: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            algorithm: Balancing::RoundRobin,
            max_connections_per_member: 100,
        }
    }
}

/// Metric sampling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Enable metric sampling and alarm evaluation.
    pub enabled: bool,

    /// Sampling period in seconds.
    pub period_secs: u64,

    /// Metric namespace queried from the source.
    pub namespace: String,

    /// Metric name queried from the source.
    pub metric_name: String,

    /// Telemetry endpoint; sampling is skipped when unset.
    pub source_url: Option<String>,

    /// Timeout for a single sample request in seconds.
    pub sample_timeout_secs: u64,
}

impl MonitorConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_secs(self.sample_timeout_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_secs: 120,
            namespace: "AWS/EC2".to_string(),
            metric_name: "CPUUtilization".to_string(),
            source_url: None,
            sample_timeout_secs: 5,
        }
    }
}

/// How a sample is compared against an alarm threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    GreaterThan,
    LessThan,
}

impl Comparison {
    /// Returns true when `value` breaches `threshold`.
    pub fn breaches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::LessThan => value < threshold,
        }
    }
}

/// Aggregation applied by the metric source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    Average,
    Minimum,
    Maximum,
    Sum,
    SampleCount,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Average => "Average",
            Statistic::Minimum => "Minimum",
            Statistic::Maximum => "Maximum",
            Statistic::Sum => "Sum",
            Statistic::SampleCount => "SampleCount",
        }
    }
}

/// Alarm definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlarmConfig {
    pub name: String,
    pub comparison: Comparison,
    pub threshold: f64,

    /// Consecutive breaching samples required before firing.
    pub evaluation_periods: u32,

    #[serde(default = "default_statistic")]
    pub statistic: Statistic,

    /// Name of the scaling policy invoked on firing.
    pub policy: String,
}

fn default_statistic() -> Statistic {
    Statistic::Average
}

/// Simple scaling policy definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    pub name: String,

    /// Signed capacity change applied on each firing.
    pub adjustment: i32,

    /// Minimum time between two applications of this policy.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_cooldown() -> u64 {
    300
}

/// Timeout configuration for proxied requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
