//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → FleetConfig (validated, immutable)
//!     → cloned into each subsystem at startup
//! ```
//!
//! # Design Decisions
//! - Config is loaded once; there is no runtime reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, AlarmConfig, Balancing, Comparison, ComputeConfig, FleetConfig,
    HealthCheckConfig, ListenerConfig, MonitorConfig, ObservabilityConfig, PolicyConfig,
    PoolConfig, ProcessConfig, RoutingConfig, Statistic, StatusRange, SubstrateKind,
    TimeoutConfig,
};
