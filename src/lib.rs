//! Elastic web-tier fleet manager.
//!
//! Keeps a pool of interchangeable HTTP workers sized to load, routes
//! traffic only to healthy workers and turns metric alarms into bounded,
//! rate-limited capacity changes.

pub mod admin;
pub mod compute;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod monitor;
pub mod observability;
pub mod pool;
pub mod resilience;
pub mod scaling;

pub use config::FleetConfig;
pub use http::HttpServer;
pub use lifecycle::{Fleet, Shutdown};
