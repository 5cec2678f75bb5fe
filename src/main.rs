//! Elastic pool manager.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────────┐
//!                 │                        FLEET MANAGER                         │
//!                 │                                                              │
//!   Client ───────┼─▶ http::server ──▶ TrafficRouter ──▶ RoutingTable (ArcSwap) ─┼──▶ Member
//!                 │                                            ▲                 │
//!                 │                                            │ publish         │
//!                 │   HealthChecker ──verdicts──▶ PoolManager ─┘                 │
//!                 │        ▲                       │    ▲                        │
//!                 │        └──── member events ────┤    │ set_desired_capacity   │
//!                 │                                ▼    │                        │
//!                 │   MetricSource ──▶ MetricMonitor ──firings──▶ ScalingController│
//!                 │                                                              │
//!                 │   ComputeSubstrate ◀── launch / terminate ── PoolManager     │
//!                 └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use elastic_pool::config::{load_config, FleetConfig};
use elastic_pool::lifecycle::{signals, Fleet};
use elastic_pool::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "elastic-pool")]
#[command(about = "Elastic web-tier fleet manager", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "ELASTIC_POOL_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => FleetConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "elastic-pool starting");
    if args.config.is_none() {
        tracing::warn!("No --config given, running with defaults");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        pool = %config.pool.name,
        min = config.pool.min_capacity,
        desired = config.pool.desired_capacity,
        max = config.pool.max_capacity,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let admin = if config.admin.enabled {
        Some(TcpListener::bind(&config.admin.bind_address).await?)
    } else {
        None
    };

    Fleet::build(config)?
        .run(listener, admin, signals::wait_for_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
