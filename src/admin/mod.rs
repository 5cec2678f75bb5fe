//! Operator API.
//!
//! Bearer-token protected; served on its own listener.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::monitor::MetricMonitor;
use crate::pool::PoolManager;
use crate::scaling::ScalingController;

const ADMIN_BODY_LIMIT: usize = 16 * 1024;

#[derive(Clone)]
pub struct AdminState {
    pub pool: Arc<PoolManager>,
    pub monitor: Option<Arc<MetricMonitor>>,
    pub scaling: Arc<ScalingController>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/members", get(get_members))
        .route("/admin/members/{id}/cancel-drain", post(cancel_drain))
        .route("/admin/alarms", get(get_alarms))
        .route("/admin/policies", get(get_policies))
        .route("/admin/capacity", put(put_capacity))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(RequestBodyLimitLayer::new(ADMIN_BODY_LIMIT))
        .with_state(state)
}
