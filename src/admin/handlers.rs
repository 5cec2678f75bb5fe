use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::monitor::AlarmStatus;
use crate::pool::{MemberId, MemberSnapshot, PoolError, PoolStatus};
use crate::scaling::PolicyStatus;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    #[serde(flatten)]
    pub pool: PoolStatus,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CapacityRequest {
    pub desired: u32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CapacityResponse {
    pub requested: u32,
    pub desired: u32,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        pool: state.pool.status(),
    })
}

pub async fn get_members(State(state): State<AdminState>) -> Json<Vec<MemberSnapshot>> {
    Json(state.pool.members())
}

pub async fn get_alarms(State(state): State<AdminState>) -> Json<Vec<AlarmStatus>> {
    Json(state.monitor.as_ref().map(|m| m.alarms()).unwrap_or_default())
}

pub async fn get_policies(State(state): State<AdminState>) -> Json<Vec<PolicyStatus>> {
    Json(state.scaling.policies())
}

/// Operator capacity request. Clamped to bounds; also clears a raised fleet alarm.
pub async fn put_capacity(
    State(state): State<AdminState>,
    Json(request): Json<CapacityRequest>,
) -> Json<CapacityResponse> {
    tracing::info!(requested = request.desired, "Operator capacity request");
    state.pool.clear_fleet_alarm();
    let desired = state.pool.set_desired_capacity(request.desired).await;
    Json(CapacityResponse {
        requested: request.desired,
        desired,
    })
}

pub async fn cancel_drain(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    let id = MemberId::from(id);
    match state.pool.cancel_drain(&id) {
        Ok(()) => {
            tracing::info!(member = %id, "Drain cancelled by operator");
            match state.pool.member(&id) {
                Some(member) => Json(member).into_response(),
                None => StatusCode::NO_CONTENT.into_response(),
            }
        }
        Err(e) => {
            let status = match e {
                PoolError::NotFound(_) => StatusCode::NOT_FOUND,
                PoolError::NotDraining { .. } | PoolError::GracePeriodExpired(_) | PoolError::AtMaximum(_) => {
                    StatusCode::CONFLICT
                }
            };
            (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}
